//! Module IR for the mutation engine.
//!
//! A module is a list of global declarations (types, constants, global
//! variables) followed by functions in SSA form. Every definition has a
//! numeric id; instructions refer to each other through ids only, so the
//! module can be freely edited without dangling references.

pub mod analysis;
pub mod builder;
pub mod instruction;
pub mod module;
pub mod samples;
pub mod types;
pub mod validation;

pub use analysis::{ControlFlowGraph, DominatorAnalysis};
pub use builder::ModuleBuilder;
pub use instruction::{
    function_control, loop_control, selection_control, Decoration, Id, Instruction, Opcode, Operand,
    StorageClass,
};
pub use module::{BasicBlock, DefSite, EntryPoint, Function, InstructionPosition, Module};
pub use types::{words_for_width, ConstantValue, TypeKey};
pub use validation::{
    check_composite_components, is_value_type, type_is_well_formed, StructuralValidator, Validator,
};
