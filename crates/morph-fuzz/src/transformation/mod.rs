//! Transformations: serializable, semantics-preserving module edits.
//!
//! Every transformation has a precondition (`is_applicable`) checked
//! against the module and the fact manager, and an effect (`apply`) that
//! edits the module and records new facts. Applying a transformation whose
//! precondition holds to a valid module yields a valid module with the same
//! observable behavior.

mod add_constant;
mod add_dead_block;
mod add_function;
mod add_type;
mod add_variable;
mod composite;
mod compute_closure;
mod copy_object;
mod equation_instruction;
mod function_call;
mod inline_function;
mod memory;
mod move_instruction_down;
mod permute_function_parameters;
mod replace_constant_with_uniform;
mod replace_id_with_synonym;
mod set_control;
mod split_block;
mod swap_commutable_operands;

pub use add_constant::{AddConstantBoolean, AddConstantComposite, AddConstantScalar};
pub use add_dead_block::AddDeadBlock;
pub use add_function::AddFunction;
pub use add_type::{
    AddTypeBoolean, AddTypeFloat, AddTypeFunction, AddTypeInt, AddTypePointer, AddTypeStruct, AddTypeVector,
};
pub use add_variable::{AddGlobalVariable, AddLocalVariable};
pub use composite::{CompositeConstruct, CompositeExtract};
pub use compute_closure::ComputeDataSynonymFactClosure;
pub use copy_object::CopyObject;
pub use equation_instruction::EquationInstruction;
pub use function_call::FunctionCall;
pub use inline_function::InlineFunction;
pub use memory::{Load, Store};
pub use move_instruction_down::MoveInstructionDown;
pub use permute_function_parameters::PermuteFunctionParameters;
pub use replace_constant_with_uniform::ReplaceConstantWithUniform;
pub use replace_id_with_synonym::ReplaceIdWithSynonym;
pub(crate) use replace_id_with_synonym::use_can_be_replaced;
pub use set_control::{AdjustBranchWeights, SetFunctionControl, SetSelectionControl};
pub use split_block::SplitBlock;
pub use swap_commutable_operands::SwapCommutableOperands;

use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use crate::util::{can_insert_opcode_before, id_is_available_before};
use morph_ir::{DominatorAnalysis, Id, InstructionPosition, Module, Opcode};
use serde::{Deserialize, Serialize};

/// A single kind of module edit.
pub trait Transform {
    /// Whether the transformation can be applied to `module` without
    /// changing its semantics. Pure: never mutates anything.
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool;

    /// Applies the edit. Must only be called when `is_applicable` holds;
    /// otherwise an invariant error is returned and the module may be
    /// left partially edited.
    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()>;
}

/// Every transformation kind the engine knows, as one serializable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transformation {
    AddTypeBoolean(AddTypeBoolean),
    AddTypeInt(AddTypeInt),
    AddTypeFloat(AddTypeFloat),
    AddTypeVector(AddTypeVector),
    AddTypeStruct(AddTypeStruct),
    AddTypePointer(AddTypePointer),
    AddTypeFunction(AddTypeFunction),
    AddConstantBoolean(AddConstantBoolean),
    AddConstantScalar(AddConstantScalar),
    AddConstantComposite(AddConstantComposite),
    AddGlobalVariable(AddGlobalVariable),
    AddLocalVariable(AddLocalVariable),
    AddFunction(AddFunction),
    EquationInstruction(EquationInstruction),
    CopyObject(CopyObject),
    CompositeConstruct(CompositeConstruct),
    CompositeExtract(CompositeExtract),
    FunctionCall(FunctionCall),
    Load(Load),
    Store(Store),
    AddDeadBlock(AddDeadBlock),
    ReplaceIdWithSynonym(ReplaceIdWithSynonym),
    ReplaceConstantWithUniform(ReplaceConstantWithUniform),
    PermuteFunctionParameters(PermuteFunctionParameters),
    MoveInstructionDown(MoveInstructionDown),
    InlineFunction(InlineFunction),
    SplitBlock(SplitBlock),
    SwapCommutableOperands(SwapCommutableOperands),
    AdjustBranchWeights(AdjustBranchWeights),
    SetFunctionControl(SetFunctionControl),
    SetSelectionControl(SetSelectionControl),
    ComputeDataSynonymFactClosure(ComputeDataSynonymFactClosure),
}

macro_rules! dispatch {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            Transformation::AddTypeBoolean($t) => $body,
            Transformation::AddTypeInt($t) => $body,
            Transformation::AddTypeFloat($t) => $body,
            Transformation::AddTypeVector($t) => $body,
            Transformation::AddTypeStruct($t) => $body,
            Transformation::AddTypePointer($t) => $body,
            Transformation::AddTypeFunction($t) => $body,
            Transformation::AddConstantBoolean($t) => $body,
            Transformation::AddConstantScalar($t) => $body,
            Transformation::AddConstantComposite($t) => $body,
            Transformation::AddGlobalVariable($t) => $body,
            Transformation::AddLocalVariable($t) => $body,
            Transformation::AddFunction($t) => $body,
            Transformation::EquationInstruction($t) => $body,
            Transformation::CopyObject($t) => $body,
            Transformation::CompositeConstruct($t) => $body,
            Transformation::CompositeExtract($t) => $body,
            Transformation::FunctionCall($t) => $body,
            Transformation::Load($t) => $body,
            Transformation::Store($t) => $body,
            Transformation::AddDeadBlock($t) => $body,
            Transformation::ReplaceIdWithSynonym($t) => $body,
            Transformation::ReplaceConstantWithUniform($t) => $body,
            Transformation::PermuteFunctionParameters($t) => $body,
            Transformation::MoveInstructionDown($t) => $body,
            Transformation::InlineFunction($t) => $body,
            Transformation::SplitBlock($t) => $body,
            Transformation::SwapCommutableOperands($t) => $body,
            Transformation::AdjustBranchWeights($t) => $body,
            Transformation::SetFunctionControl($t) => $body,
            Transformation::SetSelectionControl($t) => $body,
            Transformation::ComputeDataSynonymFactClosure($t) => $body,
        }
    };
}

impl Transformation {
    pub fn name(&self) -> &'static str {
        match self {
            Transformation::AddTypeBoolean(_) => "add_type_boolean",
            Transformation::AddTypeInt(_) => "add_type_int",
            Transformation::AddTypeFloat(_) => "add_type_float",
            Transformation::AddTypeVector(_) => "add_type_vector",
            Transformation::AddTypeStruct(_) => "add_type_struct",
            Transformation::AddTypePointer(_) => "add_type_pointer",
            Transformation::AddTypeFunction(_) => "add_type_function",
            Transformation::AddConstantBoolean(_) => "add_constant_boolean",
            Transformation::AddConstantScalar(_) => "add_constant_scalar",
            Transformation::AddConstantComposite(_) => "add_constant_composite",
            Transformation::AddGlobalVariable(_) => "add_global_variable",
            Transformation::AddLocalVariable(_) => "add_local_variable",
            Transformation::AddFunction(_) => "add_function",
            Transformation::EquationInstruction(_) => "equation_instruction",
            Transformation::CopyObject(_) => "copy_object",
            Transformation::CompositeConstruct(_) => "composite_construct",
            Transformation::CompositeExtract(_) => "composite_extract",
            Transformation::FunctionCall(_) => "function_call",
            Transformation::Load(_) => "load",
            Transformation::Store(_) => "store",
            Transformation::AddDeadBlock(_) => "add_dead_block",
            Transformation::ReplaceIdWithSynonym(_) => "replace_id_with_synonym",
            Transformation::ReplaceConstantWithUniform(_) => "replace_constant_with_uniform",
            Transformation::PermuteFunctionParameters(_) => "permute_function_parameters",
            Transformation::MoveInstructionDown(_) => "move_instruction_down",
            Transformation::InlineFunction(_) => "inline_function",
            Transformation::SplitBlock(_) => "split_block",
            Transformation::SwapCommutableOperands(_) => "swap_commutable_operands",
            Transformation::AdjustBranchWeights(_) => "adjust_branch_weights",
            Transformation::SetFunctionControl(_) => "set_function_control",
            Transformation::SetSelectionControl(_) => "set_selection_control",
            Transformation::ComputeDataSynonymFactClosure(_) => "compute_data_synonym_fact_closure",
        }
    }
}

impl Transform for Transformation {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        dispatch!(self, t => t.is_applicable(module, facts))
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        dispatch!(self, t => t.apply(module, facts))
    }
}

macro_rules! impl_from {
    ($($kind:ident),* $(,)?) => {
        $(
            impl From<$kind> for Transformation {
                fn from(t: $kind) -> Self {
                    Transformation::$kind(t)
                }
            }
        )*
    };
}

impl_from!(
    AddTypeBoolean,
    AddTypeInt,
    AddTypeFloat,
    AddTypeVector,
    AddTypeStruct,
    AddTypePointer,
    AddTypeFunction,
    AddConstantBoolean,
    AddConstantScalar,
    AddConstantComposite,
    AddGlobalVariable,
    AddLocalVariable,
    AddFunction,
    EquationInstruction,
    CopyObject,
    CompositeConstruct,
    CompositeExtract,
    FunctionCall,
    Load,
    Store,
    AddDeadBlock,
    ReplaceIdWithSynonym,
    ReplaceConstantWithUniform,
    PermuteFunctionParameters,
    MoveInstructionDown,
    InlineFunction,
    SplitBlock,
    SwapCommutableOperands,
    AdjustBranchWeights,
    SetFunctionControl,
    SetSelectionControl,
    ComputeDataSynonymFactClosure,
);

/// An ordered log of applied transformations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationSequence {
    pub transformations: Vec<Transformation>,
}

impl TransformationSequence {
    pub fn new(transformations: Vec<Transformation>) -> Self {
        Self { transformations }
    }

    pub fn len(&self) -> usize {
        self.transformations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformations.is_empty()
    }

    pub fn push(&mut self, transformation: Transformation) {
        self.transformations.push(transformation);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transformation> {
        self.transformations.iter()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FromIterator<Transformation> for TransformationSequence {
    fn from_iter<I: IntoIterator<Item = Transformation>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Resolves `descriptor` during `apply`, where failure means the caller
/// broke the precondition contract.
pub(crate) fn resolve_for_apply(descriptor: &InstructionDescriptor, module: &Module) -> Result<InstructionPosition> {
    descriptor
        .resolve(module)
        .ok_or_else(|| Error::invariant(format!("instruction descriptor {:?} does not resolve", descriptor)))
}

/// Where an instruction with `opcode` would be inserted, if `descriptor`
/// resolves and insertion there is legal.
pub(crate) fn insertion_point(
    module: &Module,
    descriptor: &InstructionDescriptor,
    opcode: Opcode,
) -> Option<InstructionPosition> {
    let position = descriptor.resolve(module)?;
    can_insert_opcode_before(module, position, opcode).then_some(position)
}

/// Returns true if every id in `ids` may be used by an instruction inserted
/// at `position`.
pub(crate) fn all_available_before(module: &Module, position: InstructionPosition, ids: &[Id]) -> bool {
    let Some(function) = module.functions.get(position.function) else {
        return false;
    };
    let dominators = DominatorAnalysis::new(function);
    ids.iter()
        .all(|id| id_is_available_before(module, &dominators, position, *id))
}

/// Label of the block holding `position`.
pub(crate) fn block_label(module: &Module, position: InstructionPosition) -> Option<Id> {
    module.block_at(position.function, position.block).map(|block| block.label)
}

pub(crate) fn ensure_applicable<T: Transform + std::fmt::Debug>(
    transformation: &T,
    module: &Module,
    facts: &FactManager,
) -> Result<()> {
    if transformation.is_applicable(module, facts) {
        Ok(())
    } else {
        Err(Error::invariant(format!("{:?} applied without holding", transformation)))
    }
}
