//! Instruction set for the SSA module IR.

use serde::{Deserialize, Serialize};

/// Result identifier. `0` is never a valid id.
pub type Id = u32;

/// IR Opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Types
    TypeVoid,
    TypeBool,
    TypeInt,
    TypeFloat,
    TypeVector,
    TypeArray,
    TypeStruct,
    TypePointer,
    TypeFunction,

    // Constants
    ConstantTrue,
    ConstantFalse,
    Constant,
    ConstantComposite,
    ConstantNull,
    Undef,

    // Declarations
    Variable,
    Decorate,
    Function,
    FunctionParameter,
    Phi,

    // Memory
    Load,
    Store,
    AccessChain,

    // Composites
    CopyObject,
    CompositeConstruct,
    CompositeExtract,

    // Arithmetic and logic
    IAdd,
    ISub,
    IMul,
    SNegate,
    FAdd,
    FSub,
    FMul,
    FNegate,
    LogicalNot,
    LogicalAnd,
    LogicalOr,
    IEqual,
    INotEqual,
    SLessThan,
    SGreaterThan,
    Select,

    FunctionCall,

    // Structured control flow
    SelectionMerge,
    LoopMerge,

    // Terminators
    Branch,
    BranchConditional,
    Return,
    ReturnValue,
    Kill,
    Unreachable,

    Nop,
}

impl Opcode {
    pub fn is_type_declaration(&self) -> bool {
        matches!(
            self,
            Opcode::TypeVoid
                | Opcode::TypeBool
                | Opcode::TypeInt
                | Opcode::TypeFloat
                | Opcode::TypeVector
                | Opcode::TypeArray
                | Opcode::TypeStruct
                | Opcode::TypePointer
                | Opcode::TypeFunction
        )
    }

    /// Returns true for constant declarations. `Undef` is not a constant.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Opcode::ConstantTrue
                | Opcode::ConstantFalse
                | Opcode::Constant
                | Opcode::ConstantComposite
                | Opcode::ConstantNull
        )
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Branch
                | Opcode::BranchConditional
                | Opcode::Return
                | Opcode::ReturnValue
                | Opcode::Kill
                | Opcode::Unreachable
        )
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Opcode::Return | Opcode::ReturnValue)
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, Opcode::SelectionMerge | Opcode::LoopMerge)
    }

    /// Binary opcodes whose two operands can be exchanged.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Opcode::IAdd
                | Opcode::IMul
                | Opcode::FAdd
                | Opcode::FMul
                | Opcode::LogicalAnd
                | Opcode::LogicalOr
                | Opcode::IEqual
                | Opcode::INotEqual
        )
    }

    /// Returns true if executing the instruction reads or writes memory
    /// or may do so through a call.
    pub fn accesses_memory(&self) -> bool {
        matches!(self, Opcode::Load | Opcode::Store | Opcode::FunctionCall)
    }

    pub fn has_result_id(&self) -> bool {
        !matches!(
            self,
            Opcode::Decorate
                | Opcode::Store
                | Opcode::SelectionMerge
                | Opcode::LoopMerge
                | Opcode::Branch
                | Opcode::BranchConditional
                | Opcode::Return
                | Opcode::ReturnValue
                | Opcode::Kill
                | Opcode::Unreachable
                | Opcode::Nop
        )
    }

    pub fn has_result_type(&self) -> bool {
        self.has_result_id() && !self.is_type_declaration()
    }

    /// Returns true if the operand at `index` names a block label.
    pub fn is_label_operand(&self, index: usize) -> bool {
        match self {
            Opcode::Branch | Opcode::SelectionMerge => index == 0,
            Opcode::LoopMerge => index < 2,
            Opcode::BranchConditional => index == 1 || index == 2,
            Opcode::Phi => index % 2 == 1,
            _ => false,
        }
    }
}

/// Storage class of a pointer or variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    Input,
    Uniform,
    Output,
    Private,
    Function,
}

impl StorageClass {
    pub fn to_literal(self) -> u32 {
        match self {
            StorageClass::Input => 1,
            StorageClass::Uniform => 2,
            StorageClass::Output => 3,
            StorageClass::Private => 6,
            StorageClass::Function => 7,
        }
    }

    pub fn from_literal(value: u32) -> Option<Self> {
        match value {
            1 => Some(StorageClass::Input),
            2 => Some(StorageClass::Uniform),
            3 => Some(StorageClass::Output),
            6 => Some(StorageClass::Private),
            7 => Some(StorageClass::Function),
            _ => None,
        }
    }

    /// Returns true if writes through a pointer of this class are illegal.
    pub fn is_read_only(self) -> bool {
        matches!(self, StorageClass::Input | StorageClass::Uniform)
    }
}

/// Decoration kinds carried by `Decorate` annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decoration {
    Binding,
    DescriptorSet,
    NoContraction,
}

impl Decoration {
    pub fn to_literal(self) -> u32 {
        match self {
            Decoration::Binding => 33,
            Decoration::DescriptorSet => 34,
            Decoration::NoContraction => 42,
        }
    }

    pub fn from_literal(value: u32) -> Option<Self> {
        match value {
            33 => Some(Decoration::Binding),
            34 => Some(Decoration::DescriptorSet),
            42 => Some(Decoration::NoContraction),
            _ => None,
        }
    }
}

/// Function control mask bits
pub mod function_control {
    pub const NONE: u32 = 0;
    pub const INLINE: u32 = 0x1;
    pub const DONT_INLINE: u32 = 0x2;
    pub const PURE: u32 = 0x4;
    pub const CONST: u32 = 0x8;
    pub const ALL: u32 = INLINE | DONT_INLINE | PURE | CONST;
}

/// Selection control values
pub mod selection_control {
    pub const NONE: u32 = 0;
    pub const FLATTEN: u32 = 0x1;
    pub const DONT_FLATTEN: u32 = 0x2;
}

/// Loop control mask bits
pub mod loop_control {
    pub const NONE: u32 = 0;
    pub const UNROLL: u32 = 0x1;
    pub const DONT_UNROLL: u32 = 0x2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Id(Id),
    Literal(u32),
}

impl Operand {
    pub fn as_id(&self) -> Option<Id> {
        match self {
            Operand::Id(id) => Some(*id),
            Operand::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<u32> {
        match self {
            Operand::Literal(value) => Some(*value),
            Operand::Id(_) => None,
        }
    }
}

/// A single instruction in the IR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub result_type: Option<Id>,
    pub result_id: Option<Id>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            result_type: None,
            result_id: None,
            operands: Vec::new(),
        }
    }

    pub fn with_result_type(mut self, type_id: Id) -> Self {
        self.result_type = Some(type_id);
        self
    }

    pub fn with_result_id(mut self, id: Id) -> Self {
        self.result_id = Some(id);
        self
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    pub fn with_id_operands(mut self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.operands.extend(ids.into_iter().map(Operand::Id));
        self
    }

    pub fn id_operand(&self, index: usize) -> Option<Id> {
        self.operands.get(index).and_then(Operand::as_id)
    }

    pub fn literal_operand(&self, index: usize) -> Option<u32> {
        self.operands.get(index).and_then(Operand::as_literal)
    }

    /// Ids referenced by the operands, in operand order.
    pub fn id_operands(&self) -> impl Iterator<Item = Id> + '_ {
        self.operands.iter().filter_map(Operand::as_id)
    }

    /// Returns true if the result type or any operand refers to `id`.
    pub fn references(&self, id: Id) -> bool {
        self.result_type == Some(id) || self.id_operands().any(|operand| operand == id)
    }

    /// Rewrites every id this instruction mentions, including its own
    /// result id and result type.
    pub fn map_ids(&mut self, mut f: impl FnMut(Id) -> Id) {
        if let Some(id) = self.result_id.as_mut() {
            *id = f(*id);
        }
        if let Some(id) = self.result_type.as_mut() {
            *id = f(*id);
        }
        for operand in &mut self.operands {
            if let Operand::Id(id) = operand {
                *id = f(*id);
            }
        }
    }

    /// Replaces every operand use of `old` with `new`.
    pub fn replace_operand_id(&mut self, old: Id, new: Id) {
        for operand in &mut self.operands {
            if *operand == Operand::Id(old) {
                *operand = Operand::Id(new);
            }
        }
    }

    pub fn branch(target: Id) -> Self {
        Self::new(Opcode::Branch).with_operand(Operand::Id(target))
    }

    pub fn branch_conditional(condition: Id, if_true: Id, if_false: Id) -> Self {
        Self::new(Opcode::BranchConditional).with_id_operands([condition, if_true, if_false])
    }

    pub fn selection_merge(merge_block: Id, control: u32) -> Self {
        Self::new(Opcode::SelectionMerge)
            .with_operand(Operand::Id(merge_block))
            .with_operand(Operand::Literal(control))
    }

    pub fn return_void() -> Self {
        Self::new(Opcode::Return)
    }

    pub fn return_value(value: Id) -> Self {
        Self::new(Opcode::ReturnValue).with_operand(Operand::Id(value))
    }

    /// An instruction producing a typed value from id operands.
    pub fn value(opcode: Opcode, result_type: Id, result_id: Id, operands: &[Id]) -> Self {
        Self::new(opcode)
            .with_result_type(result_type)
            .with_result_id(result_id)
            .with_id_operands(operands.iter().copied())
    }

    /// Label operands of a terminator, in operand order.
    pub fn branch_targets(&self) -> Vec<Id> {
        match self.opcode {
            Opcode::Branch => self.id_operand(0).into_iter().collect(),
            Opcode::BranchConditional => {
                self.id_operand(1).into_iter().chain(self.id_operand(2)).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_properties() {
        assert!(Opcode::Branch.is_terminator());
        assert!(!Opcode::IAdd.is_terminator());
        assert!(Opcode::IAdd.is_commutative());
        assert!(!Opcode::ISub.is_commutative());
        assert!(Opcode::ConstantNull.is_constant());
        assert!(!Opcode::Undef.is_constant());
        assert!(!Opcode::Store.has_result_id());
        assert!(Opcode::TypeInt.has_result_id());
        assert!(!Opcode::TypeInt.has_result_type());
        assert!(Opcode::Phi.is_label_operand(1));
        assert!(!Opcode::Phi.is_label_operand(0));
    }

    #[test]
    fn test_storage_class_literals() {
        for class in [
            StorageClass::Input,
            StorageClass::Uniform,
            StorageClass::Output,
            StorageClass::Private,
            StorageClass::Function,
        ] {
            assert_eq!(StorageClass::from_literal(class.to_literal()), Some(class));
        }
        assert_eq!(StorageClass::from_literal(0), None);
        assert!(StorageClass::Uniform.is_read_only());
        assert!(!StorageClass::Private.is_read_only());
    }

    #[test]
    fn test_instruction_builders() {
        let inst = Instruction::value(Opcode::IAdd, 1, 10, &[2, 3]);
        assert_eq!(inst.opcode, Opcode::IAdd);
        assert_eq!(inst.result_id, Some(10));
        assert_eq!(inst.id_operands().collect::<Vec<_>>(), vec![2, 3]);
        assert!(inst.references(1));
        assert!(!inst.references(10));

        let inst = Instruction::branch_conditional(5, 6, 7);
        assert_eq!(inst.branch_targets(), vec![6, 7]);
    }

    #[test]
    fn test_map_ids() {
        let mut inst = Instruction::value(Opcode::ISub, 1, 10, &[2, 2]);
        inst.map_ids(|id| id + 100);
        assert_eq!(inst.result_id, Some(110));
        assert_eq!(inst.result_type, Some(101));
        assert_eq!(inst.operands, vec![Operand::Id(102), Operand::Id(102)]);

        inst.replace_operand_id(102, 7);
        assert_eq!(inst.operands, vec![Operand::Id(7), Operand::Id(7)]);
    }
}
