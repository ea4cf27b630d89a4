//! Type and constant interning queries.

use crate::instruction::{Decoration, Id, Instruction, Opcode, Operand, StorageClass};
use crate::module::Module;
use serde::{Deserialize, Serialize};

/// Structural identity of a type declaration. Two declarations with equal
/// keys declare the same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKey {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: Id, count: u32 },
    Array { element: Id, length: u32 },
    Struct { members: Vec<Id> },
    Pointer { storage: StorageClass, pointee: Id },
    Function { return_type: Id, params: Vec<Id> },
}

impl TypeKey {
    pub fn from_instruction(inst: &Instruction) -> Option<Self> {
        let key = match inst.opcode {
            Opcode::TypeVoid => TypeKey::Void,
            Opcode::TypeBool => TypeKey::Bool,
            Opcode::TypeInt => TypeKey::Int {
                width: inst.literal_operand(0)?,
                signed: inst.literal_operand(1)? != 0,
            },
            Opcode::TypeFloat => TypeKey::Float {
                width: inst.literal_operand(0)?,
            },
            Opcode::TypeVector => TypeKey::Vector {
                component: inst.id_operand(0)?,
                count: inst.literal_operand(1)?,
            },
            Opcode::TypeArray => TypeKey::Array {
                element: inst.id_operand(0)?,
                length: inst.literal_operand(1)?,
            },
            Opcode::TypeStruct => TypeKey::Struct {
                members: inst.id_operands().collect(),
            },
            Opcode::TypePointer => TypeKey::Pointer {
                storage: StorageClass::from_literal(inst.literal_operand(0)?)?,
                pointee: inst.id_operand(1)?,
            },
            Opcode::TypeFunction => TypeKey::Function {
                return_type: inst.id_operand(0)?,
                params: inst.id_operands().skip(1).collect(),
            },
            _ => return None,
        };
        Some(key)
    }

    /// Builds the declaration of this type under `result_id`.
    pub fn to_instruction(&self, result_id: Id) -> Instruction {
        let (opcode, operands) = match self {
            TypeKey::Void => (Opcode::TypeVoid, Vec::new()),
            TypeKey::Bool => (Opcode::TypeBool, Vec::new()),
            TypeKey::Int { width, signed } => (
                Opcode::TypeInt,
                vec![Operand::Literal(*width), Operand::Literal(*signed as u32)],
            ),
            TypeKey::Float { width } => (Opcode::TypeFloat, vec![Operand::Literal(*width)]),
            TypeKey::Vector { component, count } => (
                Opcode::TypeVector,
                vec![Operand::Id(*component), Operand::Literal(*count)],
            ),
            TypeKey::Array { element, length } => (
                Opcode::TypeArray,
                vec![Operand::Id(*element), Operand::Literal(*length)],
            ),
            TypeKey::Struct { members } => (
                Opcode::TypeStruct,
                members.iter().copied().map(Operand::Id).collect(),
            ),
            TypeKey::Pointer { storage, pointee } => (
                Opcode::TypePointer,
                vec![Operand::Literal(storage.to_literal()), Operand::Id(*pointee)],
            ),
            TypeKey::Function {
                return_type,
                params,
            } => (
                Opcode::TypeFunction,
                std::iter::once(*return_type)
                    .chain(params.iter().copied())
                    .map(Operand::Id)
                    .collect(),
            ),
        };
        Instruction::new(opcode)
            .with_result_id(result_id)
            .with_operands(operands)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, TypeKey::Bool | TypeKey::Int { .. } | TypeKey::Float { .. })
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            TypeKey::Vector { .. } | TypeKey::Array { .. } | TypeKey::Struct { .. }
        )
    }
}

/// Number of 32-bit words a scalar constant of `width` bits occupies.
pub fn words_for_width(width: u32) -> usize {
    width.div_ceil(32) as usize
}

/// Value identity of a constant, used to tell distinct constants apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    Bool(bool),
    Scalar { type_id: Id, words: Vec<u32> },
    Composite { type_id: Id, components: Vec<Id> },
    Null { type_id: Id },
}

impl Module {
    pub fn type_key(&self, type_id: Id) -> Option<TypeKey> {
        TypeKey::from_instruction(self.def_instruction(type_id)?)
    }

    pub fn is_type(&self, id: Id) -> bool {
        self.def_instruction(id)
            .is_some_and(|inst| inst.opcode.is_type_declaration())
    }

    /// First declaration of the type described by `key`.
    pub fn find_type(&self, key: &TypeKey) -> Option<Id> {
        self.globals
            .iter()
            .filter(|inst| inst.opcode.is_type_declaration())
            .find(|inst| TypeKey::from_instruction(inst).as_ref() == Some(key))
            .and_then(|inst| inst.result_id)
    }

    pub fn find_pointer_type(&self, storage: StorageClass, pointee: Id) -> Option<Id> {
        self.find_type(&TypeKey::Pointer { storage, pointee })
    }

    pub fn pointee_type(&self, pointer_type: Id) -> Option<(StorageClass, Id)> {
        match self.type_key(pointer_type)? {
            TypeKey::Pointer { storage, pointee } => Some((storage, pointee)),
            _ => None,
        }
    }

    pub fn is_void_type(&self, type_id: Id) -> bool {
        self.type_key(type_id) == Some(TypeKey::Void)
    }

    pub fn is_bool_type(&self, type_id: Id) -> bool {
        self.type_key(type_id) == Some(TypeKey::Bool)
    }

    /// Returns true for int types and vectors of ints.
    pub fn is_integer_type(&self, type_id: Id) -> bool {
        match self.type_key(type_id) {
            Some(TypeKey::Int { .. }) => true,
            Some(TypeKey::Vector { component, .. }) => {
                matches!(self.type_key(component), Some(TypeKey::Int { .. }))
            }
            _ => false,
        }
    }

    /// Returns true for float types and vectors of floats.
    pub fn is_float_type(&self, type_id: Id) -> bool {
        match self.type_key(type_id) {
            Some(TypeKey::Float { .. }) => true,
            Some(TypeKey::Vector { component, .. }) => {
                matches!(self.type_key(component), Some(TypeKey::Float { .. }))
            }
            _ => false,
        }
    }

    /// Returns true for bool and vectors of bool.
    pub fn is_boolean_type(&self, type_id: Id) -> bool {
        match self.type_key(type_id) {
            Some(TypeKey::Bool) => true,
            Some(TypeKey::Vector { component, .. }) => self.is_bool_type(component),
            _ => false,
        }
    }

    pub fn is_pointer_type(&self, type_id: Id) -> bool {
        matches!(self.type_key(type_id), Some(TypeKey::Pointer { .. }))
    }

    pub fn is_composite_type(&self, type_id: Id) -> bool {
        self.type_key(type_id).is_some_and(|key| key.is_composite())
    }

    /// Number of direct members of a composite type.
    pub fn composite_member_count(&self, type_id: Id) -> Option<u32> {
        match self.type_key(type_id)? {
            TypeKey::Vector { count, .. } => Some(count),
            TypeKey::Array { length, .. } => Some(length),
            TypeKey::Struct { members } => Some(members.len() as u32),
            _ => None,
        }
    }

    /// Type of member `index` of a composite type.
    pub fn walk_composite_type_index(&self, type_id: Id, index: u32) -> Option<Id> {
        match self.type_key(type_id)? {
            TypeKey::Vector { component, count } => (index < count).then_some(component),
            TypeKey::Array { element, length } => (index < length).then_some(element),
            TypeKey::Struct { members } => members.get(index as usize).copied(),
            _ => None,
        }
    }

    /// Follows a chain of member indices from `type_id`.
    pub fn walk_composite_type_indices(&self, type_id: Id, indices: &[u32]) -> Option<Id> {
        indices
            .iter()
            .try_fold(type_id, |current, index| {
                self.walk_composite_type_index(current, *index)
            })
    }

    pub fn find_bool_constant(&self, value: bool) -> Option<Id> {
        let opcode = if value {
            Opcode::ConstantTrue
        } else {
            Opcode::ConstantFalse
        };
        self.globals
            .iter()
            .find(|inst| {
                inst.opcode == opcode && inst.result_type.is_some_and(|ty| self.is_bool_type(ty))
            })
            .and_then(|inst| inst.result_id)
    }

    pub fn find_scalar_constant(&self, type_id: Id, words: &[u32]) -> Option<Id> {
        self.globals
            .iter()
            .find(|inst| {
                inst.opcode == Opcode::Constant
                    && inst.result_type == Some(type_id)
                    && inst.operands.iter().map(Operand::as_literal).eq(words.iter().copied().map(Some))
            })
            .and_then(|inst| inst.result_id)
    }

    pub fn find_composite_constant(&self, type_id: Id, components: &[Id]) -> Option<Id> {
        self.globals
            .iter()
            .find(|inst| {
                inst.opcode == Opcode::ConstantComposite
                    && inst.result_type == Some(type_id)
                    && inst.id_operands().eq(components.iter().copied())
            })
            .and_then(|inst| inst.result_id)
    }

    /// Literal words of a scalar `Constant`.
    pub fn constant_words(&self, id: Id) -> Option<Vec<u32>> {
        let inst = self.def_instruction(id)?;
        if inst.opcode != Opcode::Constant {
            return None;
        }
        inst.operands.iter().map(Operand::as_literal).collect()
    }

    /// Value of a 32-bit integer constant.
    pub fn int_constant_value(&self, id: Id) -> Option<u32> {
        let ty = self.type_of(id)?;
        match (self.type_key(ty)?, self.constant_words(id)?.as_slice()) {
            (TypeKey::Int { width: 32, .. }, [word]) => Some(*word),
            _ => None,
        }
    }

    pub fn constant_value(&self, id: Id) -> Option<ConstantValue> {
        let inst = self.def_instruction(id)?;
        let type_id = inst.result_type?;
        let value = match inst.opcode {
            Opcode::ConstantTrue => ConstantValue::Bool(true),
            Opcode::ConstantFalse => ConstantValue::Bool(false),
            Opcode::Constant => ConstantValue::Scalar {
                type_id,
                words: self.constant_words(id)?,
            },
            Opcode::ConstantComposite => ConstantValue::Composite {
                type_id,
                components: inst.id_operands().collect(),
            },
            Opcode::ConstantNull => ConstantValue::Null { type_id },
            _ => return None,
        };
        Some(value)
    }

    pub fn is_constant(&self, id: Id) -> bool {
        self.def_instruction(id)
            .is_some_and(|inst| inst.opcode.is_constant())
    }

    /// The uniform variable decorated with the given descriptor
    /// set and binding, if exactly one exists.
    pub fn find_uniform_variable(&self, descriptor_set: u32, binding: u32) -> Option<Id> {
        let mut candidates = self.globals.iter().filter(|inst| {
            inst.opcode == Opcode::Variable
                && inst.literal_operand(0) == Some(StorageClass::Uniform.to_literal())
                && inst.result_id.is_some_and(|id| {
                    self.decoration_value(id, Decoration::DescriptorSet) == Some(descriptor_set)
                        && self.decoration_value(id, Decoration::Binding) == Some(binding)
                })
        });
        let found = candidates.next()?;
        if candidates.next().is_some() {
            return None;
        }
        found.result_id
    }

    pub fn decoration_value(&self, id: Id, decoration: Decoration) -> Option<u32> {
        self.decorations_for(id)
            .find(|inst| inst.literal_operand(1) == Some(decoration.to_literal()))
            .and_then(|inst| inst.literal_operand(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;

    #[test]
    fn test_type_key_round_trip() {
        let key = TypeKey::Function {
            return_type: 1,
            params: vec![2, 3],
        };
        let inst = key.to_instruction(9);
        assert_eq!(inst.result_id, Some(9));
        assert_eq!(TypeKey::from_instruction(&inst), Some(key));
    }

    #[test]
    fn test_find_type_and_walk() {
        let mut builder = ModuleBuilder::new();
        let int = builder.type_int(32, true);
        let vec3 = builder.type_vector(int, 3);
        let float = builder.type_float(32);
        let strukt = builder.type_struct(&[vec3, float]);
        let module = builder.build();

        assert_eq!(module.find_type(&TypeKey::Int { width: 32, signed: true }), Some(int));
        assert_eq!(module.find_type(&TypeKey::Int { width: 32, signed: false }), None);
        assert_eq!(module.walk_composite_type_indices(strukt, &[0, 2]), Some(int));
        assert_eq!(module.walk_composite_type_indices(strukt, &[1]), Some(float));
        assert_eq!(module.walk_composite_type_indices(strukt, &[0, 3]), None);
        assert_eq!(module.walk_composite_type_indices(strukt, &[]), Some(strukt));
        assert_eq!(module.composite_member_count(vec3), Some(3));
        assert!(module.is_integer_type(vec3));
        assert!(!module.is_float_type(vec3));
    }

    #[test]
    fn test_constant_queries() {
        let mut builder = ModuleBuilder::new();
        let int = builder.type_int(32, true);
        let five = builder.constant(int, &[5]);
        let bool_ty = builder.type_bool();
        let yes = builder.constant_bool(bool_ty, true);
        let module = builder.build();

        assert_eq!(module.find_scalar_constant(int, &[5]), Some(five));
        assert_eq!(module.find_scalar_constant(int, &[6]), None);
        assert_eq!(module.find_bool_constant(true), Some(yes));
        assert_eq!(module.find_bool_constant(false), None);
        assert_eq!(module.int_constant_value(five), Some(5));
        assert_eq!(module.constant_value(yes), Some(ConstantValue::Bool(true)));
    }

    #[test]
    fn test_words_for_width() {
        assert_eq!(words_for_width(32), 1);
        assert_eq!(words_for_width(64), 2);
        assert_eq!(words_for_width(16), 1);
    }
}
