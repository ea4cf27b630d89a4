//! Find-or-create helpers. Each looks for an existing declaration first
//! and only applies a declaring transformation when none exists, so
//! fuzzing never introduces duplicate declarations of its own.

use super::PassContext;
use crate::transformation::{
    AddConstantBoolean, AddConstantComposite, AddConstantScalar, AddGlobalVariable, AddLocalVariable, AddTypeBoolean,
    AddTypeFloat, AddTypeFunction, AddTypeInt, AddTypePointer, AddTypeStruct, AddTypeVector, Transformation,
};
use crate::util::zero_words;
use morph_core::{Error, Result};
use morph_ir::{words_for_width, Id, Opcode, StorageClass, TypeKey};

impl PassContext<'_> {
    /// Returns `None` when the type neither exists nor can be declared by
    /// a transformation (void, arrays, ill-formed keys).
    pub fn find_or_create_type(&mut self, key: TypeKey) -> Result<Option<Id>> {
        if let Some(id) = self.module.find_type(&key) {
            return Ok(Some(id));
        }
        if !morph_ir::type_is_well_formed(self.module, &key) {
            return Ok(None);
        }
        let fresh_id = self.context.fresh_id();
        let transformation: Transformation = match key {
            TypeKey::Bool => AddTypeBoolean { fresh_id }.into(),
            TypeKey::Int { width, signed } => AddTypeInt {
                fresh_id,
                width,
                is_signed: signed,
            }
            .into(),
            TypeKey::Float { width } => AddTypeFloat { fresh_id, width }.into(),
            TypeKey::Vector { component, count } => AddTypeVector {
                fresh_id,
                component_type_id: component,
                component_count: count,
            }
            .into(),
            TypeKey::Struct { members } => AddTypeStruct {
                fresh_id,
                member_type_ids: members,
            }
            .into(),
            TypeKey::Pointer { storage, pointee } => AddTypePointer {
                fresh_id,
                storage_class: storage,
                base_type_id: pointee,
            }
            .into(),
            TypeKey::Function { return_type, params } => AddTypeFunction {
                fresh_id,
                return_type_id: return_type,
                argument_type_ids: params,
            }
            .into(),
            TypeKey::Void | TypeKey::Array { .. } => return Ok(None),
        };
        self.apply_transformation(transformation)?;
        Ok(Some(fresh_id))
    }

    fn find_or_create_required_type(&mut self, key: TypeKey) -> Result<Id> {
        let description = format!("{:?}", key);
        self.find_or_create_type(key)?
            .ok_or_else(|| Error::invariant(format!("cannot declare type {}", description)))
    }

    pub fn find_or_create_bool_type(&mut self) -> Result<Id> {
        self.find_or_create_required_type(TypeKey::Bool)
    }

    pub fn find_or_create_int_type(&mut self, width: u32, signed: bool) -> Result<Id> {
        self.find_or_create_required_type(TypeKey::Int { width, signed })
    }

    pub fn find_or_create_float_type(&mut self, width: u32) -> Result<Id> {
        self.find_or_create_required_type(TypeKey::Float { width })
    }

    /// `pointee` must be a value type.
    pub fn find_or_create_pointer_type(&mut self, storage: StorageClass, pointee: Id) -> Result<Id> {
        self.find_or_create_required_type(TypeKey::Pointer { storage, pointee })
    }

    pub fn find_or_create_function_type(&mut self, return_type: Id, params: Vec<Id>) -> Result<Id> {
        self.find_or_create_required_type(TypeKey::Function { return_type, params })
    }

    pub fn find_or_create_bool_constant(&mut self, value: bool) -> Result<Id> {
        if let Some(id) = self.module.find_bool_constant(value) {
            return Ok(id);
        }
        self.find_or_create_bool_type()?;
        let fresh_id = self.context.fresh_id();
        self.apply_transformation(AddConstantBoolean {
            fresh_id,
            is_true: value,
        })?;
        Ok(fresh_id)
    }

    pub fn find_or_create_scalar_constant(&mut self, type_id: Id, words: Vec<u32>) -> Result<Id> {
        if let Some(id) = self.module.find_scalar_constant(type_id, &words) {
            return Ok(id);
        }
        let fresh_id = self.context.fresh_id();
        self.apply_transformation(AddConstantScalar {
            fresh_id,
            type_id,
            words,
        })?;
        Ok(fresh_id)
    }

    /// A signed or unsigned integer constant; 64-bit values are zero
    /// extended.
    pub fn find_or_create_int_constant(&mut self, width: u32, signed: bool, value: u32) -> Result<Id> {
        let type_id = self.find_or_create_int_type(width, signed)?;
        let mut words = vec![0; words_for_width(width)];
        words[0] = value;
        self.find_or_create_scalar_constant(type_id, words)
    }

    pub fn find_or_create_composite_constant(&mut self, type_id: Id, constituent_ids: Vec<Id>) -> Result<Id> {
        if let Some(id) = self.module.find_composite_constant(type_id, &constituent_ids) {
            return Ok(id);
        }
        let fresh_id = self.context.fresh_id();
        self.apply_transformation(AddConstantComposite {
            fresh_id,
            type_id,
            constituent_ids,
        })?;
        Ok(fresh_id)
    }

    /// The zero value of a scalar or composite type: `false`, numeric
    /// zero, or a composite of zeros. `None` for other types.
    pub fn find_or_create_zero_constant(&mut self, type_id: Id) -> Result<Option<Id>> {
        let Some(key) = self.module.type_key(type_id) else {
            return Ok(None);
        };
        let id = match key {
            TypeKey::Bool => self.find_or_create_bool_constant(false)?,
            TypeKey::Int { .. } | TypeKey::Float { .. } => {
                let words = zero_words(self.module, type_id).unwrap_or_default();
                self.find_or_create_scalar_constant(type_id, words)?
            }
            TypeKey::Vector { component, count } => {
                let Some(zero) = self.find_or_create_zero_constant(component)? else {
                    return Ok(None);
                };
                self.find_or_create_composite_constant(type_id, vec![zero; count as usize])?
            }
            TypeKey::Array { element, length } => {
                let Some(zero) = self.find_or_create_zero_constant(element)? else {
                    return Ok(None);
                };
                self.find_or_create_composite_constant(type_id, vec![zero; length as usize])?
            }
            TypeKey::Struct { members } => {
                let mut zeros = Vec::with_capacity(members.len());
                for member in members {
                    let Some(zero) = self.find_or_create_zero_constant(member)? else {
                        return Ok(None);
                    };
                    zeros.push(zero);
                }
                self.find_or_create_composite_constant(type_id, zeros)?
            }
            TypeKey::Void | TypeKey::Pointer { .. } | TypeKey::Function { .. } => return Ok(None),
        };
        Ok(Some(id))
    }

    /// A private global of type `pointee` whose value is irrelevant,
    /// declared with a zero initializer if none exists.
    pub fn find_or_create_global_variable(&mut self, pointee: Id) -> Result<Option<Id>> {
        let Some(pointer_type) = self.find_or_create_type(TypeKey::Pointer {
            storage: StorageClass::Private,
            pointee,
        })?
        else {
            return Ok(None);
        };
        let existing = self.module.globals.iter().find(|inst| {
            inst.opcode == Opcode::Variable
                && inst.result_type == Some(pointer_type)
                && inst
                    .result_id
                    .is_some_and(|id| self.facts.pointee_value_is_irrelevant(id))
        });
        if let Some(id) = existing.and_then(|inst| inst.result_id) {
            return Ok(Some(id));
        }
        let Some(zero) = self.find_or_create_zero_constant(pointee)? else {
            return Ok(None);
        };
        let fresh_id = self.context.fresh_id();
        self.apply_transformation(AddGlobalVariable {
            fresh_id,
            type_id: pointer_type,
            initializer_id: Some(zero),
            value_is_irrelevant: true,
        })?;
        Ok(Some(fresh_id))
    }

    /// A local variable of `function_id` holding a `pointee` whose value is
    /// irrelevant.
    pub fn find_or_create_local_variable(&mut self, function_id: Id, pointee: Id) -> Result<Option<Id>> {
        let Some(pointer_type) = self.find_or_create_type(TypeKey::Pointer {
            storage: StorageClass::Function,
            pointee,
        })?
        else {
            return Ok(None);
        };
        let existing = self.module.function(function_id).and_then(|function| {
            function
                .entry_block()?
                .instructions
                .iter()
                .take_while(|inst| inst.opcode == Opcode::Variable)
                .filter(|inst| inst.result_type == Some(pointer_type))
                .filter_map(|inst| inst.result_id)
                .find(|id| self.facts.pointee_value_is_irrelevant(*id))
        });
        if existing.is_some() {
            return Ok(existing);
        }
        let Some(zero) = self.find_or_create_zero_constant(pointee)? else {
            return Ok(None);
        };
        let fresh_id = self.context.fresh_id();
        self.apply_transformation(AddLocalVariable {
            fresh_id,
            type_id: pointer_type,
            function_id,
            initializer_id: Some(zero),
            value_is_irrelevant: true,
        })?;
        Ok(Some(fresh_id))
    }
}
