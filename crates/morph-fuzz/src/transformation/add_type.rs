//! Type declarations. A type is only added if no equal type exists, so
//! the module never holds two ids for the same type.

use super::{ensure_applicable, Transform};
use crate::fact_manager::FactManager;
use morph_core::Result;
use morph_ir::{type_is_well_formed, Id, Module, StorageClass, TypeKey};
use serde::{Deserialize, Serialize};

fn can_declare(module: &Module, fresh_id: Id, key: &TypeKey) -> bool {
    module.is_fresh_id(fresh_id) && type_is_well_formed(module, key) && module.find_type(key).is_none()
}

fn declare(module: &mut Module, fresh_id: Id, key: &TypeKey) {
    module.globals.push(key.to_instruction(fresh_id));
    module.update_id_bound(fresh_id);
}

macro_rules! type_transform {
    ($kind:ident) => {
        impl Transform for $kind {
            fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
                can_declare(module, self.fresh_id, &self.key())
            }

            fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
                ensure_applicable(self, module, facts)?;
                declare(module, self.fresh_id, &self.key());
                Ok(())
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeBoolean {
    pub fresh_id: Id,
}

impl AddTypeBoolean {
    fn key(&self) -> TypeKey {
        TypeKey::Bool
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeInt {
    pub fresh_id: Id,
    pub width: u32,
    pub is_signed: bool,
}

impl AddTypeInt {
    fn key(&self) -> TypeKey {
        TypeKey::Int {
            width: self.width,
            signed: self.is_signed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeFloat {
    pub fresh_id: Id,
    pub width: u32,
}

impl AddTypeFloat {
    fn key(&self) -> TypeKey {
        TypeKey::Float { width: self.width }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeVector {
    pub fresh_id: Id,
    pub component_type_id: Id,
    pub component_count: u32,
}

impl AddTypeVector {
    fn key(&self) -> TypeKey {
        TypeKey::Vector {
            component: self.component_type_id,
            count: self.component_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeStruct {
    pub fresh_id: Id,
    pub member_type_ids: Vec<Id>,
}

impl AddTypeStruct {
    fn key(&self) -> TypeKey {
        TypeKey::Struct {
            members: self.member_type_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypePointer {
    pub fresh_id: Id,
    pub storage_class: StorageClass,
    pub base_type_id: Id,
}

impl AddTypePointer {
    fn key(&self) -> TypeKey {
        TypeKey::Pointer {
            storage: self.storage_class,
            pointee: self.base_type_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeFunction {
    pub fresh_id: Id,
    pub return_type_id: Id,
    pub argument_type_ids: Vec<Id>,
}

impl AddTypeFunction {
    fn key(&self) -> TypeKey {
        TypeKey::Function {
            return_type: self.return_type_id,
            params: self.argument_type_ids.clone(),
        }
    }
}

type_transform!(AddTypeBoolean);
type_transform!(AddTypeInt);
type_transform!(AddTypeFloat);
type_transform!(AddTypeVector);
type_transform!(AddTypeStruct);
type_transform!(AddTypePointer);
type_transform!(AddTypeFunction);

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{ModuleBuilder, StructuralValidator, Validator};

    fn empty_module() -> Module {
        let mut builder = ModuleBuilder::new();
        let void = builder.type_void();
        let fn_ty = builder.type_function(void, &[]);
        let main = builder.begin_function(void, fn_ty);
        builder.block();
        builder.emit(morph_ir::Instruction::return_void());
        builder.end_function();
        builder.entry_point("main", main);
        builder.build()
    }

    #[test]
    fn test_add_int_then_vector() {
        let mut module = empty_module();
        let mut facts = FactManager::new();
        let int = module.id_bound;
        let add_int = AddTypeInt {
            fresh_id: int,
            width: 32,
            is_signed: true,
        };
        assert!(add_int.is_applicable(&module, &facts));
        add_int.apply(&mut module, &mut facts).unwrap();
        assert!(!add_int.is_applicable(&module, &facts));

        let add_vector = AddTypeVector {
            fresh_id: int + 1,
            component_type_id: int,
            component_count: 3,
        };
        assert!(add_vector.is_applicable(&module, &facts));
        add_vector.apply(&mut module, &mut facts).unwrap();
        assert_eq!(module.id_bound, int + 2);
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_rejects_duplicates_and_bad_widths() {
        let module = empty_module();
        let facts = FactManager::new();
        let fresh = module.id_bound;
        let void_fn = module.find_type(&TypeKey::Function {
            return_type: module.find_type(&TypeKey::Void).unwrap(),
            params: vec![],
        });
        let duplicate = AddTypeFunction {
            fresh_id: fresh,
            return_type_id: module.find_type(&TypeKey::Void).unwrap(),
            argument_type_ids: vec![],
        };
        assert!(void_fn.is_some());
        assert!(!duplicate.is_applicable(&module, &facts));
        let bad = AddTypeFloat {
            fresh_id: fresh,
            width: 24,
        };
        assert!(!bad.is_applicable(&module, &facts));
    }

    #[test]
    fn test_pointer_needs_value_pointee() {
        let module = empty_module();
        let facts = FactManager::new();
        let void = module.find_type(&TypeKey::Void).unwrap();
        let pointer = AddTypePointer {
            fresh_id: module.id_bound,
            storage_class: StorageClass::Private,
            base_type_id: void,
        };
        assert!(!pointer.is_applicable(&module, &facts));
    }

    #[test]
    fn test_apply_without_holding_is_an_error() {
        let mut module = empty_module();
        let mut facts = FactManager::new();
        let used = module.id_bound - 1;
        let add = AddTypeBoolean { fresh_id: used };
        assert!(add.apply(&mut module, &mut facts).is_err());
    }
}
