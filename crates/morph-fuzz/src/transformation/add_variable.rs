use super::{ensure_applicable, Transform};
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use morph_ir::{Id, Instruction, InstructionPosition, Module, Opcode, Operand, StorageClass};
use serde::{Deserialize, Serialize};

fn initializer_matches(module: &Module, pointee: Id, initializer: Option<Id>) -> bool {
    match initializer {
        None => true,
        Some(id) => module.is_constant(id) && module.type_of(id) == Some(pointee),
    }
}

fn variable(type_id: Id, fresh_id: Id, storage: StorageClass, initializer: Option<Id>) -> Instruction {
    let mut inst = Instruction::new(Opcode::Variable)
        .with_result_type(type_id)
        .with_result_id(fresh_id)
        .with_operand(Operand::Literal(storage.to_literal()));
    if let Some(init) = initializer {
        inst = inst.with_operand(Operand::Id(init));
    }
    inst
}

/// Adds a private global variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddGlobalVariable {
    pub fresh_id: Id,
    pub type_id: Id,
    pub initializer_id: Option<Id>,
    pub value_is_irrelevant: bool,
}

impl Transform for AddGlobalVariable {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) {
            return false;
        }
        match module.pointee_type(self.type_id) {
            Some((StorageClass::Private, pointee)) => initializer_matches(module, pointee, self.initializer_id),
            _ => false,
        }
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        module.globals.push(variable(
            self.type_id,
            self.fresh_id,
            StorageClass::Private,
            self.initializer_id,
        ));
        module.update_id_bound(self.fresh_id);
        if self.value_is_irrelevant {
            facts.add_fact_value_of_pointee_is_irrelevant(self.fresh_id, module);
        }
        Ok(())
    }
}

/// Adds a function-storage variable at the start of a function's entry
/// block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLocalVariable {
    pub fresh_id: Id,
    pub type_id: Id,
    pub function_id: Id,
    pub initializer_id: Option<Id>,
    pub value_is_irrelevant: bool,
}

impl Transform for AddLocalVariable {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) {
            return false;
        }
        if module.function(self.function_id).and_then(|f| f.entry_block()).is_none() {
            return false;
        }
        match module.pointee_type(self.type_id) {
            Some((StorageClass::Function, pointee)) => initializer_matches(module, pointee, self.initializer_id),
            _ => false,
        }
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let function = module
            .function_index(self.function_id)
            .ok_or_else(|| Error::invariant(format!("function {} vanished", self.function_id)))?;
        module.insert_instruction(
            InstructionPosition {
                function,
                block: 0,
                index: 0,
            },
            variable(
                self.type_id,
                self.fresh_id,
                StorageClass::Function,
                self.initializer_id,
            ),
        )?;
        module.update_id_bound(self.fresh_id);
        if self.value_is_irrelevant {
            facts.add_fact_value_of_pointee_is_irrelevant(self.fresh_id, module);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{samples, StructuralValidator, TypeKey, Validator};

    fn int_pointer(module: &Module, storage: StorageClass) -> Id {
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
        module.find_pointer_type(storage, int).unwrap()
    }

    #[test]
    fn test_add_global_with_irrelevant_pointee() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let t = AddGlobalVariable {
            fresh_id: module.id_bound,
            type_id: int_pointer(&module, StorageClass::Private),
            initializer_id: None,
            value_is_irrelevant: true,
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        assert!(facts.pointee_value_is_irrelevant(t.fresh_id));
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_global_rejects_function_storage() {
        let module = samples::arithmetic_module();
        let t = AddGlobalVariable {
            fresh_id: module.id_bound,
            type_id: int_pointer(&module, StorageClass::Function),
            initializer_id: None,
            value_is_irrelevant: false,
        };
        assert!(!t.is_applicable(&module, &FactManager::new()));
    }

    #[test]
    fn test_add_local_goes_first_in_entry_block() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let main = module.entry_points[0].function_id;
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
        let zero = module.find_scalar_constant(int, &[0]).unwrap();
        let t = AddLocalVariable {
            fresh_id: module.id_bound,
            type_id: int_pointer(&module, StorageClass::Function),
            function_id: main,
            initializer_id: Some(zero),
            value_is_irrelevant: false,
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        let entry = module.function(main).unwrap().entry_block().unwrap();
        assert_eq!(entry.instructions[0].result_id, Some(t.fresh_id));
        assert!(!facts.pointee_value_is_irrelevant(t.fresh_id));
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_local_initializer_must_match_pointee() {
        let module = samples::arithmetic_module();
        let main = module.entry_points[0].function_id;
        let t = AddLocalVariable {
            fresh_id: module.id_bound,
            type_id: int_pointer(&module, StorageClass::Function),
            function_id: main,
            initializer_id: module.find_bool_constant(true),
            value_is_irrelevant: false,
        };
        assert!(!t.is_applicable(&module, &FactManager::new()));
    }
}
