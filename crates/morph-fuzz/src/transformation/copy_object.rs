use super::{all_available_before, ensure_applicable, insertion_point, resolve_for_apply, Transform};
use crate::descriptor::{DataDescriptor, InstructionDescriptor};
use crate::fact_manager::FactManager;
use crate::util::can_make_synonym_of;
use morph_core::Result;
use morph_ir::{Id, Instruction, Module, Opcode};
use serde::{Deserialize, Serialize};

/// Inserts `fresh_id = CopyObject(object)`, which is synonymous with
/// `object` (or irrelevant, if `object` is).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyObject {
    pub fresh_id: Id,
    pub object: Id,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl Transform for CopyObject {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) {
            return false;
        }
        if !module
            .def_instruction(self.object)
            .is_some_and(|inst| can_make_synonym_of(module, inst))
        {
            return false;
        }
        insertion_point(module, &self.instruction_to_insert_before, Opcode::CopyObject)
            .is_some_and(|position| all_available_before(module, position, &[self.object]))
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        let ty = module.type_of(self.object).unwrap_or(0);
        module.insert_instruction(
            position,
            Instruction::value(Opcode::CopyObject, ty, self.fresh_id, &[self.object]),
        )?;
        module.update_id_bound(self.fresh_id);
        if facts.id_is_irrelevant(self.object) {
            facts.add_fact_id_is_irrelevant(self.fresh_id, module);
        } else {
            facts.add_fact_data_synonym(&DataDescriptor::of(self.fresh_id), &DataDescriptor::of(self.object), module);
        }
        if facts.pointee_value_is_irrelevant(self.object) {
            facts.add_fact_value_of_pointee_is_irrelevant(self.fresh_id, module);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::make_instruction_descriptor;
    use morph_ir::{samples, StructuralValidator, Validator};

    #[test]
    fn test_copy_records_synonym() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let main = module.functions.len() - 1;
        let block = &module.functions[main].blocks[0];
        let x = block.instructions[1].result_id.unwrap();
        let t = CopyObject {
            fresh_id: module.id_bound,
            object: x,
            instruction_to_insert_before: make_instruction_descriptor(block, 3).unwrap(),
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        assert!(facts.is_synonymous(&DataDescriptor::of(x), &DataDescriptor::of(t.fresh_id)));
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_copy_of_irrelevant_is_irrelevant() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let main = module.functions.len() - 1;
        let block = &module.functions[main].blocks[0];
        let y = block.instructions[2].result_id.unwrap();
        let before = make_instruction_descriptor(block, 3).unwrap();
        assert!(facts.add_fact_id_is_irrelevant(y, &module));
        let t = CopyObject {
            fresh_id: module.id_bound,
            object: y,
            instruction_to_insert_before: before,
        };
        t.apply(&mut module, &mut facts).unwrap();
        assert!(facts.id_is_irrelevant(t.fresh_id));
        assert!(facts.synonyms_for_id(t.fresh_id).is_empty());
    }

    #[test]
    fn test_cannot_copy_type_or_label() {
        let module = samples::arithmetic_module();
        let facts = FactManager::new();
        let main = module.functions.len() - 1;
        let block = &module.functions[main].blocks[0];
        let before = make_instruction_descriptor(block, 3).unwrap();
        let int = block.instructions[1].result_type.unwrap();
        for object in [int, block.label] {
            let t = CopyObject {
                fresh_id: module.id_bound,
                object,
                instruction_to_insert_before: before.clone(),
            };
            assert!(!t.is_applicable(&module, &facts));
        }
    }
}
