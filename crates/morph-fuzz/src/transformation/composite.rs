//! Building composites out of available values and taking them apart.

use super::add_constant::record_member_synonyms;
use super::{all_available_before, ensure_applicable, insertion_point, resolve_for_apply, Transform};
use crate::descriptor::{DataDescriptor, InstructionDescriptor};
use crate::fact_manager::FactManager;
use crate::util::can_make_synonym_of;
use morph_core::Result;
use morph_ir::{check_composite_components, Id, Instruction, Module, Opcode, Operand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeConstruct {
    pub fresh_id: Id,
    pub composite_type_id: Id,
    pub component_ids: Vec<Id>,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl Transform for CompositeConstruct {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) || !module.is_composite_type(self.composite_type_id) {
            return false;
        }
        let usable = self.component_ids.iter().all(|id| {
            module
                .def_instruction(*id)
                .is_some_and(|inst| can_make_synonym_of(module, inst))
        });
        if !usable || check_composite_components(module, self.composite_type_id, &self.component_ids).is_err() {
            return false;
        }
        insertion_point(module, &self.instruction_to_insert_before, Opcode::CompositeConstruct)
            .is_some_and(|position| all_available_before(module, position, &self.component_ids))
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        module.insert_instruction(
            position,
            Instruction::value(
                Opcode::CompositeConstruct,
                self.composite_type_id,
                self.fresh_id,
                &self.component_ids,
            ),
        )?;
        module.update_id_bound(self.fresh_id);
        record_member_synonyms(module, facts, self.fresh_id, &self.component_ids);
        Ok(())
    }
}

/// Inserts `fresh_id = CompositeExtract(composite, index...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeExtract {
    pub fresh_id: Id,
    pub composite_id: Id,
    pub index: Vec<u32>,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl CompositeExtract {
    fn result_type(&self, module: &Module) -> Option<Id> {
        if self.index.is_empty() {
            return None;
        }
        DataDescriptor::new(self.composite_id, self.index.clone()).type_in(module)
    }
}

impl Transform for CompositeExtract {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) || self.result_type(module).is_none() {
            return false;
        }
        if !module
            .def_instruction(self.composite_id)
            .is_some_and(|inst| can_make_synonym_of(module, inst))
        {
            return false;
        }
        insertion_point(module, &self.instruction_to_insert_before, Opcode::CompositeExtract)
            .is_some_and(|position| all_available_before(module, position, &[self.composite_id]))
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        let ty = self.result_type(module).unwrap_or(0);
        let mut inst = Instruction::value(Opcode::CompositeExtract, ty, self.fresh_id, &[self.composite_id]);
        for index in &self.index {
            inst = inst.with_operand(Operand::Literal(*index));
        }
        module.insert_instruction(position, inst)?;
        module.update_id_bound(self.fresh_id);
        if facts.id_is_irrelevant(self.composite_id) {
            facts.add_fact_id_is_irrelevant(self.fresh_id, module);
        } else {
            facts.add_fact_data_synonym(
                &DataDescriptor::of(self.fresh_id),
                &DataDescriptor::new(self.composite_id, self.index.clone()),
                module,
            );
        }
        Ok(())
    }
}
