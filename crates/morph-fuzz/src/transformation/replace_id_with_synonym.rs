use super::{ensure_applicable, Transform};
use crate::descriptor::{DataDescriptor, IdUseDescriptor};
use crate::fact_manager::FactManager;
use crate::util::id_is_available_at_use;
use morph_core::{Error, Result};
use morph_ir::{DominatorAnalysis, Id, Instruction, Module, Opcode, Operand};
use serde::{Deserialize, Serialize};

/// Returns true if operand `operand_index` of `inst` may hold a different
/// id of the same type and value. Labels, callees, variable initializers,
/// access chain indices and pointer arguments of calls must stay as they
/// are.
pub(crate) fn use_can_be_replaced(module: &Module, inst: &Instruction, operand_index: usize) -> bool {
    if inst.opcode.is_label_operand(operand_index) {
        return false;
    }
    let Some(id) = inst.id_operand(operand_index) else {
        return false;
    };
    match inst.opcode {
        Opcode::Variable => false,
        Opcode::AccessChain => operand_index == 0,
        Opcode::FunctionCall => {
            operand_index > 0 && module.type_of(id).is_some_and(|ty| !module.is_pointer_type(ty))
        }
        Opcode::SelectionMerge | Opcode::LoopMerge | Opcode::Branch => false,
        _ => true,
    }
}

/// Replaces one use of an id with a known synonym of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceIdWithSynonym {
    pub id_use_descriptor: IdUseDescriptor,
    pub synonymous_id: Id,
}

impl Transform for ReplaceIdWithSynonym {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        let id = self.id_use_descriptor.id_of_interest;
        if id == self.synonymous_id
            || !facts.is_synonymous(&DataDescriptor::of(id), &DataDescriptor::of(self.synonymous_id))
        {
            return false;
        }
        if module.type_of(id).is_none() || module.type_of(id) != module.type_of(self.synonymous_id) {
            return false;
        }
        let Some(position) = self.id_use_descriptor.resolve(module) else {
            return false;
        };
        let Some(inst) = module.instruction_at(position) else {
            return false;
        };
        let operand_index = self.id_use_descriptor.in_operand_index as usize;
        if !use_can_be_replaced(module, inst, operand_index) {
            return false;
        }
        let dominators = DominatorAnalysis::new(&module.functions[position.function]);
        id_is_available_at_use(module, &dominators, position, operand_index, self.synonymous_id)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = self
            .id_use_descriptor
            .resolve(module)
            .ok_or_else(|| Error::invariant("id use no longer resolves"))?;
        let inst = module
            .instruction_at_mut(position)
            .ok_or_else(|| Error::invariant("id use no longer resolves"))?;
        inst.operands[self.id_use_descriptor.in_operand_index as usize] = Operand::Id(self.synonymous_id);
        Ok(())
    }
}
