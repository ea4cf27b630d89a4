use super::{all_available_before, block_label, ensure_applicable, insertion_point, resolve_for_apply, Transform};
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::Result;
use morph_ir::{Id, Instruction, Module, Opcode, StorageClass};
use serde::{Deserialize, Serialize};

/// Pointee storage and type of `pointer`, unless the pointer is null or
/// undefined.
fn dereferenceable(module: &Module, pointer: Id) -> Option<(StorageClass, Id)> {
    let def = module.def_instruction(pointer)?;
    if matches!(def.opcode, Opcode::ConstantNull | Opcode::Undef) {
        return None;
    }
    module.pointee_type(def.result_type?)
}

/// Inserts `fresh_id = Load(pointer_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Load {
    pub fresh_id: Id,
    pub pointer_id: Id,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl Transform for Load {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) || dereferenceable(module, self.pointer_id).is_none() {
            return false;
        }
        insertion_point(module, &self.instruction_to_insert_before, Opcode::Load)
            .is_some_and(|position| all_available_before(module, position, &[self.pointer_id]))
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        let pointee = dereferenceable(module, self.pointer_id).map(|(_, ty)| ty).unwrap_or(0);
        module.insert_instruction(
            position,
            Instruction::value(Opcode::Load, pointee, self.fresh_id, &[self.pointer_id]),
        )?;
        module.update_id_bound(self.fresh_id);
        if facts.pointee_value_is_irrelevant(self.pointer_id) {
            facts.add_fact_id_is_irrelevant(self.fresh_id, module);
        }
        Ok(())
    }
}

/// Inserts `Store(pointer_id, value_id)`. Only legal in a dead block or
/// through a pointer whose pointee is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub pointer_id: Id,
    pub value_id: Id,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl Transform for Store {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        let Some((storage, pointee)) = dereferenceable(module, self.pointer_id) else {
            return false;
        };
        if storage.is_read_only() || module.type_of(self.value_id) != Some(pointee) {
            return false;
        }
        let Some(position) = insertion_point(module, &self.instruction_to_insert_before, Opcode::Store) else {
            return false;
        };
        let block_is_dead = block_label(module, position).is_some_and(|label| facts.block_is_dead(label));
        if !block_is_dead && !facts.pointee_value_is_irrelevant(self.pointer_id) {
            return false;
        }
        all_available_before(module, position, &[self.pointer_id, self.value_id])
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        module.insert_instruction(
            position,
            Instruction::new(Opcode::Store).with_id_operands([self.pointer_id, self.value_id]),
        )?;
        Ok(())
    }
}
