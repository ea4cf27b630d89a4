use super::{all_available_before, block_label, ensure_applicable, insertion_point, resolve_for_apply, Transform};
use crate::call_graph::CallGraph;
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::Result;
use morph_ir::{Id, Instruction, Module, Opcode};
use serde::{Deserialize, Serialize};

/// Inserts a call. From live code only livesafe functions may be called,
/// and pointer arguments must be variables whose pointee is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub fresh_id: Id,
    pub callee_id: Id,
    pub argument_ids: Vec<Id>,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl Transform for FunctionCall {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) || module.is_entry_point(self.callee_id) {
            return false;
        }
        let Some(callee) = module.function(self.callee_id) else {
            return false;
        };
        let Some(position) = insertion_point(module, &self.instruction_to_insert_before, Opcode::FunctionCall) else {
            return false;
        };
        let caller = module.functions[position.function].id();
        if CallGraph::new(module).call_would_recurse(caller, self.callee_id) {
            return false;
        }
        let block_is_dead = block_label(module, position).is_some_and(|label| facts.block_is_dead(label));
        if !block_is_dead && !facts.function_is_livesafe(self.callee_id) {
            return false;
        }
        if callee.params.len() != self.argument_ids.len() {
            return false;
        }
        for (param, arg) in callee.params.iter().zip(&self.argument_ids) {
            let Some(arg_type) = module.type_of(*arg) else {
                return false;
            };
            if param.result_type != Some(arg_type) {
                return false;
            }
            if module.is_pointer_type(arg_type) {
                let is_variable_or_param = module
                    .def_instruction(*arg)
                    .is_some_and(|inst| matches!(inst.opcode, Opcode::Variable | Opcode::FunctionParameter));
                if !is_variable_or_param || (!block_is_dead && !facts.pointee_value_is_irrelevant(*arg)) {
                    return false;
                }
            }
        }
        all_available_before(module, position, &self.argument_ids)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        let return_type = module.function(self.callee_id).map(|f| f.return_type()).unwrap_or(0);
        let mut operands = vec![self.callee_id];
        operands.extend(&self.argument_ids);
        module.insert_instruction(
            position,
            Instruction::value(Opcode::FunctionCall, return_type, self.fresh_id, &operands),
        )?;
        module.update_id_bound(self.fresh_id);
        Ok(())
    }
}
