use super::{ensure_applicable, Transform};
use crate::fact_manager::FactManager;
use crate::util::is_merge_or_continue_target;
use morph_core::{Error, Result};
use morph_ir::{BasicBlock, DominatorAnalysis, Id, Instruction, Module, Opcode, Operand};
use serde::{Deserialize, Serialize};

/// Turns the unconditional branch ending `existing_block` into a selection
/// on a boolean constant. The branch that is never taken leads to a new
/// block `fresh_id`, which is recorded as dead and jumps to the original
/// successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDeadBlock {
    pub fresh_id: Id,
    pub existing_block: Id,
    pub condition_value: bool,
}

impl AddDeadBlock {
    fn successor(&self, module: &Module) -> Option<(usize, usize, Id)> {
        let (function, block) = module.find_block(self.existing_block)?;
        let existing = module.block_at(function, block)?;
        let terminator = existing.terminator()?;
        if terminator.opcode != Opcode::Branch || existing.merge_instruction().is_some() {
            return None;
        }
        Some((function, block, terminator.id_operand(0)?))
    }
}

impl Transform for AddDeadBlock {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) || module.find_bool_constant(self.condition_value).is_none() {
            return false;
        }
        let Some((function, _, successor)) = self.successor(module) else {
            return false;
        };
        let f = &module.functions[function];
        match f.block(successor) {
            Some(block) if !block.is_loop_header() => {}
            _ => return false,
        }
        if is_merge_or_continue_target(module, function, successor) {
            return false;
        }
        let dominators = DominatorAnalysis::new(f);
        dominators.is_reachable(self.existing_block) && !dominators.is_back_edge(self.existing_block, successor)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let (function, block, successor) = self
            .successor(module)
            .ok_or_else(|| Error::invariant(format!("block {} has no plain successor", self.existing_block)))?;
        let condition = module
            .find_bool_constant(self.condition_value)
            .ok_or_else(|| Error::invariant("boolean constant vanished"))?;
        let (if_true, if_false) = if self.condition_value {
            (successor, self.fresh_id)
        } else {
            (self.fresh_id, successor)
        };

        let f = &mut module.functions[function];
        let existing = &mut f.blocks[block];
        existing.instructions.pop();
        existing.instructions.push(Instruction::selection_merge(successor, 0));
        existing
            .instructions
            .push(Instruction::branch_conditional(condition, if_true, if_false));
        f.blocks.insert(
            block + 1,
            BasicBlock::with_instructions(self.fresh_id, vec![Instruction::branch(successor)]),
        );

        // The dead block is a new predecessor of the successor; its phis
        // take the same values as along the existing edge.
        if let Some(target) = f.block_mut(successor) {
            for phi in target.instructions.iter_mut().take_while(|inst| inst.opcode == Opcode::Phi) {
                let incoming = phi
                    .operands
                    .chunks(2)
                    .find(|pair| pair.get(1) == Some(&Operand::Id(self.existing_block)))
                    .and_then(|pair| pair.first().cloned());
                if let Some(value) = incoming {
                    phi.operands.push(value);
                    phi.operands.push(Operand::Id(self.fresh_id));
                }
            }
        }

        module.update_id_bound(self.fresh_id);
        facts.add_fact_block_is_dead(self.fresh_id, module);
        Ok(())
    }
}
