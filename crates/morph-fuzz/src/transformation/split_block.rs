use super::{ensure_applicable, resolve_for_apply, Transform};
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::Result;
use morph_ir::{BasicBlock, Id, Instruction, Module, Opcode, Operand};
use serde::{Deserialize, Serialize};

/// Splits a block in two before the described instruction. The first half
/// keeps the label and ends with a branch to `fresh_id`, which labels the
/// second half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBlock {
    pub instruction_to_split_before: InstructionDescriptor,
    pub fresh_id: Id,
}

impl Transform for SplitBlock {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) {
            return false;
        }
        let Some(position) = self.instruction_to_split_before.resolve(module) else {
            return false;
        };
        let Some(block) = module.block_at(position.function, position.block) else {
            return false;
        };
        if block.is_loop_header() {
            return false;
        }
        let split_before = &block.instructions[position.index];
        if matches!(split_before.opcode, Opcode::Phi | Opcode::Variable) {
            return false;
        }
        position.index == 0 || !block.instructions[position.index - 1].opcode.is_merge()
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_split_before, module)?;
        let function = &mut module.functions[position.function];
        let original = function.blocks[position.block].label;
        let tail = function.blocks[position.block].instructions.split_off(position.index);
        function.blocks[position.block]
            .instructions
            .push(Instruction::branch(self.fresh_id));
        function
            .blocks
            .insert(position.block + 1, BasicBlock::with_instructions(self.fresh_id, tail));

        // Every edge that left the original block now leaves the new one.
        for block in &mut function.blocks {
            for phi in block.instructions.iter_mut().take_while(|inst| inst.opcode == Opcode::Phi) {
                for pair in phi.operands.chunks_mut(2) {
                    if pair.get(1) == Some(&Operand::Id(original)) {
                        pair[1] = Operand::Id(self.fresh_id);
                    }
                }
            }
        }

        module.update_id_bound(self.fresh_id);
        if facts.block_is_dead(original) {
            facts.add_fact_block_is_dead(self.fresh_id, module);
        }
        Ok(())
    }
}
