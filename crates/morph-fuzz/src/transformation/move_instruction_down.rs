use super::{ensure_applicable, resolve_for_apply, Transform};
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use morph_ir::{Instruction, Module, Opcode};
use serde::{Deserialize, Serialize};

/// Swaps an instruction with the one following it in the same block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInstructionDown {
    pub instruction: InstructionDescriptor,
}

fn is_movable(inst: &Instruction) -> bool {
    !(inst.opcode.is_terminator() || inst.opcode.is_merge() || matches!(inst.opcode, Opcode::Phi | Opcode::Variable))
}

impl Transform for MoveInstructionDown {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        let Some(position) = self.instruction.resolve(module) else {
            return false;
        };
        let Some(block) = module.block_at(position.function, position.block) else {
            return false;
        };
        let (Some(inst), Some(next)) = (
            block.instructions.get(position.index),
            block.instructions.get(position.index + 1),
        ) else {
            return false;
        };
        if !is_movable(inst) || !is_movable(next) {
            return false;
        }
        if inst.opcode.accesses_memory() && next.opcode.accesses_memory() {
            return false;
        }
        inst.result_id.map_or(true, |id| !next.references(id))
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction, module)?;
        let block = module
            .functions
            .get_mut(position.function)
            .and_then(|f| f.blocks.get_mut(position.block))
            .ok_or_else(|| Error::invariant("block vanished"))?;
        block.instructions.swap(position.index, position.index + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::make_instruction_descriptor;
    use morph_ir::{samples, StructuralValidator, Validator};

    #[test]
    fn test_move_independent_instruction() {
        let mut module = samples::uniform_module();
        let mut facts = FactManager::new();
        let block = &module.functions[0].blocks[0];
        // scaled = IMul(a, 7) followed by Store(local, scaled): dependent.
        let scaled = make_instruction_descriptor(block, 3).unwrap();
        let dependent = MoveInstructionDown { instruction: scaled };
        assert!(!dependent.is_applicable(&module, &facts));

        // Store(local, a) followed by scaled = IMul(a, 7): independent.
        let store = make_instruction_descriptor(block, 2).unwrap();
        let t = MoveInstructionDown { instruction: store };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        assert_eq!(module.functions[0].blocks[0].instructions[2].opcode, Opcode::IMul);
        assert_eq!(module.functions[0].blocks[0].instructions[3].opcode, Opcode::Store);
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_never_moves_past_terminator() {
        let module = samples::uniform_module();
        let block = &module.functions[0].blocks[0];
        let fmul = make_instruction_descriptor(block, block.len() - 2).unwrap();
        let t = MoveInstructionDown { instruction: fmul };
        assert!(!t.is_applicable(&module, &FactManager::new()));
    }

    #[test]
    fn test_two_memory_accesses_stay_ordered() {
        let module = samples::arithmetic_module();
        let block = &module.functions[1].blocks[0];
        // FunctionCall followed by Store.
        let call = make_instruction_descriptor(block, 3).unwrap();
        let t = MoveInstructionDown { instruction: call };
        assert!(!t.is_applicable(&module, &FactManager::new()));
    }
}
