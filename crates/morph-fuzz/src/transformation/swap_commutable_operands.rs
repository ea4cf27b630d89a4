use super::{ensure_applicable, resolve_for_apply, Transform};
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use morph_ir::Module;
use serde::{Deserialize, Serialize};

/// Swaps the two operands of a commutative binary instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapCommutableOperands {
    pub instruction: InstructionDescriptor,
}

impl Transform for SwapCommutableOperands {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        self.instruction
            .resolve(module)
            .and_then(|position| module.instruction_at(position))
            .is_some_and(|inst| inst.opcode.is_commutative() && inst.operands.len() == 2)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction, module)?;
        let inst = module
            .instruction_at_mut(position)
            .ok_or_else(|| Error::invariant("instruction vanished"))?;
        inst.operands.swap(0, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::make_instruction_descriptor;
    use morph_ir::{samples, Opcode, StructuralValidator, Validator};

    #[test]
    fn test_swap_add_but_not_sub() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let block = &module.functions[1].blocks[0];
        let add = SwapCommutableOperands {
            instruction: make_instruction_descriptor(block, 1).unwrap(),
        };
        let sub = SwapCommutableOperands {
            instruction: make_instruction_descriptor(block, 2).unwrap(),
        };
        assert!(!sub.is_applicable(&module, &facts));
        let before = block.instructions[1].operands.clone();
        add.apply(&mut module, &mut facts).unwrap();
        let after = &module.functions[1].blocks[0].instructions[1];
        assert_eq!(after.opcode, Opcode::IAdd);
        assert_eq!(after.operands[0], before[1]);
        assert_eq!(after.operands[1], before[0]);
        StructuralValidator.validate(&module).unwrap();
    }
}
