//! Hint-only edits: branch weights, function control and selection
//! control. None of them change what the module computes.

use super::{ensure_applicable, resolve_for_apply, Transform};
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::FactManager;
use morph_core::{Error, Result};
use morph_ir::{function_control, selection_control, Id, Module, Opcode, Operand};
use serde::{Deserialize, Serialize};

/// Sets the weights of a conditional branch. The sum must be positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustBranchWeights {
    pub instruction: InstructionDescriptor,
    pub weights: (u32, u32),
}

impl Transform for AdjustBranchWeights {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        let (first, second) = self.weights;
        if first.checked_add(second).map_or(true, |sum| sum == 0) {
            return false;
        }
        self.instruction
            .resolve(module)
            .and_then(|position| module.instruction_at(position))
            .is_some_and(|inst| inst.opcode == Opcode::BranchConditional)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction, module)?;
        let inst = module
            .instruction_at_mut(position)
            .ok_or_else(|| Error::invariant("branch vanished"))?;
        inst.operands.truncate(3);
        inst.operands.push(Operand::Literal(self.weights.0));
        inst.operands.push(Operand::Literal(self.weights.1));
        Ok(())
    }
}

/// Replaces a function's control mask. Purity hints cannot be added, and
/// inline and don't-inline are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFunctionControl {
    pub function_id: Id,
    pub function_control: u32,
}

impl Transform for SetFunctionControl {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        let Some(function) = module.function(self.function_id) else {
            return false;
        };
        let control = self.function_control;
        if control & !function_control::ALL != 0 {
            return false;
        }
        let inline_bits = function_control::INLINE | function_control::DONT_INLINE;
        if control & inline_bits == inline_bits {
            return false;
        }
        let purity = function_control::PURE | function_control::CONST;
        control & purity & !function.control() == 0
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let function = module
            .function_mut(self.function_id)
            .ok_or_else(|| Error::invariant(format!("function {} vanished", self.function_id)))?;
        function.def.operands[0] = Operand::Literal(self.function_control);
        Ok(())
    }
}

/// Replaces the control of a selection merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSelectionControl {
    pub merge_instruction: InstructionDescriptor,
    pub selection_control: u32,
}

impl Transform for SetSelectionControl {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !matches!(
            self.selection_control,
            selection_control::NONE | selection_control::FLATTEN | selection_control::DONT_FLATTEN
        ) {
            return false;
        }
        self.merge_instruction
            .resolve(module)
            .and_then(|position| module.instruction_at(position))
            .is_some_and(|inst| inst.opcode == Opcode::SelectionMerge)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.merge_instruction, module)?;
        let inst = module
            .instruction_at_mut(position)
            .ok_or_else(|| Error::invariant("merge instruction vanished"))?;
        inst.operands[1] = Operand::Literal(self.selection_control);
        Ok(())
    }
}
