//! Passes that only touch hints and operand order. They enable nothing
//! and run once at the end.

use super::{FuzzerPass, PassContext};
use crate::transformation::{SetFunctionControl, SetSelectionControl};
use morph_core::{Chance, Result};
use morph_ir::{function_control, selection_control, Function, Id, Opcode};

pub struct AdjustBranchWeights;

impl FuzzerPass for AdjustBranchWeights {
    fn name(&self) -> &'static str {
        "adjust_branch_weights"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, instruction| {
            let is_conditional = pass
                .module
                .instruction_at(position)
                .is_some_and(|inst| inst.opcode == Opcode::BranchConditional);
            if !is_conditional || !pass.context.roll(Chance::AdjustingBranchWeights) {
                return Ok(());
            }
            let taken = pass.context.random_between(0, 100);
            let not_taken = pass.context.random_between(0, 100);
            let weights = if taken == 0 && not_taken == 0 {
                (1, 0)
            } else {
                (taken, not_taken)
            };
            pass.maybe_apply(crate::transformation::AdjustBranchWeights { instruction, weights })?;
            Ok(())
        })
    }
}

/// Rewrites the inlining hint of each function. Purity hints are kept as
/// they are.
pub struct AdjustFunctionControls;

impl FuzzerPass for AdjustFunctionControls {
    fn name(&self) -> &'static str {
        "adjust_function_controls"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let functions: Vec<(Id, u32)> = pass
            .module
            .functions
            .iter()
            .map(|function| (function.id(), function.control()))
            .collect();
        let hints = [function_control::NONE, function_control::INLINE, function_control::DONT_INLINE];
        for (function_id, control) in functions {
            if !pass.context.roll(Chance::AdjustingFunctionControl) {
                continue;
            }
            let Some(&hint) = pass.context.choose(&hints) else {
                continue;
            };
            let purity = control & (function_control::PURE | function_control::CONST);
            pass.maybe_apply(SetFunctionControl {
                function_id,
                function_control: purity | hint,
            })?;
        }
        Ok(())
    }
}

pub struct AdjustSelectionControls;

impl FuzzerPass for AdjustSelectionControls {
    fn name(&self) -> &'static str {
        "adjust_selection_controls"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let choices = [
            selection_control::NONE,
            selection_control::FLATTEN,
            selection_control::DONT_FLATTEN,
        ];
        pass.for_each_instruction(|pass, position, merge_instruction| {
            let is_selection_merge = pass
                .module
                .instruction_at(position)
                .is_some_and(|inst| inst.opcode == Opcode::SelectionMerge);
            if !is_selection_merge || !pass.context.roll(Chance::AdjustingSelectionControl) {
                return Ok(());
            }
            if let Some(&selection_control) = pass.context.choose(&choices) {
                pass.maybe_apply(SetSelectionControl {
                    merge_instruction,
                    selection_control,
                })?;
            }
            Ok(())
        })
    }
}

pub struct SwapCommutableOperands;

impl FuzzerPass for SwapCommutableOperands {
    fn name(&self) -> &'static str {
        "swap_commutable_operands"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, instruction| {
            let commutative = pass
                .module
                .instruction_at(position)
                .is_some_and(|inst| inst.opcode.is_commutative());
            if commutative && pass.context.roll(Chance::SwappingCommutableOperands) {
                pass.maybe_apply(crate::transformation::SwapCommutableOperands { instruction })?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use morph_ir::{samples, StructuralValidator, Validator};

    #[test]
    fn test_branch_weights_are_attached() {
        let mut harness = Harness::new(samples::control_flow_module(), 3, 100);
        harness.run(&AdjustBranchWeights);
        assert_eq!(harness.count("adjust_branch_weights"), 2);
        let main = harness.module.functions.last().unwrap();
        let entry_branch = main.blocks[0].terminator().unwrap();
        assert_eq!(entry_branch.operands.len(), 5);
        StructuralValidator.validate(&harness.module).unwrap();
    }

    #[test]
    fn test_function_controls_keep_purity() {
        let mut harness = Harness::new(samples::arithmetic_module(), 8, 100);
        harness.run(&AdjustFunctionControls);
        assert_eq!(harness.count("set_function_control"), 2);
        for function in &harness.module.functions {
            assert_eq!(function.control() & (function_control::PURE | function_control::CONST), 0);
        }
        assert!(harness.module.functions.iter().map(Function::control).all(|c| c <= function_control::DONT_INLINE));
    }

    #[test]
    fn test_selection_controls_and_swaps_keep_module_valid() {
        let mut harness = Harness::new(samples::control_flow_module(), 5, 100);
        harness.run(&AdjustSelectionControls);
        harness.run(&SwapCommutableOperands);
        assert_eq!(harness.count("set_selection_control"), 1);
        assert!(harness.count("swap_commutable_operands") > 0);
        StructuralValidator.validate(&harness.module).unwrap();
    }
}
