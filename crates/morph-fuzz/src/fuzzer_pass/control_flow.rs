//! Passes that reshape control flow or function signatures.

use super::{FuzzerPass, PassContext};
use crate::descriptor::{descriptor_at, make_instruction_descriptor};
use crate::transformation::{AddDeadBlock, InlineFunction, MoveInstructionDown, SplitBlock};
use morph_core::{Chance, Result};
use morph_ir::{DefSite, Function, Id, InstructionPosition, Opcode};
use std::collections::BTreeMap;

/// Guards unconditional branches with a constant condition whose untaken
/// side is a new dead block.
pub struct AddDeadBlocks;

impl FuzzerPass for AddDeadBlocks {
    fn name(&self) -> &'static str {
        "add_dead_blocks"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let labels: Vec<Id> = pass
            .module
            .functions
            .iter()
            .flat_map(|function| function.blocks.iter().map(|block| block.label))
            .collect();
        for existing_block in labels {
            if !pass.context.roll(Chance::AddingDeadBlock) {
                continue;
            }
            let condition_value = pass.context.choose_even();
            pass.find_or_create_bool_constant(condition_value)?;
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(AddDeadBlock {
                fresh_id,
                existing_block,
                condition_value,
            })?;
        }
        Ok(())
    }
}

/// Splits blocks at random points.
pub struct SplitBlocks;

impl FuzzerPass for SplitBlocks {
    fn name(&self) -> &'static str {
        "split_blocks"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let mut candidates = Vec::new();
        for function in &pass.module.functions {
            for block in &function.blocks {
                if !pass.context.roll(Chance::SplittingBlock) || block.is_empty() {
                    continue;
                }
                let index = pass.context.random_index(block.len());
                candidates.extend(make_instruction_descriptor(block, index));
            }
        }
        for instruction_to_split_before in candidates {
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(SplitBlock {
                instruction_to_split_before,
                fresh_id,
            })?;
        }
        Ok(())
    }
}

/// Inlines calls, splitting the calling block first so the call is
/// directly followed by an unconditional branch.
pub struct InlineFunctions;

impl FuzzerPass for InlineFunctions {
    fn name(&self) -> &'static str {
        "inline_functions"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let calls: Vec<Id> = pass
            .module
            .functions
            .iter()
            .flat_map(Function::instructions)
            .filter(|inst| inst.opcode == Opcode::FunctionCall)
            .filter_map(|inst| inst.result_id)
            .collect();
        for call_id in calls {
            if !pass.context.roll(Chance::InliningFunction) {
                continue;
            }
            let Some(DefSite::Body(position)) = pass.module.find_def(call_id) else {
                continue;
            };
            let Some(block) = pass.module.block_at(position.function, position.block) else {
                continue;
            };
            let followed_by_branch = position.index + 2 == block.len()
                && block.terminator().is_some_and(|t| t.opcode == Opcode::Branch);
            if !followed_by_branch {
                let next = InstructionPosition {
                    index: position.index + 1,
                    ..position
                };
                let Some(instruction_to_split_before) = descriptor_at(pass.module, next) else {
                    continue;
                };
                let fresh_id = pass.context.fresh_id();
                if !pass.maybe_apply(SplitBlock {
                    instruction_to_split_before,
                    fresh_id,
                })? {
                    continue;
                }
            }

            let Some(callee) = pass
                .module
                .def_instruction(call_id)
                .and_then(|call| call.id_operand(0))
                .and_then(|callee| pass.module.function(callee))
            else {
                continue;
            };
            let originals: Vec<Id> = callee
                .blocks
                .iter()
                .skip(1)
                .map(|block| block.label)
                .chain(callee.instructions().filter_map(|inst| inst.result_id))
                .collect();
            let result_id_map: BTreeMap<Id, Id> = originals
                .into_iter()
                .map(|original| (original, pass.context.fresh_id()))
                .collect();
            pass.maybe_apply(InlineFunction {
                function_call_id: call_id,
                result_id_map,
            })?;
        }
        Ok(())
    }
}

/// Swaps independent neighbouring instructions.
pub struct MoveInstructionsDown;

impl FuzzerPass for MoveInstructionsDown {
    fn name(&self) -> &'static str {
        "move_instructions_down"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, _, instruction| {
            if pass.context.roll(Chance::MovingInstructionDown) {
                pass.maybe_apply(MoveInstructionDown { instruction })?;
            }
            Ok(())
        })
    }
}

/// Shuffles the parameters of non-entry functions.
pub struct PermuteFunctionParameters;

impl FuzzerPass for PermuteFunctionParameters {
    fn name(&self) -> &'static str {
        "permute_function_parameters"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let functions: Vec<(Id, Id, Vec<Id>)> = pass
            .module
            .functions
            .iter()
            .filter(|function| function.params.len() > 1 && !pass.module.is_entry_point(function.id()))
            .map(|function| {
                let param_types = function.params.iter().filter_map(|param| param.result_type).collect();
                (function.id(), function.return_type(), param_types)
            })
            .collect();
        for (function_id, return_type, param_types) in functions {
            if !pass.context.roll(Chance::PermutingParameters) {
                continue;
            }
            let permutation = pass.context.random_permutation(param_types.len());
            let permuted = permutation.iter().map(|i| param_types[*i as usize]).collect();
            let new_type_id = pass.find_or_create_function_type(return_type, permuted)?;
            pass.maybe_apply(crate::transformation::PermuteFunctionParameters {
                function_id,
                new_type_id,
                permutation,
            })?;
        }
        Ok(())
    }
}
