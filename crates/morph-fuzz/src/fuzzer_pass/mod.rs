//! Fuzzer passes: policies that walk the module and propose
//! transformations.
//!
//! Enabling passes may open up opportunities for each other and are run
//! repeatedly in random order. Finishing passes only touch hints and run
//! once at the end of a run.

mod control_flow;
mod declarations;
mod donate_modules;
mod finishing;
mod find_or_create;
mod instructions;
mod synonyms;

pub use control_flow::{AddDeadBlocks, InlineFunctions, MoveInstructionsDown, PermuteFunctionParameters, SplitBlocks};
pub use declarations::{AddCompositeTypes, AddGlobalVariables, AddLocalVariables};
pub use donate_modules::DonateModules;
pub use finishing::{AdjustBranchWeights, AdjustFunctionControls, AdjustSelectionControls, SwapCommutableOperands};
pub use instructions::{
    AddEquationInstructions, AddFunctionCalls, AddLoads, AddStores, ConstructComposites, CopyObjects,
    ExtractFromComposites,
};
pub use synonyms::{ApplyIdSynonyms, ObfuscateConstants};

use crate::context::FuzzerContext;
use crate::descriptor::{make_instruction_descriptor, InstructionDescriptor};
use crate::fact_manager::FactManager;
use crate::transformation::{Transform, Transformation, TransformationSequence};
use morph_core::Result;
use morph_ir::{DominatorAnalysis, Function, Id, Instruction, InstructionPosition, Module, TypeKey};
use tracing::trace;

pub trait FuzzerPass {
    fn name(&self) -> &'static str;

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()>;
}

/// Everything a pass may touch while it runs. Borrowed from the driver for
/// the duration of one pass.
pub struct PassContext<'a> {
    pub module: &'a mut Module,
    pub facts: &'a mut FactManager,
    pub context: &'a mut FuzzerContext,
    pub transformations: &'a mut TransformationSequence,
}

impl<'a> PassContext<'a> {
    pub fn new(
        module: &'a mut Module,
        facts: &'a mut FactManager,
        context: &'a mut FuzzerContext,
        transformations: &'a mut TransformationSequence,
    ) -> Self {
        Self {
            module,
            facts,
            context,
            transformations,
        }
    }

    /// Applies a transformation the caller knows to be applicable and
    /// records it.
    pub fn apply_transformation(&mut self, transformation: impl Into<Transformation>) -> Result<()> {
        let transformation = transformation.into();
        transformation.apply(self.module, self.facts)?;
        trace!(kind = transformation.name(), "applied transformation");
        self.transformations.push(transformation);
        Ok(())
    }

    /// Applies and records the transformation if it is applicable. Most
    /// candidates a pass proposes are not, which is fine.
    pub fn maybe_apply(&mut self, transformation: impl Into<Transformation>) -> Result<bool> {
        let transformation = transformation.into();
        if !transformation.is_applicable(self.module, self.facts) {
            return Ok(false);
        }
        self.apply_transformation(transformation)?;
        Ok(true)
    }

    /// Calls `action` for every instruction that exists when the walk
    /// reaches it. Instructions the action inserts before the current one
    /// are skipped; blocks added during the walk are not visited.
    pub fn for_each_instruction<F>(&mut self, mut action: F) -> Result<()>
    where
        F: FnMut(&mut Self, InstructionPosition, InstructionDescriptor) -> Result<()>,
    {
        let function_ids: Vec<Id> = self.module.functions.iter().map(Function::id).collect();
        for function_id in function_ids {
            for label in self.block_labels(function_id) {
                let mut index = 0;
                loop {
                    let Some((function, block)) = self.module.find_block(label) else {
                        break;
                    };
                    let current = &self.module.functions[function].blocks[block];
                    let Some(descriptor) = make_instruction_descriptor(current, index) else {
                        break;
                    };
                    let len_before = current.len();
                    let position = InstructionPosition { function, block, index };
                    action(self, position, descriptor)?;
                    let len_after = self.block_len(label).unwrap_or(len_before);
                    index += 1 + len_after.saturating_sub(len_before);
                }
            }
        }
        Ok(())
    }

    pub fn block_labels(&self, function_id: Id) -> Vec<Id> {
        self.module
            .function(function_id)
            .map(|function| function.blocks.iter().map(|block| block.label).collect())
            .unwrap_or_default()
    }

    fn block_len(&self, label: Id) -> Option<usize> {
        let (function, block) = self.module.find_block(label)?;
        Some(self.module.functions[function].blocks[block].len())
    }

    /// Ids usable by an instruction inserted at `position` whose defining
    /// instruction satisfies `filter`: global values, parameters of the
    /// enclosing function and dominating instructions.
    pub fn available_ids(
        &self,
        position: InstructionPosition,
        filter: impl Fn(&Module, &Instruction) -> bool,
    ) -> Vec<Id> {
        let module = &*self.module;
        let Some(function) = module.functions.get(position.function) else {
            return Vec::new();
        };
        let mut ids: Vec<Id> = module
            .globals
            .iter()
            .chain(&function.params)
            .filter(|inst| inst.result_type.is_some() && filter(module, inst))
            .filter_map(|inst| inst.result_id)
            .collect();

        let dominators = DominatorAnalysis::new(function);
        let Some(target) = function.blocks.get(position.block).map(|block| block.label) else {
            return ids;
        };
        for (block_index, block) in function.blocks.iter().enumerate() {
            if !dominators.dominates(block.label, target) {
                continue;
            }
            let end = if block_index == position.block {
                position.index.min(block.len())
            } else {
                block.len()
            };
            ids.extend(
                block.instructions[..end]
                    .iter()
                    .filter(|inst| inst.result_type.is_some() && filter(module, inst))
                    .filter_map(|inst| inst.result_id),
            );
        }
        ids
    }

    /// Declared types a variable or composite member may have.
    pub fn value_types(&self) -> Vec<Id> {
        self.module
            .globals
            .iter()
            .filter(|inst| inst.opcode.is_type_declaration())
            .filter_map(|inst| inst.result_id)
            .filter(|id| {
                matches!(
                    self.module.type_key(*id),
                    Some(TypeKey::Bool)
                        | Some(TypeKey::Int { .. })
                        | Some(TypeKey::Float { .. })
                        | Some(TypeKey::Vector { .. })
                        | Some(TypeKey::Struct { .. })
                        | Some(TypeKey::Array { .. })
                )
            })
            .collect()
    }
}

/// Passes the driver picks from in its main loop.
pub fn enabling_passes(donors: &[Module]) -> Vec<Box<dyn FuzzerPass>> {
    let mut passes: Vec<Box<dyn FuzzerPass>> = vec![
        Box::new(AddCompositeTypes),
        Box::new(AddDeadBlocks),
        Box::new(AddEquationInstructions),
        Box::new(AddFunctionCalls),
        Box::new(AddGlobalVariables),
        Box::new(AddLocalVariables),
        Box::new(AddLoads),
        Box::new(AddStores),
        Box::new(ApplyIdSynonyms),
        Box::new(ConstructComposites),
        Box::new(CopyObjects),
        Box::new(ExtractFromComposites),
        Box::new(InlineFunctions),
        Box::new(MoveInstructionsDown),
        Box::new(ObfuscateConstants),
        Box::new(PermuteFunctionParameters),
        Box::new(SplitBlocks),
    ];
    if !donors.is_empty() {
        passes.push(Box::new(DonateModules::new(donors.to_vec())));
    }
    passes
}

/// Passes run exactly once, after the main loop.
pub fn finishing_passes() -> Vec<Box<dyn FuzzerPass>> {
    vec![
        Box::new(AdjustBranchWeights),
        Box::new(AdjustFunctionControls),
        Box::new(AdjustSelectionControls),
        Box::new(SwapCommutableOperands),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use morph_core::{ChanceTable, FuzzerConfig};

    /// Module, facts, context and log owned together so tests can build a
    /// [`PassContext`] over them.
    pub struct Harness {
        pub module: Module,
        pub facts: FactManager,
        pub context: FuzzerContext,
        pub transformations: TransformationSequence,
    }

    impl Harness {
        /// Every chance pinned to `percentage`.
        pub fn new(module: Module, seed: u64, percentage: u32) -> Self {
            let config = FuzzerConfig {
                seed,
                chances: ChanceTable::uniform(percentage),
                ..Default::default()
            };
            let context = FuzzerContext::new(&config, module.id_bound);
            Self {
                module,
                facts: FactManager::new(),
                context,
                transformations: TransformationSequence::default(),
            }
        }

        pub fn run(&mut self, pass: &dyn FuzzerPass) {
            let mut cx = self.pass_context();
            pass.apply(&mut cx).unwrap();
        }

        pub fn pass_context(&mut self) -> PassContext<'_> {
            PassContext::new(
                &mut self.module,
                &mut self.facts,
                &mut self.context,
                &mut self.transformations,
            )
        }

        pub fn count(&self, name: &str) -> usize {
            self.transformations.iter().filter(|t| t.name() == name).count()
        }
    }
}
