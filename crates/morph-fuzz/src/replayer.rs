//! Re-applies a recorded transformation log, skipping entries that no
//! longer apply to the current state.

use crate::fact_manager::{FactManager, FactSequence};
use crate::transformation::{Transform, TransformationSequence};
use morph_core::{ReplayConfig, Result};
use morph_ir::{Module, StructuralValidator, Validator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayStatus {
    Complete,
    InitialModuleInvalid { reason: String },
    /// Transformation `index` of the input log produced an invalid module.
    TransformationLedToInvalidModule { index: usize, reason: String },
}

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub status: ReplayStatus,
    pub module: Module,
    /// The transformations that were applied, in order.
    pub transformations: TransformationSequence,
    pub facts: FactManager,
}

pub struct Replayer<V: Validator = StructuralValidator> {
    config: ReplayConfig,
    validator: V,
}

impl Replayer<StructuralValidator> {
    pub fn new(config: ReplayConfig) -> Self {
        Self::with_validator(config, StructuralValidator)
    }
}

impl<V: Validator> Replayer<V> {
    pub fn with_validator(config: ReplayConfig, validator: V) -> Self {
        Self { config, validator }
    }

    #[instrument(skip_all, fields(transformations = transformations.len()))]
    pub fn replay(
        &self,
        module: &Module,
        seed_facts: &FactSequence,
        transformations: &TransformationSequence,
    ) -> Result<ReplayOutcome> {
        if let Err(e) = self.validator.validate(module) {
            warn!("Initial module is invalid: {}", e);
            return Ok(ReplayOutcome {
                status: ReplayStatus::InitialModuleInvalid { reason: e.to_string() },
                module: module.clone(),
                transformations: TransformationSequence::default(),
                facts: FactManager::new(),
            });
        }

        let mut module = module.clone();
        let mut facts = FactManager::new();
        facts.add_facts(&module, seed_facts);
        let mut applied = TransformationSequence::default();

        for (index, transformation) in transformations.iter().enumerate() {
            if !transformation.is_applicable(&module, &facts) {
                debug!(index, kind = transformation.name(), "skipping inapplicable transformation");
                continue;
            }
            transformation.apply(&mut module, &mut facts)?;
            applied.push(transformation.clone());

            if self.config.validate_after_each_transformation {
                if let Err(e) = self.validator.validate(&module) {
                    warn!(index, kind = transformation.name(), "Transformation produced an invalid module: {}", e);
                    return Ok(ReplayOutcome {
                        status: ReplayStatus::TransformationLedToInvalidModule {
                            index,
                            reason: e.to_string(),
                        },
                        module,
                        transformations: applied,
                        facts,
                    });
                }
            }
        }

        info!(
            applied = applied.len(),
            skipped = transformations.len() - applied.len(),
            "Replay complete"
        );
        Ok(ReplayOutcome {
            status: ReplayStatus::Complete,
            module,
            transformations: applied,
            facts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{make_instruction_descriptor, InstructionDescriptor};
    use crate::transformation::{AddConstantBoolean, AddDeadBlock, AddTypeBoolean, SplitBlock, Transformation};
    use morph_ir::{samples, Opcode};

    #[test]
    fn test_inapplicable_entries_are_dropped() {
        let module = samples::uniform_module();
        let fresh = module.id_bound;
        // The first constant precedes its type and is dropped.
        let log = TransformationSequence::new(vec![
            Transformation::from(AddConstantBoolean {
                fresh_id: fresh,
                is_true: true,
            }),
            Transformation::from(AddTypeBoolean { fresh_id: fresh }),
            Transformation::from(AddConstantBoolean {
                fresh_id: fresh + 1,
                is_true: true,
            }),
        ]);
        let outcome = Replayer::new(ReplayConfig::default())
            .replay(&module, &FactSequence::default(), &log)
            .unwrap();
        assert_eq!(outcome.status, ReplayStatus::Complete);
        assert_eq!(outcome.transformations.len(), 2);
        assert_eq!(outcome.module.find_bool_constant(true), Some(fresh + 1));
    }

    #[test]
    fn test_transformation_on_vanished_block_is_skipped() {
        let module = samples::control_flow_module();
        let helper = &module.functions[0];
        let entry = helper.blocks[0].label;
        let split_at = make_instruction_descriptor(&helper.blocks[0], 1).unwrap();
        let fresh = module.id_bound;
        let log = TransformationSequence::new(vec![
            Transformation::from(AddDeadBlock {
                fresh_id: fresh,
                existing_block: entry,
                condition_value: true,
            }),
            // The branch this describes was replaced by the dead block.
            Transformation::from(SplitBlock {
                instruction_to_split_before: split_at,
                fresh_id: fresh + 1,
            }),
            Transformation::from(SplitBlock {
                instruction_to_split_before: InstructionDescriptor::new(fresh, Opcode::Branch, 0),
                fresh_id: fresh + 2,
            }),
        ]);
        let outcome = Replayer::new(ReplayConfig {
            validate_after_each_transformation: true,
        })
        .replay(&module, &FactSequence::default(), &log)
        .unwrap();
        assert_eq!(outcome.status, ReplayStatus::Complete);
        let kinds: Vec<_> = outcome.transformations.iter().map(Transformation::name).collect();
        assert_eq!(kinds, vec!["add_dead_block", "split_block"]);
        assert!(outcome.facts.block_is_dead(fresh + 2));
    }
}
