//! Log shrinking: removes chunks of a transformation log while the module
//! obtained by replaying what is left stays interesting.

use crate::fact_manager::FactSequence;
use crate::replayer::{ReplayStatus, Replayer};
use crate::transformation::TransformationSequence;
use morph_core::{Error, ReplayConfig, Result, ShrinkerConfig};
use morph_ir::{Module, StructuralValidator, Validator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShrinkerStatus {
    Complete,
    StepLimitReached,
    InitialBinaryNotInteresting,
    InitialModuleInvalid,
}

#[derive(Debug, Clone)]
pub struct ShrinkerOutcome {
    pub status: ShrinkerStatus,
    pub module: Module,
    pub transformations: TransformationSequence,
}

pub struct Shrinker<V: Validator + Clone = StructuralValidator> {
    config: ShrinkerConfig,
    validator: V,
}

impl Shrinker<StructuralValidator> {
    pub fn new(config: ShrinkerConfig) -> Self {
        Self::with_validator(config, StructuralValidator)
    }
}

impl<V: Validator + Clone> Shrinker<V> {
    pub fn with_validator(config: ShrinkerConfig, validator: V) -> Self {
        Self { config, validator }
    }

    /// `interesting` is called with a candidate module and the number of
    /// the attempt (0 for the unshrunk log).
    #[instrument(skip_all, fields(transformations = transformations.len(), step_limit = self.config.step_limit))]
    pub fn shrink<F>(
        &self,
        module: &Module,
        seed_facts: &FactSequence,
        transformations: &TransformationSequence,
        mut interesting: F,
    ) -> Result<ShrinkerOutcome>
    where
        F: FnMut(&Module, u32) -> bool,
    {
        let replayer = Replayer::with_validator(ReplayConfig::default(), self.validator.clone());
        let initial = replayer.replay(module, seed_facts, transformations)?;
        match initial.status {
            ReplayStatus::Complete => {}
            ReplayStatus::InitialModuleInvalid { reason } => {
                warn!("Initial module is invalid: {}", reason);
                return Ok(ShrinkerOutcome {
                    status: ShrinkerStatus::InitialModuleInvalid,
                    module: module.clone(),
                    transformations: transformations.clone(),
                });
            }
            ReplayStatus::TransformationLedToInvalidModule { index, .. } => {
                return Err(Error::invariant(format!(
                    "replay without validation rejected transformation {}",
                    index
                )));
            }
        }
        if !interesting(&initial.module, 0) {
            warn!("Initial module is not interesting");
            return Ok(ShrinkerOutcome {
                status: ShrinkerStatus::InitialBinaryNotInteresting,
                module: initial.module,
                transformations: initial.transformations,
            });
        }

        let mut best_module = initial.module;
        let mut best = initial.transformations.transformations;
        let mut step = 0;
        let mut chunk_size = best.len().div_ceil(2).max(1);

        while chunk_size > 0 && !best.is_empty() {
            let mut progress = false;
            // Walk backwards so a removal never shifts the chunks still to
            // be tried.
            let mut chunk_end = best.len();
            while chunk_end > 0 {
                if step >= self.config.step_limit {
                    info!(step, remaining = best.len(), "Step limit reached");
                    return Ok(ShrinkerOutcome {
                        status: ShrinkerStatus::StepLimitReached,
                        module: best_module,
                        transformations: TransformationSequence::new(best),
                    });
                }
                step += 1;
                let chunk_start = chunk_end.saturating_sub(chunk_size);
                let candidate: Vec<_> = best[..chunk_start].iter().chain(&best[chunk_end..]).cloned().collect();
                let replayed = replayer.replay(module, seed_facts, &TransformationSequence::new(candidate))?;
                if replayed.status == ReplayStatus::Complete && interesting(&replayed.module, step) {
                    debug!(step, chunk_start, chunk_size, "chunk removed");
                    best = replayed.transformations.transformations;
                    best_module = replayed.module;
                    progress = true;
                }
                chunk_end = chunk_start.min(best.len());
            }
            if !progress {
                chunk_size /= 2;
            }
        }

        info!(step, remaining = best.len(), "Shrinking complete");
        Ok(ShrinkerOutcome {
            status: ShrinkerStatus::Complete,
            module: best_module,
            transformations: TransformationSequence::new(best),
        })
    }
}
