//! The fuzzing driver: runs randomly chosen enabling passes until the
//! transformation limit or a coin flip stops it, then the finishing passes.

use crate::context::FuzzerContext;
use crate::fact_manager::{FactManager, FactSequence};
use crate::fuzzer_pass::{enabling_passes, finishing_passes, FuzzerPass, PassContext};
use crate::transformation::TransformationSequence;
use morph_core::{FuzzerConfig, Result};
use morph_ir::{Module, StructuralValidator, Validator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// How a fuzzing run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuzzerStatus {
    Complete,
    InitialModuleInvalid { reason: String },
    /// Validation after `pass` failed. The log includes the offending
    /// pass's transformations.
    PassLedToInvalidModule { pass: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct FuzzerOutcome {
    pub status: FuzzerStatus,
    /// The final module, or the last module known to be valid if the run
    /// was cut short.
    pub module: Module,
    pub transformations: TransformationSequence,
    pub facts: FactManager,
}

pub struct Fuzzer<V: Validator = StructuralValidator> {
    config: FuzzerConfig,
    validator: V,
    donors: Vec<Module>,
}

impl Fuzzer<StructuralValidator> {
    pub fn new(config: FuzzerConfig) -> Self {
        Self::with_validator(config, StructuralValidator)
    }
}

impl<V: Validator> Fuzzer<V> {
    pub fn with_validator(config: FuzzerConfig, validator: V) -> Self {
        Self {
            config,
            validator,
            donors: Vec::new(),
        }
    }

    /// Modules the donation pass may copy functions from.
    pub fn with_donors(mut self, donors: Vec<Module>) -> Self {
        self.donors = donors;
        self
    }

    pub fn config(&self) -> &FuzzerConfig {
        &self.config
    }

    #[instrument(skip_all, fields(seed = self.config.seed))]
    pub fn run(&self, module: &Module, seed_facts: &FactSequence) -> Result<FuzzerOutcome> {
        if let Err(e) = self.validator.validate(module) {
            warn!("Initial module is invalid: {}", e);
            return Ok(FuzzerOutcome {
                status: FuzzerStatus::InitialModuleInvalid { reason: e.to_string() },
                module: module.clone(),
                transformations: TransformationSequence::default(),
                facts: FactManager::new(),
            });
        }

        let mut module = module.clone();
        let mut facts = FactManager::new();
        facts.add_facts(&module, seed_facts);
        let mut context = FuzzerContext::new(&self.config, module.id_bound);
        let mut transformations = TransformationSequence::default();

        let passes = enabling_passes(&self.donors);
        let mut selected: Vec<&dyn FuzzerPass> = passes
            .iter()
            .filter(|_| context.choose_even())
            .map(|pass| pass.as_ref())
            .collect();
        if selected.is_empty() {
            selected.push(passes[context.random_index(passes.len())].as_ref());
        }
        debug!(
            passes = ?selected.iter().map(|pass| pass.name()).collect::<Vec<_>>(),
            "enabling passes selected"
        );

        let mut last_valid = module.clone();
        let mut is_first = true;
        while is_first
            || (transformations.len() < self.config.transformation_limit
                && context.choose_percentage(self.config.chance_of_applying_another_pass))
        {
            is_first = false;
            let pass = selected[context.random_index(selected.len())];
            let before = transformations.len();
            pass.apply(&mut PassContext::new(
                &mut module,
                &mut facts,
                &mut context,
                &mut transformations,
            ))?;
            debug!(
                pass = pass.name(),
                applied = transformations.len() - before,
                "enabling pass finished"
            );

            if self.config.validate_after_each_pass {
                if let Err(e) = self.validator.validate(&module) {
                    warn!(pass = pass.name(), "Pass produced an invalid module: {}", e);
                    return Ok(FuzzerOutcome {
                        status: FuzzerStatus::PassLedToInvalidModule {
                            pass: pass.name().to_string(),
                            reason: e.to_string(),
                        },
                        module: last_valid,
                        transformations,
                        facts,
                    });
                }
                last_valid = module.clone();
            }
        }

        for pass in finishing_passes() {
            pass.apply(&mut PassContext::new(
                &mut module,
                &mut facts,
                &mut context,
                &mut transformations,
            ))?;
            if self.config.validate_after_each_pass {
                if let Err(e) = self.validator.validate(&module) {
                    warn!(pass = pass.name(), "Pass produced an invalid module: {}", e);
                    return Ok(FuzzerOutcome {
                        status: FuzzerStatus::PassLedToInvalidModule {
                            pass: pass.name().to_string(),
                            reason: e.to_string(),
                        },
                        module: last_valid,
                        transformations,
                        facts,
                    });
                }
                last_valid = module.clone();
            }
        }

        info!(
            transformations = transformations.len(),
            instructions = module.instruction_count(),
            "Fuzzing run complete"
        );
        Ok(FuzzerOutcome {
            status: FuzzerStatus::Complete,
            module,
            transformations,
            facts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_core::Error;
    use morph_ir::samples;

    /// Accepts the first `remaining` modules it sees, then rejects.
    struct FailAfter(std::cell::Cell<usize>);

    impl Validator for FailAfter {
        fn validate(&self, _module: &Module) -> Result<()> {
            let remaining = self.0.get();
            if remaining == 0 {
                return Err(Error::validation("rejected"));
            }
            self.0.set(remaining - 1);
            Ok(())
        }
    }

    #[test]
    fn test_run_is_deterministic() {
        let config = FuzzerConfig {
            seed: 11,
            ..Default::default()
        };
        let fuzzer = Fuzzer::new(config);
        let first = fuzzer.run(&samples::control_flow_module(), &FactSequence::default()).unwrap();
        let second = fuzzer.run(&samples::control_flow_module(), &FactSequence::default()).unwrap();
        assert_eq!(first.status, FuzzerStatus::Complete);
        assert_eq!(first.transformations, second.transformations);
        assert_eq!(first.module.to_bytes().unwrap(), second.module.to_bytes().unwrap());
    }

    #[test]
    fn test_invalid_input_is_reported() {
        let mut module = samples::arithmetic_module();
        module.functions[1].blocks[0].instructions.pop();
        let outcome = Fuzzer::new(FuzzerConfig::default())
            .run(&module, &FactSequence::default())
            .unwrap();
        assert!(matches!(outcome.status, FuzzerStatus::InitialModuleInvalid { .. }));
        assert!(outcome.transformations.is_empty());
    }

    #[test]
    fn test_failed_validation_stops_the_run() {
        let config = FuzzerConfig {
            seed: 3,
            validate_after_each_pass: true,
            ..Default::default()
        };
        // The initial check and the first pass pass; the second check fails.
        let fuzzer = Fuzzer::with_validator(config, FailAfter(std::cell::Cell::new(2)));
        let original = samples::arithmetic_module();
        let outcome = fuzzer.run(&original, &FactSequence::default()).unwrap();
        match outcome.status {
            FuzzerStatus::PassLedToInvalidModule { .. } => {}
            other => panic!("unexpected status {:?}", other),
        }
        assert!(StructuralValidator.validate(&outcome.module).is_ok());
    }
}
