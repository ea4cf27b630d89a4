//! Configuration types for fuzzing, replaying and shrinking runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A probabilistic decision point of the fuzzer. Each one gets a concrete
/// percentage at the start of a run, drawn from its [`ChanceRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chance {
    AddingAnotherStructField,
    AddingCompositeType,
    AddingDeadBlock,
    AddingEquationInstruction,
    AddingGlobalVariable,
    AddingLoad,
    AddingLocalVariable,
    AddingStore,
    AdjustingBranchWeights,
    AdjustingFunctionControl,
    AdjustingSelectionControl,
    CallingFunction,
    ChoosingStructTypeVsVectorType,
    ConstructingComposite,
    CopyingObject,
    DonatingAdditionalModule,
    ExtractingFromComposite,
    InliningFunction,
    MovingInstructionDown,
    ObfuscatingConstant,
    PermutingParameters,
    ReplacingIdWithSynonym,
    SplittingBlock,
    SwappingCommutableOperands,
}

impl Chance {
    /// Every chance, in the order in which they are sampled.
    pub const ALL: [Chance; 24] = [
        Chance::AddingAnotherStructField,
        Chance::AddingCompositeType,
        Chance::AddingDeadBlock,
        Chance::AddingEquationInstruction,
        Chance::AddingGlobalVariable,
        Chance::AddingLoad,
        Chance::AddingLocalVariable,
        Chance::AddingStore,
        Chance::AdjustingBranchWeights,
        Chance::AdjustingFunctionControl,
        Chance::AdjustingSelectionControl,
        Chance::CallingFunction,
        Chance::ChoosingStructTypeVsVectorType,
        Chance::ConstructingComposite,
        Chance::CopyingObject,
        Chance::DonatingAdditionalModule,
        Chance::ExtractingFromComposite,
        Chance::InliningFunction,
        Chance::MovingInstructionDown,
        Chance::ObfuscatingConstant,
        Chance::PermutingParameters,
        Chance::ReplacingIdWithSynonym,
        Chance::SplittingBlock,
        Chance::SwappingCommutableOperands,
    ];

    /// Default `[min, max]` percentage range.
    pub fn default_range(self) -> ChanceRange {
        let (min, max) = match self {
            Chance::AddingAnotherStructField => (20, 90),
            Chance::AddingCompositeType => (20, 70),
            Chance::AddingDeadBlock => (20, 90),
            Chance::AddingEquationInstruction => (5, 90),
            Chance::AddingGlobalVariable => (20, 90),
            Chance::AddingLoad => (5, 50),
            Chance::AddingLocalVariable => (20, 90),
            Chance::AddingStore => (5, 50),
            Chance::AdjustingBranchWeights => (20, 90),
            Chance::AdjustingFunctionControl => (20, 70),
            Chance::AdjustingSelectionControl => (20, 90),
            Chance::CallingFunction => (1, 10),
            Chance::ChoosingStructTypeVsVectorType => (20, 80),
            Chance::ConstructingComposite => (20, 50),
            Chance::CopyingObject => (20, 50),
            Chance::DonatingAdditionalModule => (5, 50),
            Chance::ExtractingFromComposite => (20, 50),
            Chance::InliningFunction => (10, 90),
            Chance::MovingInstructionDown => (20, 50),
            Chance::ObfuscatingConstant => (10, 90),
            Chance::PermutingParameters => (30, 90),
            Chance::ReplacingIdWithSynonym => (10, 90),
            Chance::SplittingBlock => (40, 95),
            Chance::SwappingCommutableOperands => (10, 90),
        };
        ChanceRange { min, max }
    }
}

/// Inclusive percentage range a chance is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChanceRange {
    pub min: u32,
    pub max: u32,
}

impl ChanceRange {
    pub fn fixed(percentage: u32) -> Self {
        Self {
            min: percentage,
            max: percentage,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.min <= self.max && self.max <= 100
    }
}

/// Per-chance ranges. Chances missing from the table fall back to
/// [`Chance::default_range`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChanceTable(BTreeMap<Chance, ChanceRange>);

impl ChanceTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn range(&self, chance: Chance) -> ChanceRange {
        self.0
            .get(&chance)
            .copied()
            .unwrap_or_else(|| chance.default_range())
    }

    pub fn set(&mut self, chance: Chance, range: ChanceRange) {
        self.0.insert(chance, range);
    }

    /// Pins every chance to the same percentage.
    pub fn uniform(percentage: u32) -> Self {
        Self(
            Chance::ALL
                .iter()
                .map(|chance| (*chance, ChanceRange::fixed(percentage)))
                .collect(),
        )
    }
}

impl Default for ChanceTable {
    fn default() -> Self {
        Self(
            Chance::ALL
                .iter()
                .map(|chance| (*chance, chance.default_range()))
                .collect(),
        )
    }
}

/// Fuzzing run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Upper bound on the number of transformations applied by enabling passes
    pub transformation_limit: usize,
    /// Percentage chance of running another enabling pass
    pub chance_of_applying_another_pass: u32,
    /// Run the validator after every pass
    pub validate_after_each_pass: bool,
    /// Bound on synonym class size when computing the closure of facts
    pub max_equivalence_class_size: usize,
    /// Gap left between the input id bound and the first fresh id
    pub id_bound_gap: u32,
    /// Maximum number of members in a struct type added by fuzzing
    pub max_struct_members: usize,
    /// Per-kind application probabilities
    pub chances: ChanceTable,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            transformation_limit: 500,
            chance_of_applying_another_pass: 85,
            validate_after_each_pass: false,
            max_equivalence_class_size: 1000,
            id_bound_gap: 100,
            max_struct_members: 8,
            chances: ChanceTable::default(),
        }
    }
}

/// Replay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Run the validator after every replayed transformation
    pub validate_after_each_transformation: bool,
}

/// Shrinking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkerConfig {
    /// Maximum number of replay attempts
    pub step_limit: u32,
}

impl Default for ShrinkerConfig {
    fn default() -> Self {
        Self { step_limit: 250 }
    }
}
