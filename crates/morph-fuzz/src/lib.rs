//! Semantics-preserving mutation engine.
//!
//! A run takes a valid module plus seed facts and applies a long sequence
//! of small transformations, each guarded by a precondition that keeps the
//! module valid and its observable behavior unchanged. The applied
//! transformations are logged so that a run can be replayed exactly, or
//! shrunk to a shorter sequence that still exhibits some property.

pub mod call_graph;
pub mod context;
pub mod descriptor;
pub mod driver;
pub mod fact_manager;
pub mod fuzzer_pass;
pub mod replayer;
pub mod shrinker;
pub mod transformation;
pub mod util;

pub use call_graph::CallGraph;
pub use context::FuzzerContext;
pub use descriptor::{DataDescriptor, IdUseDescriptor, InstructionDescriptor, UniformBufferElementDescriptor};
pub use driver::{Fuzzer, FuzzerOutcome, FuzzerStatus};
pub use fact_manager::{Fact, FactManager, FactSequence};
pub use replayer::{ReplayOutcome, ReplayStatus, Replayer};
pub use shrinker::{Shrinker, ShrinkerOutcome, ShrinkerStatus};
pub use transformation::{Transform, Transformation, TransformationSequence};
