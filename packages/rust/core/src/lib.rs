//! Run orchestration for redline.
//!
//! Ties discovery, conversion and corpus building to a fixed sequence of
//! analysis stages, each executed with bounded retry, and persists the
//! execution log and stage results when the run ends.

pub mod bridge;
pub mod context;
pub mod corpus;
pub mod pipeline;
pub mod runner;
pub mod sink;
pub mod stage;

pub use bridge::{BridgeExecutor, BridgeSettings};
pub use context::{PipelineContext, StageResults};
pub use corpus::CorpusBuilder;
pub use pipeline::{
    Orchestrator, ProgressReporter, RunReport, RunState, SilentProgress, build_corpus,
};
pub use runner::{StageOutcome, StageRunner};
pub use sink::{PersistReport, ResultSink, SinkConfig};
pub use stage::{
    FailureClass, RetryDecision, RetryPolicy, StageError, StageExecutor, StageInput, StageSpec,
    classify, decide, default_stages,
};
