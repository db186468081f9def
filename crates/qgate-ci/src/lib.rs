//! qgate CI - quality-gate pipeline orchestration
//!
//! Runs a policy profile's stages (fmt, clippy, build, doc, doc-tests, tests)
//! across a toolchain matrix:
//! - Expands matrix axes into configurations
//! - Runs each configuration's stages in order, fail-fast, as a tokio task
//! - Aggregates run outcomes into a single gate verdict

pub mod config;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod gate;
pub mod matrix;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod profile;
pub mod reporting;
pub mod runner;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use config::OrchestratorConfig;
pub use error::{QgateError, QgateResult};
pub use executor::{ExecError, Invocation, ProcessExecutor, ProcessOutput, TokioExecutor};
pub use gate::{CiGate, GateVerdict};
pub use matrix::{Axis, Configuration, MatrixAxes, MatrixExpander, TOOLCHAIN_AXIS};
pub use orchestrator::{AggregateOutcome, AggregateReport, Orchestrator};
pub use pipeline::{CancelSignal, PipelineOptions, PipelineRunner, RunOutcome, RunReport};
pub use plan::{PipelinePlan, PlannedStage};
pub use profile::{stages_for, stages_for_with, PolicyProfile, ProfileOptions, TestTool};
pub use runner::{StageResult, StageRunner};
pub use stage::{BuiltinStage, FailureReason, StageOutcome, StageSpec, SuccessPredicate};
pub use telemetry::init_tracing;
