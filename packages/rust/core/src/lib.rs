//! Pipeline definitions and the branching orchestrator for enrichkit.
//!
//! This crate provides:
//! - [`PipelineDefinition`]: branches of steps wired by reference names
//! - [`ExecutionContext`]: per-run reference map and trace
//! - [`Orchestrator`]: assembles steps against a plugin registry and runs them

pub mod context;
pub mod definition;
pub mod observer;
pub mod orchestrator;

pub use context::{
    BranchTrace, ExecutionContext, PREVIEW_LIMIT, RunSnapshot, RunState, StepStatus, StepTrace,
    TraceError,
};
pub use definition::{Branch, InputRef, PipelineDefinition, SEED_PLUGIN, StepDefinition};
pub use observer::{RunObserver, SilentObserver};
pub use orchestrator::{AssembledPipeline, Orchestrator};
