//! Pipeline compilation, persistence and interpretation.
//!
//! - `compiler` -- plan metadata to instruction program, validation
//! - `store` -- `*.pipeline.yaml` save/load with per-file skip-on-error
//! - `condition` -- `SKIP` condition evaluation over a JSON context
//! - `lifecycle` -- broadcast source of lifecycle events for `WAIT`
//! - `executor` -- instruction-pointer interpreter and scheduled runs

pub mod compiler;
pub mod condition;
pub mod executor;
pub mod lifecycle;
pub mod store;

pub use compiler::{PipelineError, compile_pipeline, compile_pipeline_with_default, validate_pipeline};
pub use executor::{
    ExecutionPolicy, ExecutorState, PipelineExecutionResult, PipelineExecutor, run_scheduled,
};
pub use lifecycle::LifecycleBus;
pub use store::{load_phase_pipelines, load_pipelines, save_pipeline};
