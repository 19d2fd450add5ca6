//! Pipeline interpreter.
//!
//! A `PipelineExecutor` walks one pipeline with its own instruction pointer:
//!
//! ```text
//! idle -> running -> waiting{event} -> running -> ... -> done | faulted
//! ```
//!
//! - `WAIT` blocks until an event with exactly that name arrives on the
//!   executor's lifecycle receiver. Other events are discarded.
//! - `MOVE` is handed to the [`ActivationDispatcher`]; failures are recorded
//!   and the pointer advances unless the policy aborts on failure.
//! - `SKIP` evaluates its condition against the run context; when it holds,
//!   the following instruction is recorded as skipped and not executed.
//!
//! A closed lifecycle source while waiting faults the run. A WAIT on an
//! event that never arrives stalls the run.

use std::collections::HashMap;
use std::time::Instant;

use coproc_types::activation::ActivationResult;
use coproc_types::instruction::{ActivationMode, Instruction, MoveTarget};
use coproc_types::pipeline::Pipeline;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::activation::ActivationDispatcher;
use crate::scheduler::Scheduler;

use super::condition::evaluate_condition;
use super::lifecycle::LifecycleBus;

// ---------------------------------------------------------------------------
// State and results
// ---------------------------------------------------------------------------

/// Instruction-pointer state of an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Running,
    Waiting { event: String },
    Done,
    Faulted,
}

/// How an executor reacts to failed activations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Stop at the first failed `MOVE` and fault the run.
    pub abort_on_failure: bool,
}

/// Aggregate outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecutionResult {
    pub pipeline: String,
    /// `true` when the run reached `done` with no failed activation.
    pub success: bool,
    pub state: ExecutorState,
    /// One entry per executed or skipped `MOVE`, in program order.
    pub results: Vec<ActivationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl PipelineExecutionResult {
    pub fn failures(&self) -> impl Iterator<Item = &ActivationResult> {
        self.results.iter().filter(|r| r.is_failure())
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Interprets a single pipeline.
pub struct PipelineExecutor {
    pipeline: Pipeline,
    dispatcher: ActivationDispatcher,
    events: broadcast::Receiver<String>,
    policy: ExecutionPolicy,
    state: ExecutorState,
    pointer: usize,
}

impl PipelineExecutor {
    /// `events` should be subscribed before the events the pipeline waits
    /// on are emitted; broadcast receivers do not see earlier events.
    pub fn new(
        pipeline: Pipeline,
        dispatcher: ActivationDispatcher,
        events: broadcast::Receiver<String>,
    ) -> Self {
        Self {
            pipeline,
            dispatcher,
            events,
            policy: ExecutionPolicy::default(),
            state: ExecutorState::Idle,
            pointer: 0,
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> &ExecutorState {
        &self.state
    }

    pub fn instruction_pointer(&self) -> usize {
        self.pointer
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run the pipeline from the first instruction to completion.
    pub async fn run(&mut self, context: &Value) -> PipelineExecutionResult {
        let started = Instant::now();
        let name = self.pipeline.name().to_string();
        let mut results = Vec::new();
        let mut error = None;

        self.pointer = 0;
        self.state = ExecutorState::Running;
        tracing::info!(pipeline = %name, instructions = self.pipeline.instructions.len(), "pipeline started");

        while self.pointer < self.pipeline.instructions.len() {
            let instruction = self.pipeline.instructions[self.pointer].clone();
            match instruction {
                Instruction::Wait { event } => {
                    if let Err(e) = self.wait_for(&event).await {
                        error = Some(e);
                        break;
                    }
                    self.pointer += 1;
                }
                Instruction::Move { .. } => {
                    let result = self.dispatcher.activate(&instruction).await;
                    let failed = result.is_failure();
                    if failed {
                        tracing::warn!(
                            pipeline = %name,
                            pointer = self.pointer,
                            instruction = %instruction,
                            error = result.error.as_deref().unwrap_or(""),
                            "activation failed"
                        );
                    }
                    results.push(result);
                    if failed && self.policy.abort_on_failure {
                        error = Some(format!(
                            "aborted at instruction {}: {instruction} failed",
                            self.pointer
                        ));
                        break;
                    }
                    self.pointer += 1;
                }
                Instruction::Skip { condition } => {
                    if evaluate_condition(&condition, context) {
                        if let Some(next) = self.pipeline.instructions.get(self.pointer + 1) {
                            tracing::debug!(pipeline = %name, skipped = %next, "condition held");
                            results.push(skipped_result(next));
                        }
                        self.pointer += 2;
                    } else {
                        self.pointer += 1;
                    }
                }
            }
        }

        self.state = if error.is_some() {
            ExecutorState::Faulted
        } else {
            ExecutorState::Done
        };
        let success = error.is_none() && !results.iter().any(ActivationResult::is_failure);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            pipeline = %name,
            success,
            activations = results.len(),
            duration_ms,
            "pipeline finished"
        );
        PipelineExecutionResult {
            pipeline: name,
            success,
            state: self.state.clone(),
            results,
            error,
            duration_ms,
        }
    }

    async fn wait_for(&mut self, event: &str) -> Result<(), String> {
        self.state = ExecutorState::Waiting {
            event: event.to_string(),
        };
        loop {
            match self.events.recv().await {
                Ok(received) if received == event => break,
                Ok(other) => {
                    tracing::trace!(waiting_for = event, discarded = %other, "ignoring lifecycle event");
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        pipeline = self.pipeline.name(),
                        waiting_for = event,
                        missed,
                        "lifecycle receiver lagged"
                    );
                }
                Err(RecvError::Closed) => {
                    return Err(format!(
                        "lifecycle source closed while waiting for '{event}'"
                    ));
                }
            }
        }
        self.state = ExecutorState::Running;
        Ok(())
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("pipeline", &self.pipeline.name())
            .field("state", &self.state)
            .field("pointer", &self.pointer)
            .field("policy", &self.policy)
            .finish()
    }
}

fn skipped_result(instruction: &Instruction) -> ActivationResult {
    match instruction {
        Instruction::Move { target, name, mode } => {
            ActivationResult::skipped(*target, name.clone(), *mode)
        }
        other => ActivationResult::skipped(
            MoveTarget::Skill,
            other.to_string(),
            ActivationMode::default(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Scheduled execution
// ---------------------------------------------------------------------------

/// Run the pipelines assigned to the teams the scheduler picks next.
///
/// Teams returned by `schedule()` are marked running, their pipelines run
/// concurrently (each with its own lifecycle receiver), then every team
/// finishes its turn without disturbing the rotation `schedule()` already
/// advanced. Results come back in schedule order, then assignment
/// order. Teams without assigned pipelines are left untouched.
pub async fn run_scheduled<F>(
    scheduler: &mut Scheduler,
    assignments: &HashMap<String, Vec<Pipeline>>,
    dispatcher_for: F,
    lifecycle: &LifecycleBus,
    policy: ExecutionPolicy,
    context: &Value,
) -> Vec<(String, PipelineExecutionResult)>
where
    F: Fn(&str) -> ActivationDispatcher,
{
    let order = scheduler.schedule();

    let mut runs = Vec::new();
    let mut claimed = Vec::new();
    for team in order {
        let Some(pipelines) = assignments.get(&team) else {
            continue;
        };
        if let Err(e) = scheduler.set_running(&team) {
            tracing::warn!(team = %team, error = %e, "could not claim scheduled team");
            continue;
        }
        let dispatcher = dispatcher_for(&team);
        for pipeline in pipelines {
            let executor =
                PipelineExecutor::new(pipeline.clone(), dispatcher.clone(), lifecycle.subscribe())
                    .with_policy(policy);
            runs.push((team.clone(), executor));
        }
        claimed.push(team);
    }

    let results = join_all(runs.into_iter().map(|(team, mut executor)| async move {
        let result = executor.run(context).await;
        (team, result)
    }))
    .await;

    for team in claimed {
        if let Err(e) = scheduler.finish_turn(&team) {
            tracing::warn!(team = %team, error = %e, "could not finish team turn");
        }
    }
    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
