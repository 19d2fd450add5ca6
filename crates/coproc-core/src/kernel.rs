//! Kernel facade.
//!
//! Keeps the scheduler, the budget manager and the per-team signal registers
//! in lockstep under one [`TeamId`], and wires them to the message and
//! lifecycle buses:
//!
//! - registering a team adds it to all three (and rolls back on failure);
//! - an engine going over budget publishes a `budget-exceeded` message;
//! - `signal-forward` messages set a bit on the receiver's register and are
//!   acknowledged with `signal-ack` when they carry a reply port;
//! - per-team dispatchers charge that team's budget and report background
//!   failures under the team's name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coproc_types::budget::BudgetStatus;
use coproc_types::config::KernelConfig;
use coproc_types::error::{BudgetError, SchedulerError, SignalError};
use coproc_types::message::{KernelMessage, MessageType};
use coproc_types::pipeline::{Pipeline, PlanMetadata};
use coproc_types::scheduler::SchedulerEntry;
use coproc_types::team::TeamId;
use dashmap::DashMap;
use serde_json::{Value, json};
use thiserror::Error;

use crate::activation::{ActivationDispatcher, SharedBudget};
use crate::budget::BudgetManager;
use crate::message::{
    MessageBus, MessageDraft, MessageError, ReplyDraft, create_message, create_reply,
};
use crate::pipeline::{
    ExecutionPolicy, LifecycleBus, PipelineError, PipelineExecutionResult,
    compile_pipeline_with_default, run_scheduled,
};
use crate::scheduler::Scheduler;
use crate::signal::TeamSignals;

/// Sender name of messages the kernel itself originates.
pub const KERNEL_SENDER: &str = "kernel";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("team '{0}' is not registered")]
    UnknownTeam(TeamId),

    #[error("expected a {expected} message, got {actual}")]
    UnexpectedMessage {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("invalid message payload: {0}")]
    InvalidPayload(String),
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

pub struct Kernel {
    config: KernelConfig,
    scheduler: Scheduler,
    budget: SharedBudget,
    signals: DashMap<TeamId, Arc<TeamSignals>>,
    bus: MessageBus,
    lifecycle: LifecycleBus,
    dispatcher: ActivationDispatcher,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let config = config.normalized();
        let bus = MessageBus::new(config.bus_capacity);
        let lifecycle = LifecycleBus::new(config.bus_capacity);

        let mut manager = BudgetManager::from_config(&config);
        let exceeded_bus = bus.clone();
        manager.on_exceeded(move |status| publish_budget_exceeded(&exceeded_bus, status));

        Self {
            dispatcher: ActivationDispatcher::from_config(&config),
            config,
            scheduler: Scheduler::new(),
            budget: Arc::new(Mutex::new(manager)),
            signals: DashMap::new(),
            bus,
            lifecycle,
        }
    }

    /// Base dispatcher (resolvers, executor) that per-team dispatchers are
    /// derived from.
    pub fn with_dispatcher(mut self, dispatcher: ActivationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // -- Teams ---------------------------------------------------------------

    /// Register a team with the scheduler, the budget manager and the signal
    /// registry. Returns the team's token allocation.
    ///
    /// If any registration fails the earlier ones are undone.
    pub fn register_team(
        &mut self,
        team: TeamId,
        priority: i32,
        budget_percent: u8,
    ) -> Result<u64, KernelError> {
        self.scheduler.add(team.as_str(), priority)?;

        let registered = self
            .lock_budget()
            .register_engine(team.as_str(), budget_percent);
        let allocation = match registered {
            Ok(allocation) => allocation,
            Err(e) => {
                // Roll back the scheduler registration.
                let _ = self.scheduler.remove(team.as_str());
                return Err(e.into());
            }
        };

        self.signals
            .insert(team.clone(), Arc::new(TeamSignals::new(team.as_str())));
        tracing::info!(team = %team, priority, budget_percent, allocation, "team registered");
        Ok(allocation)
    }

    /// Remove a team everywhere. Pending signal waits are rejected with a
    /// reset error and its burst borrowing is refunded.
    pub fn unregister_team(&mut self, team: &TeamId) -> Result<SchedulerEntry, KernelError> {
        let entry = self.scheduler.remove(team.as_str())?;
        if let Err(e) = self.lock_budget().unregister_engine(team.as_str()) {
            tracing::warn!(team = %team, error = %e, "team had no budget entry");
        }
        if let Some((_, signals)) = self.signals.remove(team) {
            signals.reset();
        }
        tracing::info!(team = %team, "team unregistered");
        Ok(entry)
    }

    pub fn signals(&self, team: &TeamId) -> Option<Arc<TeamSignals>> {
        self.signals.get(team).map(|entry| Arc::clone(entry.value()))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Teams to run next, in order.
    pub fn schedule(&mut self) -> Vec<TeamId> {
        self.scheduler.schedule().into_iter().map(TeamId::from).collect()
    }

    // -- Budget --------------------------------------------------------------

    /// The shared budget manager.
    ///
    /// `on_exceeded` callbacks registered through this handle run while the
    /// lock is held and must not lock it again.
    pub fn budget(&self) -> SharedBudget {
        Arc::clone(&self.budget)
    }

    pub fn spend(&self, team: &TeamId, tokens: u64) -> Result<BudgetStatus, KernelError> {
        Ok(self.lock_budget().spend(team.as_str(), tokens)?)
    }

    pub fn budget_status(&self, team: &TeamId) -> Result<BudgetStatus, KernelError> {
        Ok(self.lock_budget().status(team.as_str())?)
    }

    // -- Messaging -----------------------------------------------------------

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn lifecycle(&self) -> &LifecycleBus {
        &self.lifecycle
    }

    /// Emit a lifecycle event to every waiting pipeline.
    pub fn emit(&self, event: impl Into<String>) -> usize {
        self.lifecycle.emit(event)
    }

    /// Apply a `signal-forward` message: set `payload.bit` on the receiver's
    /// register. Returns the bit that was set.
    pub fn forward_signal(&self, message: &KernelMessage) -> Result<u32, KernelError> {
        if message.message_type != MessageType::SignalForward {
            return Err(KernelError::UnexpectedMessage {
                expected: MessageType::SignalForward,
                actual: message.message_type,
            });
        }
        let bit = message
            .payload
            .get("bit")
            .and_then(Value::as_u64)
            .and_then(|bit| u32::try_from(bit).ok())
            .ok_or_else(|| {
                KernelError::InvalidPayload("signal-forward requires a numeric 'bit'".to_string())
            })?;

        let receiver = TeamId::new(message.receiver.as_str());
        let signals = self
            .signals(&receiver)
            .ok_or_else(|| KernelError::UnknownTeam(receiver.clone()))?;
        signals.signal(bit)?;
        tracing::debug!(from = %message.sender, to = %receiver, bit, "signal forwarded");

        if message.expects_reply() {
            let ack = create_reply(
                message,
                ReplyDraft::new(
                    MessageType::SignalAck,
                    receiver.as_str(),
                    json!({ "bit": bit }),
                ),
            )?;
            self.bus.publish(ack);
        }
        Ok(bit)
    }

    // -- Pipelines -----------------------------------------------------------

    /// Compile a plan using the configured default lifecycle event.
    pub fn compile(&self, plan: &PlanMetadata) -> Result<Pipeline, KernelError> {
        Ok(compile_pipeline_with_default(
            plan,
            &self.config.default_lifecycle_event,
        )?)
    }

    /// Dispatcher for one team: charges its budget and reports under its name.
    pub fn dispatcher_for(&self, team: &TeamId) -> ActivationDispatcher {
        team_dispatcher(&self.dispatcher, &self.budget, &self.bus, team.as_str())
    }

    /// Run one scheduling round: the pipelines assigned to the scheduled
    /// teams run concurrently against `context`.
    pub async fn run_round(
        &mut self,
        assignments: &HashMap<TeamId, Vec<Pipeline>>,
        context: &Value,
    ) -> Vec<(TeamId, PipelineExecutionResult)> {
        let by_name: HashMap<String, Vec<Pipeline>> = assignments
            .iter()
            .map(|(team, pipelines)| (team.to_string(), pipelines.clone()))
            .collect();
        let policy = ExecutionPolicy {
            abort_on_failure: self.config.abort_on_failure,
        };

        let Self {
            scheduler,
            budget,
            bus,
            lifecycle,
            dispatcher,
            ..
        } = self;
        let (budget, bus, dispatcher): (&SharedBudget, &MessageBus, &ActivationDispatcher) =
            (budget, bus, dispatcher);
        let results = run_scheduled(
            scheduler,
            &by_name,
            |team| team_dispatcher(dispatcher, budget, bus, team),
            lifecycle,
            policy,
            context,
        )
        .await;

        results
            .into_iter()
            .map(|(team, result)| (TeamId::from(team), result))
            .collect()
    }

    fn lock_budget(&self) -> std::sync::MutexGuard<'_, BudgetManager> {
        self.budget.lock().expect("budget manager lock poisoned")
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("teams", &self.scheduler.len())
            .field("bus", &self.bus)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

fn team_dispatcher(
    base: &ActivationDispatcher,
    budget: &SharedBudget,
    bus: &MessageBus,
    team: &str,
) -> ActivationDispatcher {
    base.clone()
        .with_budget(Arc::clone(budget), team)
        .with_bus(bus.clone())
        .with_origin(team)
}

fn publish_budget_exceeded(bus: &MessageBus, status: &BudgetStatus) {
    let draft = MessageDraft::new(
        MessageType::BudgetExceeded,
        KERNEL_SENDER,
        status.engine.clone(),
        json!(status),
    );
    match create_message(draft) {
        Ok(message) => bus.publish(message),
        Err(e) => tracing::warn!(engine = %status.engine, error = %e, "could not build budget-exceeded message"),
    }
}
