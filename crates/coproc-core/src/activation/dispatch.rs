//! Activation dispatcher.
//!
//! Routes a `MOVE` to the collaborator its target and mode need:
//!
//! | target | mode            | needs                          | token estimate          |
//! |--------|-----------------|--------------------------------|-------------------------|
//! | skill  | lite            | skill resolver                 | fixed (200 by default)  |
//! | skill  | full            | skill resolver (content)       | ceil(content chars / 4) |
//! | skill  | offload         | script resolver + executor     | ceil(stdout chars / 4)  |
//! | script | offload         | script resolver + executor     | ceil(stdout chars / 4)  |
//! | script | lite, full      | script resolver                | fixed                   |
//! | team   | lite/full/offl. | team resolver                  | none                    |
//! | any    | async           | (background dispatch)          | none                    |
//!
//! `activate` never fails: a missing collaborator, an unknown name or a
//! nonzero exit code all come back as `ActivationResult { status: Failure }`.
//!
//! Async activations return success immediately. The real dispatch runs on a
//! spawned task; if it fails, the failure is logged and published on the
//! message bus as an `observation` message instead of being lost.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use coproc_types::activation::{ActivationResult, OffloadOperation};
use coproc_types::config::KernelConfig;
use coproc_types::error::SignalError;
use coproc_types::instruction::{ActivationMode, Instruction, MoveTarget};
use coproc_types::message::MessageType;
use serde_json::json;

use crate::budget::BudgetManager;
use crate::message::bus::MessageBus;
use crate::message::envelope::{MessageDraft, create_message};
use crate::signal::{TeamSignals, signal_bit};

use super::resolver::{OffloadExecutor, ScriptResolver, SkillResolver, TeamResolver};

/// Default token estimate for `lite` activations.
pub const DEFAULT_LITE_TOKEN_ESTIMATE: u64 = 200;

/// Default characters-per-token ratio for content-based estimates.
pub const DEFAULT_CHARS_PER_TOKEN: u64 = 4;

/// Budget manager shared between the dispatcher and its host.
pub type SharedBudget = Arc<Mutex<BudgetManager>>;

#[derive(Clone)]
struct BudgetHook {
    manager: SharedBudget,
    engine: String,
}

#[derive(Clone)]
struct CompletionSignal {
    signals: Arc<TeamSignals>,
    bit: u32,
}

/// Routes instructions to concrete activations.
///
/// Cheap to clone: every collaborator is behind an `Arc`.
#[derive(Clone)]
pub struct ActivationDispatcher {
    skills: Option<Arc<dyn SkillResolver>>,
    scripts: Option<Arc<dyn ScriptResolver>>,
    teams: Option<Arc<dyn TeamResolver>>,
    executor: Option<Arc<dyn OffloadExecutor>>,
    budget: Option<BudgetHook>,
    completion: Option<CompletionSignal>,
    bus: Option<MessageBus>,
    origin: String,
    lite_estimate: u64,
    chars_per_token: u64,
}

impl ActivationDispatcher {
    /// A dispatcher with no collaborators; every synchronous activation
    /// fails until resolvers are attached.
    pub fn new() -> Self {
        Self {
            skills: None,
            scripts: None,
            teams: None,
            executor: None,
            budget: None,
            completion: None,
            bus: None,
            origin: "activation".to_string(),
            lite_estimate: DEFAULT_LITE_TOKEN_ESTIMATE,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new()
            .with_lite_estimate(config.lite_token_estimate)
            .with_chars_per_token(config.chars_per_token)
    }

    pub fn with_skill_resolver(mut self, resolver: Arc<dyn SkillResolver>) -> Self {
        self.skills = Some(resolver);
        self
    }

    pub fn with_script_resolver(mut self, resolver: Arc<dyn ScriptResolver>) -> Self {
        self.scripts = Some(resolver);
        self
    }

    pub fn with_team_resolver(mut self, resolver: Arc<dyn TeamResolver>) -> Self {
        self.teams = Some(resolver);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn OffloadExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Charge successful token estimates to `engine`.
    pub fn with_budget(mut self, manager: SharedBudget, engine: impl Into<String>) -> Self {
        self.budget = Some(BudgetHook {
            manager,
            engine: engine.into(),
        });
        self
    }

    /// Raise `bit` on `signals` after every successful activation.
    pub fn with_completion_signal(
        mut self,
        signals: Arc<TeamSignals>,
        bit: u32,
    ) -> Result<Self, SignalError> {
        signal_bit(bit)?;
        self.completion = Some(CompletionSignal { signals, bit });
        Ok(self)
    }

    /// Publish swallowed background failures on `bus`.
    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sender name used on observation messages.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_lite_estimate(mut self, tokens: u64) -> Self {
        self.lite_estimate = tokens;
        self
    }

    pub fn with_chars_per_token(mut self, chars: u64) -> Self {
        self.chars_per_token = chars.max(1);
        self
    }

    /// Activate a `MOVE`. Other instructions are reported as skipped.
    pub async fn activate(&self, instruction: &Instruction) -> ActivationResult {
        match instruction {
            Instruction::Move { target, name, mode } => {
                self.activate_target(*target, name, *mode).await
            }
            other => ActivationResult::skipped(
                MoveTarget::Skill,
                other.to_string(),
                ActivationMode::default(),
            ),
        }
    }

    /// Activate `name` as `target` at fidelity `mode`.
    pub async fn activate_target(
        &self,
        target: MoveTarget,
        name: &str,
        mode: ActivationMode,
    ) -> ActivationResult {
        if mode == ActivationMode::Async {
            return self.spawn_background(target, name.to_string());
        }
        self.dispatch(target, name, mode).await
    }

    // -----------------------------------------------------------------------
    // Synchronous dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(&self, target: MoveTarget, name: &str, mode: ActivationMode) -> ActivationResult {
        let started = Instant::now();
        let result = match (target, mode) {
            (MoveTarget::Team, _) => self.activate_team(name, mode).await,
            (MoveTarget::Skill, ActivationMode::Offload) => self.offload_skill(name).await,
            (MoveTarget::Script, ActivationMode::Offload) => self.offload_script(name).await,
            (MoveTarget::Script, _) => self.resolve_script_only(name, mode).await,
            (MoveTarget::Skill, _) => self.activate_skill(name, mode).await,
        };
        let result = result.with_duration_ms(elapsed_ms(started));

        if result.is_success() {
            self.after_success(&result);
        }
        tracing::debug!(
            target_kind = %result.target,
            name = %result.name,
            mode = %result.mode,
            status = %result.status,
            duration_ms = result.duration_ms,
            "activation dispatched"
        );
        result
    }

    async fn activate_skill(&self, name: &str, mode: ActivationMode) -> ActivationResult {
        let target = MoveTarget::Skill;
        let Some(skills) = &self.skills else {
            return ActivationResult::failure(target, name, mode, "no skill resolver configured");
        };
        match skills.resolve_skill(name).await {
            Ok(Some(skill)) => {
                let estimate = match mode {
                    ActivationMode::Lite => self.lite_estimate,
                    _ => self.estimate_tokens(&skill.content),
                };
                ActivationResult::success(target, name, mode, Some(estimate))
            }
            Ok(None) => ActivationResult::failure(target, name, mode, not_found(target, name)),
            Err(e) => ActivationResult::failure(
                target,
                name,
                mode,
                format!("skill resolver failed for '{name}': {e}"),
            ),
        }
    }

    /// Offload a skill: it must have been promoted to a script.
    async fn offload_skill(&self, name: &str) -> ActivationResult {
        let target = MoveTarget::Skill;
        let mode = ActivationMode::Offload;

        if let Some(scripts) = &self.scripts {
            match scripts.resolve_script(name).await {
                Ok(Some(operation)) => return self.run_offload(target, name, &operation).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(skill = name, error = %e, "promoted script lookup failed");
                }
            }
        }

        let Some(skills) = &self.skills else {
            return ActivationResult::failure(target, name, mode, "no skill resolver configured");
        };
        match skills.resolve_skill(name).await {
            Ok(Some(_)) => ActivationResult::failure(target, name, mode, not_promoted(name)),
            Ok(None) => ActivationResult::failure(target, name, mode, not_found(target, name)),
            Err(e) => ActivationResult::failure(
                target,
                name,
                mode,
                format!("skill resolver failed for '{name}': {e}"),
            ),
        }
    }

    async fn offload_script(&self, name: &str) -> ActivationResult {
        let target = MoveTarget::Script;
        let mode = ActivationMode::Offload;
        let Some(scripts) = &self.scripts else {
            return ActivationResult::failure(target, name, mode, "no script resolver configured");
        };
        if self.executor.is_none() {
            return ActivationResult::failure(target, name, mode, "no offload executor configured");
        }
        match scripts.resolve_script(name).await {
            Ok(Some(operation)) => self.run_offload(target, name, &operation).await,
            Ok(None) => ActivationResult::failure(target, name, mode, not_found(target, name)),
            Err(e) => ActivationResult::failure(
                target,
                name,
                mode,
                format!("script resolver failed for '{name}': {e}"),
            ),
        }
    }

    async fn resolve_script_only(&self, name: &str, mode: ActivationMode) -> ActivationResult {
        let target = MoveTarget::Script;
        let Some(scripts) = &self.scripts else {
            return ActivationResult::failure(target, name, mode, "no script resolver configured");
        };
        match scripts.resolve_script(name).await {
            Ok(Some(_)) => ActivationResult::success(target, name, mode, Some(self.lite_estimate)),
            Ok(None) => ActivationResult::failure(target, name, mode, not_found(target, name)),
            Err(e) => ActivationResult::failure(
                target,
                name,
                mode,
                format!("script resolver failed for '{name}': {e}"),
            ),
        }
    }

    async fn run_offload(
        &self,
        target: MoveTarget,
        name: &str,
        operation: &OffloadOperation,
    ) -> ActivationResult {
        let mode = ActivationMode::Offload;
        let Some(executor) = &self.executor else {
            return ActivationResult::failure(target, name, mode, "no offload executor configured");
        };
        match executor.execute_offload(operation).await {
            Ok(outcome) if outcome.exit_code == 0 => ActivationResult::success(
                target,
                name,
                mode,
                Some(self.estimate_tokens(&outcome.stdout)),
            ),
            Ok(outcome) => {
                let mut error = format!(
                    "offload '{}' exited with code {}",
                    operation.name, outcome.exit_code
                );
                let stderr = outcome.stderr.trim();
                if !stderr.is_empty() {
                    error.push_str(": ");
                    error.push_str(stderr);
                }
                ActivationResult::failure(target, name, mode, error)
            }
            Err(e) => ActivationResult::failure(
                target,
                name,
                mode,
                format!("offload '{}' failed to execute: {e}", operation.name),
            ),
        }
    }

    async fn activate_team(&self, name: &str, mode: ActivationMode) -> ActivationResult {
        let target = MoveTarget::Team;
        let Some(teams) = &self.teams else {
            return ActivationResult::failure(target, name, mode, "no team resolver configured");
        };
        match teams.resolve_team(name).await {
            Ok(Some(team)) => {
                tracing::debug!(team = %team.name, members = team.members.len(), "team resolved");
                ActivationResult::success(target, name, mode, None)
            }
            Ok(None) => ActivationResult::failure(target, name, mode, not_found(target, name)),
            Err(e) => ActivationResult::failure(
                target,
                name,
                mode,
                format!("team resolver failed for '{name}': {e}"),
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn after_success(&self, result: &ActivationResult) {
        if let (Some(hook), Some(tokens)) = (&self.budget, result.token_estimate) {
            let mut manager = hook.manager.lock().expect("budget manager lock poisoned");
            if let Err(e) = manager.spend(&hook.engine, tokens) {
                tracing::warn!(engine = %hook.engine, error = %e, "could not charge activation tokens");
            }
        }
        if let Some(completion) = &self.completion {
            if let Err(e) = completion.signals.signal(completion.bit) {
                tracing::warn!(chip = completion.signals.chip_name(), error = %e, "completion signal failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Async mode
    // -----------------------------------------------------------------------

    fn spawn_background(&self, target: MoveTarget, name: String) -> ActivationResult {
        let background_mode = match target {
            MoveTarget::Script => ActivationMode::Offload,
            MoveTarget::Skill | MoveTarget::Team => ActivationMode::Full,
        };
        let dispatcher = self.clone();
        let task_name = name.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(target, &task_name, background_mode).await;
            if result.is_failure() {
                dispatcher.report_background_failure(&result);
            }
        });
        ActivationResult::success(target, name, ActivationMode::Async, None)
    }

    fn report_background_failure(&self, result: &ActivationResult) {
        let error = result.error.as_deref().unwrap_or("unknown error");
        tracing::warn!(
            target_kind = %result.target,
            name = %result.name,
            error,
            "background activation failed"
        );
        let Some(bus) = &self.bus else {
            return;
        };
        let draft = MessageDraft::new(
            MessageType::Observation,
            self.origin.clone(),
            "host",
            json!({
                "event": "async-activation-failed",
                "result": result,
            }),
        );
        match create_message(draft) {
            Ok(message) => bus.publish(message),
            Err(e) => tracing::warn!(error = %e, "could not build observation message"),
        }
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(self.chars_per_token)
    }
}

impl Default for ActivationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActivationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationDispatcher")
            .field("skills", &self.skills.is_some())
            .field("scripts", &self.scripts.is_some())
            .field("teams", &self.teams.is_some())
            .field("executor", &self.executor.is_some())
            .field("budget", &self.budget.as_ref().map(|b| b.engine.as_str()))
            .field("lite_estimate", &self.lite_estimate)
            .field("chars_per_token", &self.chars_per_token)
            .finish()
    }
}

fn not_found(target: MoveTarget, name: &str) -> String {
    format!("{target} '{name}' not found")
}

fn not_promoted(name: &str) -> String {
    format!("skill '{name}' exists but is not promoted to a script")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::resolver::InMemoryResolver;
    use coproc_types::activation::{ActivationStatus, OffloadOutcome, ResolvedSkill};
    use futures_util::future::BoxFuture;
    use std::time::Duration;

    /// Executor that exits with a fixed code and echoes the command.
    struct FixedExit(i32);

    impl OffloadExecutor for FixedExit {
        fn execute_offload<'a>(
            &'a self,
            operation: &'a OffloadOperation,
        ) -> BoxFuture<'a, anyhow::Result<OffloadOutcome>> {
            Box::pin(async move {
                Ok(OffloadOutcome {
                    exit_code: self.0,
                    stdout: format!("ran {}", operation.command),
                    stderr: if self.0 == 0 { String::new() } else { "boom".to_string() },
                    duration_ms: 1,
                })
            })
        }
    }

    /// Skill resolver that takes a while and then errors.
    struct SlowFailingResolver;

    impl SkillResolver for SlowFailingResolver {
        fn resolve_skill<'a>(
            &'a self,
            _name: &'a str,
        ) -> BoxFuture<'a, anyhow::Result<Option<ResolvedSkill>>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                anyhow::bail!("index unavailable")
            })
        }
    }

    fn resolver() -> Arc<InMemoryResolver> {
        Arc::new(
            InMemoryResolver::new()
                .with_skill("review", "x".repeat(401))
                .with_skill("plain", "content")
                .with_script("review", "review.sh")
                .with_script("lint", "lint.sh")
                .with_team("qa", &["tester"]),
        )
    }

    fn full_dispatcher(exit_code: i32) -> ActivationDispatcher {
        let r = resolver();
        ActivationDispatcher::new()
            .with_skill_resolver(r.clone())
            .with_script_resolver(r.clone())
            .with_team_resolver(r)
            .with_executor(Arc::new(FixedExit(exit_code)))
    }

    fn mv(target: MoveTarget, name: &str, mode: ActivationMode) -> Instruction {
        Instruction::activate(target, name, mode)
    }

    #[tokio::test]
    async fn lite_reports_fixed_estimate() {
        let result = full_dispatcher(0)
            .activate(&mv(MoveTarget::Skill, "plain", ActivationMode::Lite))
            .await;
        assert_eq!(result.status, ActivationStatus::Success);
        assert_eq!(result.token_estimate, Some(200));
    }

    #[tokio::test]
    async fn full_estimates_from_content_length() {
        let result = full_dispatcher(0)
            .activate(&mv(MoveTarget::Skill, "review", ActivationMode::Full))
            .await;
        assert!(result.is_success());
        // ceil(401 / 4)
        assert_eq!(result.token_estimate, Some(101));
    }

    #[tokio::test]
    async fn missing_resolvers_fail_without_panicking() {
        let dispatcher = ActivationDispatcher::new();
        let cases = [
            (MoveTarget::Skill, ActivationMode::Lite, "no skill resolver"),
            (MoveTarget::Skill, ActivationMode::Full, "no skill resolver"),
            (MoveTarget::Skill, ActivationMode::Offload, "no skill resolver"),
            (MoveTarget::Script, ActivationMode::Offload, "no script resolver"),
            (MoveTarget::Team, ActivationMode::Full, "no team resolver"),
        ];
        for (target, mode, expected) in cases {
            let result = dispatcher.activate(&mv(target, "x", mode)).await;
            assert!(result.is_failure(), "{target} {mode}");
            assert!(
                result.error.as_deref().unwrap().contains(expected),
                "got {:?}",
                result.error
            );
        }
    }

    #[tokio::test]
    async fn script_offload_needs_executor() {
        let r = resolver();
        let dispatcher = ActivationDispatcher::new().with_script_resolver(r);
        let result = dispatcher
            .activate(&mv(MoveTarget::Script, "lint", ActivationMode::Offload))
            .await;
        assert!(result.is_failure());
        assert!(result.error.unwrap().contains("no offload executor"));
    }

    #[tokio::test]
    async fn offload_exit_code_decides_status() {
        let ok = full_dispatcher(0)
            .activate(&mv(MoveTarget::Script, "lint", ActivationMode::Offload))
            .await;
        assert!(ok.is_success());
        // "ran lint.sh" = 11 chars
        assert_eq!(ok.token_estimate, Some(3));

        let failed = full_dispatcher(3)
            .activate(&mv(MoveTarget::Script, "lint", ActivationMode::Offload))
            .await;
        assert!(failed.is_failure());
        let error = failed.error.unwrap();
        assert!(error.contains("exited with code 3"), "got {error}");
        assert!(error.contains("boom"));
    }

    #[tokio::test]
    async fn promoted_skill_offloads_through_script() {
        let result = full_dispatcher(0)
            .activate(&mv(MoveTarget::Skill, "review", ActivationMode::Offload))
            .await;
        assert!(result.is_success());
        assert_eq!(result.target, MoveTarget::Skill);
    }

    #[tokio::test]
    async fn unpromoted_skill_is_distinct_from_missing_skill() {
        let dispatcher = full_dispatcher(0);
        let unpromoted = dispatcher
            .activate(&mv(MoveTarget::Skill, "plain", ActivationMode::Offload))
            .await;
        let missing = dispatcher
            .activate(&mv(MoveTarget::Skill, "ghost", ActivationMode::Offload))
            .await;

        let unpromoted = unpromoted.error.unwrap();
        let missing = missing.error.unwrap();
        assert!(unpromoted.contains("not promoted"), "got {unpromoted}");
        assert!(!unpromoted.contains("not found"));
        assert!(missing.contains("not found"), "got {missing}");
        assert_ne!(unpromoted, missing);
    }

    #[tokio::test]
    async fn team_target_succeeds_once_resolved() {
        let dispatcher = full_dispatcher(0);
        let found = dispatcher
            .activate(&mv(MoveTarget::Team, "qa", ActivationMode::Full))
            .await;
        assert!(found.is_success());
        assert_eq!(found.token_estimate, None);

        let missing = dispatcher
            .activate(&mv(MoveTarget::Team, "ops", ActivationMode::Full))
            .await;
        assert!(missing.error.unwrap().contains("team 'ops' not found"));
    }

    #[tokio::test]
    async fn non_move_instructions_are_skipped() {
        let result = full_dispatcher(0)
            .activate(&Instruction::wait("phase-start"))
            .await;
        assert_eq!(result.status, ActivationStatus::Skipped);
    }

    #[tokio::test]
    async fn async_mode_returns_immediately_and_reports_failure_on_bus() {
        let bus = MessageBus::new(16);
        let mut rx = bus.subscribe();
        let dispatcher = ActivationDispatcher::new()
            .with_skill_resolver(Arc::new(SlowFailingResolver))
            .with_bus(bus)
            .with_origin("team-alpha");

        let started = Instant::now();
        let result = dispatcher
            .activate(&mv(MoveTarget::Skill, "review", ActivationMode::Async))
            .await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(result.status, ActivationStatus::Success);
        assert_eq!(result.mode, ActivationMode::Async);
        assert!(result.duration_ms < 50);

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("observation should arrive")
            .unwrap();
        assert_eq!(message.message_type, MessageType::Observation);
        assert_eq!(message.sender, "team-alpha");
        assert_eq!(message.payload["result"]["status"], "failure");
        assert!(
            message.payload["result"]["error"]
                .as_str()
                .unwrap()
                .contains("index unavailable")
        );
    }

    #[tokio::test]
    async fn success_charges_budget_and_raises_completion_bit() {
        let budget: SharedBudget = Arc::new(Mutex::new(BudgetManager::new(10_000, 0)));
        budget.lock().unwrap().register_engine("alpha", 50).unwrap();
        let signals = Arc::new(TeamSignals::new("alpha"));

        let dispatcher = full_dispatcher(0)
            .with_budget(budget.clone(), "alpha")
            .with_completion_signal(signals.clone(), 4)
            .unwrap();

        dispatcher
            .activate(&mv(MoveTarget::Skill, "plain", ActivationMode::Lite))
            .await;
        assert_eq!(budget.lock().unwrap().status("alpha").unwrap().spent, 200);
        assert!(signals.is_set(4).unwrap());

        signals.clear(4).unwrap();
        let failed = dispatcher
            .activate(&mv(MoveTarget::Skill, "ghost", ActivationMode::Lite))
            .await;
        assert!(failed.is_failure());
        assert_eq!(budget.lock().unwrap().status("alpha").unwrap().spent, 200);
        assert!(!signals.is_set(4).unwrap());
    }

    #[tokio::test]
    async fn async_success_is_observable_through_completion_signal() {
        let signals = Arc::new(TeamSignals::new("alpha"));
        let dispatcher = full_dispatcher(0)
            .with_completion_signal(signals.clone(), 1)
            .unwrap();
        let result = dispatcher
            .activate(&mv(MoveTarget::Skill, "plain", ActivationMode::Async))
            .await;
        assert!(result.is_success());
        let bit = tokio::time::timeout(Duration::from_secs(5), signals.wait(1 << 1))
            .await
            .unwrap();
        assert_eq!(bit, Ok(1));
    }

    #[test]
    fn completion_signal_bit_is_validated() {
        let signals = Arc::new(TeamSignals::new("alpha"));
        assert!(
            ActivationDispatcher::new()
                .with_completion_signal(signals, 32)
                .is_err()
        );
    }
}
