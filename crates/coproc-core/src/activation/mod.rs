//! Activation dispatch: turning one `MOVE` into a concrete activation.
//!
//! - `resolver` -- object-safe traits for the host's skill, script and team
//!   resolvers and its offload executor, plus an in-memory resolver
//! - `dispatch` -- the `ActivationDispatcher` routing each mode/target pair

pub mod dispatch;
pub mod resolver;

pub use dispatch::{ActivationDispatcher, SharedBudget};
pub use resolver::{InMemoryResolver, OffloadExecutor, ScriptResolver, SkillResolver, TeamResolver};
