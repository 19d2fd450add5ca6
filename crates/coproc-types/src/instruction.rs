//! Pipeline instruction set.
//!
//! A pipeline is a linear program of three instruction kinds:
//!
//! - `WAIT` suspends until a named lifecycle event arrives.
//! - `MOVE` activates a skill, script or team at a given fidelity.
//! - `SKIP` conditionally jumps over the instruction that follows it.
//!
//! Instructions are internally tagged by `type` to match the pipeline file
//! format:
//!
//! ```json
//! { "type": "move", "target": "skill", "name": "code-review", "mode": "lite" }
//! ```

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// One instruction of a compiled pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    /// Suspend until the named lifecycle event is emitted.
    Wait { event: String },
    /// Activate a target.
    Move {
        #[serde(default)]
        target: MoveTarget,
        name: String,
        #[serde(default)]
        mode: ActivationMode,
    },
    /// Skip the next instruction when the condition holds.
    Skip { condition: SkipCondition },
}

impl Instruction {
    pub fn wait(event: impl Into<String>) -> Self {
        Instruction::Wait {
            event: event.into(),
        }
    }

    pub fn activate(target: MoveTarget, name: impl Into<String>, mode: ActivationMode) -> Self {
        Instruction::Move {
            target,
            name: name.into(),
            mode,
        }
    }

    pub fn skip_if(condition: SkipCondition) -> Self {
        Instruction::Skip { condition }
    }

    /// Short opcode name used in logs.
    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Wait { .. } => "WAIT",
            Instruction::Move { .. } => "MOVE",
            Instruction::Skip { .. } => "SKIP",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Wait { event } => write!(f, "WAIT {event}"),
            Instruction::Move { target, name, mode } => {
                write!(f, "MOVE {target}:{name} ({mode})")
            }
            Instruction::Skip { condition } => write!(
                f,
                "SKIP if {} {} {}",
                condition.field, condition.operator, condition.value
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// MOVE operands
// ---------------------------------------------------------------------------

/// What a `MOVE` instruction activates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MoveTarget {
    #[default]
    Skill,
    Script,
    Team,
}

impl fmt::Display for MoveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skill => write!(f, "skill"),
            Self::Script => write!(f, "script"),
            Self::Team => write!(f, "team"),
        }
    }
}

/// Fidelity at which a target is activated.
///
/// - `Lite`: resolve only, fixed token estimate.
/// - `Full`: resolve and load content; estimate derived from content size.
/// - `Offload`: run as a script through the offload executor.
/// - `Async`: fire-and-forget; returns immediately and dispatches in the background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    Lite,
    #[default]
    Full,
    Offload,
    Async,
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lite => write!(f, "lite"),
            Self::Full => write!(f, "full"),
            Self::Offload => write!(f, "offload"),
            Self::Async => write!(f, "async"),
        }
    }
}

// ---------------------------------------------------------------------------
// SKIP operands
// ---------------------------------------------------------------------------

/// Condition evaluated against the executor's context by a `SKIP`.
///
/// `field` is a dotted path into the context object (e.g. `plan.tests_passed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkipCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl SkipCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Comparison applied by a [`SkipCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// String contains substring, or array contains element.
    Contains,
    /// Field is present and not null.
    Exists,
    /// Field is absent or null.
    NotExists,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_move_defaults_to_full_skill() {
        let parsed: Instruction =
            serde_json::from_str(r#"{"type": "move", "name": "code-review"}"#).unwrap();
        assert_eq!(
            parsed,
            Instruction::activate(MoveTarget::Skill, "code-review", ActivationMode::Full)
        );
    }

    #[test]
    fn test_instruction_tagging_matches_file_format() {
        let wait = serde_json::to_value(Instruction::wait("phase-start")).unwrap();
        assert_eq!(wait, json!({"type": "wait", "event": "phase-start"}));

        let skip = Instruction::skip_if(SkipCondition::new(
            "plan.tests_passed",
            ConditionOperator::Eq,
            json!(true),
        ));
        let value = serde_json::to_value(&skip).unwrap();
        assert_eq!(value["type"], "skip");
        assert_eq!(value["condition"]["operator"], "eq");
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let result: Result<Instruction, _> =
            serde_json::from_str(r#"{"type": "move", "name": "x", "mode": "turbo"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_display_is_readable() {
        let ins = Instruction::activate(MoveTarget::Script, "lint", ActivationMode::Offload);
        assert_eq!(ins.to_string(), "MOVE script:lint (offload)");
        assert_eq!(ins.opcode(), "MOVE");
    }
}
