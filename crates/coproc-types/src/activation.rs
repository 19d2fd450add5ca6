//! Activation domain types.
//!
//! An [`ActivationResult`] is the record of one `MOVE` dispatch. It is
//! always produced -- failures are data, never errors. The remaining types
//! are what host-supplied resolvers and executors hand back to the
//! dispatcher.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::instruction::{ActivationMode, MoveTarget};

// ---------------------------------------------------------------------------
// ActivationResult
// ---------------------------------------------------------------------------

/// Outcome of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Success,
    Failure,
    Skipped,
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Record of a single `MOVE` dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub status: ActivationStatus,
    pub mode: ActivationMode,
    pub target: MoveTarget,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_estimate: Option<u64>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationResult {
    pub fn success(
        target: MoveTarget,
        name: impl Into<String>,
        mode: ActivationMode,
        token_estimate: Option<u64>,
    ) -> Self {
        Self {
            status: ActivationStatus::Success,
            mode,
            target,
            name: name.into(),
            token_estimate,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn failure(
        target: MoveTarget,
        name: impl Into<String>,
        mode: ActivationMode,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: ActivationStatus::Failure,
            mode,
            target,
            name: name.into(),
            token_estimate: None,
            duration_ms: 0,
            error: Some(error.into()),
        }
    }

    pub fn skipped(target: MoveTarget, name: impl Into<String>, mode: ActivationMode) -> Self {
        Self {
            status: ActivationStatus::Skipped,
            mode,
            target,
            name: name.into(),
            token_estimate: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActivationStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == ActivationStatus::Failure
    }
}

// ---------------------------------------------------------------------------
// Collaborator payloads
// ---------------------------------------------------------------------------

/// A skill located by the host's skill resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSkill {
    pub path: PathBuf,
    pub content: String,
}

/// A team located by the host's team resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTeam {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// A script invocation the offload executor knows how to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadOperation {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// What the offload executor reports after running an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadOutcome {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub duration_ms: u64,
}
