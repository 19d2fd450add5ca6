//! Plan-to-pipeline compiler and pipeline validation.
//!
//! A plan lowers to:
//!
//! ```text
//! WAIT <first lifecycle event>          (default: phase-start)
//! [SKIP <condition>] MOVE <skill>       (per declared skill, in order)
//! WAIT <remaining lifecycle events>...
//! ```
//!
//! A pipeline is never empty: if the plan yields no instructions a single
//! `WAIT` on the default event is inserted. Compiled pipelines are validated
//! before they are returned, so a validation failure here means the plan
//! itself is malformed.

use coproc_types::instruction::Instruction;
use coproc_types::pipeline::{DEFAULT_LIFECYCLE_EVENT, Pipeline, PipelineMetadata, PlanMetadata};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while compiling, validating or persisting pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// YAML/JSON decode or encode failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a plan, waiting on `phase-start` when it declares no lifecycle events.
pub fn compile_pipeline(plan: &PlanMetadata) -> Result<Pipeline, PipelineError> {
    compile_pipeline_with_default(plan, DEFAULT_LIFECYCLE_EVENT)
}

/// Compile a plan with a caller-chosen default lifecycle event.
pub fn compile_pipeline_with_default(
    plan: &PlanMetadata,
    default_event: &str,
) -> Result<Pipeline, PipelineError> {
    let default_events = [default_event.to_string()];
    let events: &[String] = match &plan.lifecycle_events {
        Some(events) => events,
        None => &default_events,
    };

    let mut instructions = Vec::with_capacity(events.len() + plan.skills.len() * 2);
    if let Some(first) = events.first() {
        instructions.push(Instruction::wait(first.clone()));
    }
    for skill in &plan.skills {
        if let Some(condition) = &skill.condition {
            instructions.push(Instruction::skip_if(condition.clone()));
        }
        instructions.push(Instruction::activate(
            skill.target.unwrap_or_default(),
            skill.name.clone(),
            skill.mode.unwrap_or_default(),
        ));
    }
    for event in events.iter().skip(1) {
        instructions.push(Instruction::wait(event.clone()));
    }
    if instructions.is_empty() {
        instructions.push(Instruction::wait(default_event));
    }

    let pipeline = Pipeline {
        metadata: PipelineMetadata {
            name: plan.name.clone(),
            description: plan.description.clone(),
            source_patterns: plan.source_patterns.clone(),
            priority: plan.priority,
            confidence: plan.confidence,
            tags: plan.tags.clone(),
            version: plan.version.clone(),
        },
        instructions,
    };
    validate_pipeline(&pipeline)?;

    tracing::debug!(
        pipeline = pipeline.name(),
        instructions = pipeline.instructions.len(),
        moves = pipeline.move_count(),
        "compiled pipeline"
    );
    Ok(pipeline)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `Pipeline`.
///
/// Checks:
/// - Name is non-empty and contains only ASCII alphanumerics, `-` and `_`
/// - Priority is within 1..=100 and confidence within 0.0..=1.0
/// - Version is a semantic version
/// - At least one instruction exists
/// - WAIT events, MOVE names and SKIP fields are non-empty
/// - Every SKIP is followed by an instruction
pub fn validate_pipeline(pipeline: &Pipeline) -> Result<(), PipelineError> {
    let meta = &pipeline.metadata;

    if meta.name.is_empty() {
        return Err(invalid("pipeline name must not be empty".to_string()));
    }
    if !meta
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(format!(
            "pipeline name '{}' contains invalid characters (only alphanumerics, '-' and '_' allowed)",
            meta.name
        )));
    }

    if !(1..=100).contains(&meta.priority) {
        return Err(invalid(format!(
            "priority {} is out of range 1..=100",
            meta.priority
        )));
    }
    if !(0.0..=1.0).contains(&meta.confidence) {
        return Err(invalid(format!(
            "confidence {} is out of range 0.0..=1.0",
            meta.confidence
        )));
    }
    if let Err(e) = semver::Version::parse(&meta.version) {
        return Err(invalid(format!(
            "version '{}' is not a semantic version: {e}",
            meta.version
        )));
    }

    if pipeline.instructions.is_empty() {
        return Err(invalid(
            "pipeline must have at least one instruction".to_string(),
        ));
    }

    let last = pipeline.instructions.len() - 1;
    for (index, instruction) in pipeline.instructions.iter().enumerate() {
        match instruction {
            Instruction::Wait { event } if event.trim().is_empty() => {
                return Err(invalid(format!("instruction {index}: WAIT event is empty")));
            }
            Instruction::Move { name, .. } if name.trim().is_empty() => {
                return Err(invalid(format!("instruction {index}: MOVE name is empty")));
            }
            Instruction::Skip { condition } => {
                if condition.field.trim().is_empty() {
                    return Err(invalid(format!(
                        "instruction {index}: SKIP condition field is empty"
                    )));
                }
                if index == last {
                    return Err(invalid(format!(
                        "instruction {index}: SKIP must be followed by an instruction"
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn invalid(message: String) -> PipelineError {
    PipelineError::Validation(message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
