//! Pipeline domain types.
//!
//! [`PlanMetadata`] is the declarative input discovered upstream (which skills
//! a plan wants, under which conditions, around which lifecycle events).
//! The compiler lowers it into a [`Pipeline`]: metadata plus a linear
//! instruction program. Pipelines are persisted one per `*.pipeline.yaml`
//! file and reloaded with per-file validation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::instruction::{ActivationMode, Instruction, MoveTarget, SkipCondition};

/// Lifecycle event a pipeline waits for when the plan declares none.
pub const DEFAULT_LIFECYCLE_EVENT: &str = "phase-start";

/// File suffix of persisted pipelines.
pub const PIPELINE_FILE_SUFFIX: &str = ".pipeline.yaml";

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A compiled, ordered instruction program. Identity is `metadata.name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    pub metadata: PipelineMetadata,
    pub instructions: Vec<Instruction>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Number of `MOVE` instructions in the program.
    pub fn move_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Move { .. }))
            .count()
    }
}

/// Descriptive header of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Glob patterns of the plan files this pipeline was compiled from.
    #[serde(default)]
    pub source_patterns: Vec<String>,
    /// 1..=100, higher runs sooner.
    pub priority: u8,
    /// 0.0..=1.0
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Semantic version string (e.g. "1.0.0").
    pub version: String,
}

/// JSON Schema of the pipeline file format.
pub fn pipeline_json_schema() -> schemars::Schema {
    schemars::schema_for!(Pipeline)
}

// ---------------------------------------------------------------------------
// Plan metadata (compiler input)
// ---------------------------------------------------------------------------

/// Declarative plan metadata fed to the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "sourcePatterns")]
    pub source_patterns: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default = "default_version")]
    pub version: String,
    /// Skills the plan wants activated, in order.
    #[serde(default)]
    pub skills: Vec<SkillDeclaration>,
    /// Lifecycle events, in order. `None` means the default `phase-start`.
    #[serde(default, alias = "lifecycleEvents", skip_serializing_if = "Option::is_none")]
    pub lifecycle_events: Option<Vec<String>>,
}

fn default_priority() -> u8 {
    50
}

fn default_confidence() -> f64 {
    1.0
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PlanMetadata {
    /// Plan with defaults for everything except the name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            source_patterns: Vec::new(),
            priority: default_priority(),
            confidence: default_confidence(),
            tags: None,
            version: default_version(),
            skills: Vec::new(),
            lifecycle_events: None,
        }
    }
}

/// One skill a plan declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ActivationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<MoveTarget>,
    /// When present the compiler emits a `SKIP` guarding this skill's `MOVE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<SkipCondition>,
}

impl SkillDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
            target: None,
            condition: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pipeline_metadata_uses_camel_case_on_disk() {
        let meta = PipelineMetadata {
            name: "review".to_string(),
            description: "code review".to_string(),
            source_patterns: vec!["plans/*.md".to_string()],
            priority: 60,
            confidence: 0.8,
            tags: None,
            version: "1.0.0".to_string(),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["sourcePatterns"], json!(["plans/*.md"]));
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn test_plan_metadata_defaults() {
        let plan: PlanMetadata = serde_json::from_value(json!({"name": "p"})).unwrap();
        assert_eq!(plan.priority, 50);
        assert_eq!(plan.version, "1.0.0");
        assert!(plan.skills.is_empty());
        assert!(plan.lifecycle_events.is_none());
        assert_eq!(plan, PlanMetadata::named("p"));
    }

    #[test]
    fn test_plan_metadata_accepts_camel_case_aliases() {
        let plan: PlanMetadata = serde_json::from_value(json!({
            "name": "p",
            "lifecycleEvents": ["phase-start", "phase-end"],
        }))
        .unwrap();
        assert_eq!(plan.lifecycle_events.unwrap().len(), 2);
    }

    #[test]
    fn test_schema_describes_instructions() {
        let schema = serde_json::to_value(pipeline_json_schema()).unwrap();
        let text = schema.to_string();
        assert!(text.contains("instructions"));
        assert!(text.contains("metadata"));
    }
}
