//! Pipeline persistence.
//!
//! One pipeline per `{name}.pipeline.yaml` file. Files are written as
//! pretty-printed JSON (a YAML subset) and read back through the YAML
//! parser, so hand-edited YAML is accepted too. Pipelines may be grouped
//! per phase under `{base}/{phase}/`.

use std::path::{Path, PathBuf};

use coproc_types::pipeline::{PIPELINE_FILE_SUFFIX, Pipeline};

use super::compiler::{PipelineError, validate_pipeline};

/// Parse and validate a single pipeline document.
pub fn parse_pipeline(content: &str) -> Result<Pipeline, PipelineError> {
    let pipeline: Pipeline =
        serde_yaml_ng::from_str(content).map_err(|e| PipelineError::Parse(e.to_string()))?;
    validate_pipeline(&pipeline)?;
    Ok(pipeline)
}

/// Load one pipeline file.
pub fn load_pipeline_file(path: &Path) -> Result<Pipeline, PipelineError> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline(&content)
}

/// Validate and write `pipeline` to `{dir}/{name}.pipeline.yaml`.
///
/// Creates `dir` if it doesn't exist and overwrites an existing file.
pub fn save_pipeline(dir: &Path, pipeline: &Pipeline) -> Result<PathBuf, PipelineError> {
    validate_pipeline(pipeline)?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}{PIPELINE_FILE_SUFFIX}", pipeline.name()));
    let json =
        serde_json::to_string_pretty(pipeline).map_err(|e| PipelineError::Parse(e.to_string()))?;
    std::fs::write(&path, json)?;
    tracing::debug!(?path, pipeline = pipeline.name(), "saved pipeline");
    Ok(path)
}

/// Load every `*.pipeline.yaml` file directly under `dir`.
///
/// A missing directory yields an empty list. Files that fail to parse or
/// validate are skipped with a warning. The result is ordered by priority
/// (highest first), then by name.
pub fn load_pipelines(dir: &Path) -> Result<Vec<Pipeline>, PipelineError> {
    let mut pipelines = Vec::new();
    if !dir.is_dir() {
        return Ok(pipelines);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(PIPELINE_FILE_SUFFIX))
        })
        .collect();
    paths.sort();

    for path in paths {
        match load_pipeline_file(&path) {
            Ok(pipeline) => pipelines.push(pipeline),
            Err(e) => {
                tracing::warn!(?path, error = %e, "skipping invalid pipeline file");
            }
        }
    }

    pipelines.sort_by(|a, b| {
        b.metadata
            .priority
            .cmp(&a.metadata.priority)
            .then_with(|| a.name().cmp(b.name()))
    });
    Ok(pipelines)
}

/// Load the pipelines of one phase from `{base}/{phase}/`.
pub fn load_phase_pipelines(base: &Path, phase: &str) -> Result<Vec<Pipeline>, PipelineError> {
    load_pipelines(&base.join(phase))
}
