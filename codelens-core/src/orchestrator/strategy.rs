//! Strategy building: the ordered step list for a project job

use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::types::{ProjectFile, ProjectSnapshot};

/// What a step analyzes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Structure,
    Files,
    Security,
    Tests,
    Insights,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Structure => "structure",
            StepKind::Files => "files",
            StepKind::Security => "security",
            StepKind::Tests => "tests",
            StepKind::Insights => "insights",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in a job. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Human-readable label, shown as the current step
    pub name: String,
    pub kind: StepKind,
    /// Files this step covers (file steps only)
    pub files: Vec<ProjectFile>,
    /// Files inside the step are analyzed concurrently
    pub parallel: bool,
}

impl Step {
    fn single(kind: StepKind, name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            files: Vec::new(),
            parallel: false,
        }
    }
}

/// Build the step list for a project.
///
/// Structure first, then file analysis (chunked above the threshold), security,
/// tests when test-like files exist, insights last.
pub fn build_strategy(project: &ProjectSnapshot, config: &OrchestratorConfig) -> Vec<Step> {
    let mut steps = vec![Step::single(StepKind::Structure, "Analyzing project structure")];

    let files = &project.files;
    if files.len() > config.chunk_threshold {
        let chunk_size = config.chunk_size.max(1);
        for (i, chunk) in files.chunks(chunk_size).enumerate() {
            let first = i * chunk_size + 1;
            let last = first + chunk.len() - 1;
            steps.push(Step {
                name: format!("Analyzing files {}-{} of {}", first, last, files.len()),
                kind: StepKind::Files,
                files: chunk.to_vec(),
                parallel: true,
            });
        }
    } else if !files.is_empty() {
        steps.push(Step {
            name: format!("Analyzing {} files", files.len()),
            kind: StepKind::Files,
            files: files.clone(),
            parallel: true,
        });
    }

    steps.push(Step::single(StepKind::Security, "Running security scan"));

    if project.has_tests() {
        steps.push(Step::single(StepKind::Tests, "Assessing test coverage"));
    }

    steps.push(Step::single(StepKind::Insights, "Generating insights"));
    steps
}
