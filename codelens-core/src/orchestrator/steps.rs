//! Step handlers
//!
//! Each [`StepKind`] is served by a [`StepHandler`] registered in [`StepHandlers`].
//! The defaults route every step through the request coordinator, so step work
//! shares the cache, coalescing and fallback behavior of one-off requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::strategy::{Step, StepKind};
use crate::coordinator::RequestCoordinator;
use crate::error::Result;
use crate::types::{
    AnalysisKind, AnalysisRequest, ProjectFile, ProjectSnapshot, ResultEnvelope, Subject,
    TokenUsage, UserCredentials,
};

/// Per-file outcome of a parallel file step, keyed by path.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBatchResult {
    pub results: BTreeMap<String, ResultEnvelope>,
    /// Path -> reason, for files whose analysis degraded
    pub errors: BTreeMap<String, String>,
}

/// What a step handler produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutput {
    Single { envelope: ResultEnvelope },
    Files(FileBatchResult),
}

impl StepOutput {
    /// Envelopes carried by this output.
    pub fn envelopes(&self) -> Vec<&ResultEnvelope> {
        match self {
            StepOutput::Single { envelope } => vec![envelope],
            StepOutput::Files(batch) => batch.results.values().collect(),
        }
    }

    /// Human-readable errors to surface on the job.
    pub fn errors(&self) -> Vec<String> {
        match self {
            StepOutput::Single { envelope } if !envelope.success => vec![envelope
                .metadata
                .error
                .clone()
                .unwrap_or_else(|| "analysis unavailable".to_string())],
            StepOutput::Single { .. } => Vec::new(),
            StepOutput::Files(batch) => batch
                .errors
                .iter()
                .map(|(path, reason)| format!("{path}: {reason}"))
                .collect(),
        }
    }

    pub fn usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for envelope in self.envelopes() {
            total.add(&envelope.metadata.usage);
        }
        total
    }
}

/// Output of one completed step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub kind: StepKind,
    pub output: StepOutput,
}

/// Everything a handler needs besides the step itself.
#[derive(Clone)]
pub struct StepContext {
    pub job_id: String,
    pub project: Arc<ProjectSnapshot>,
    pub user_id: String,
    pub credentials: UserCredentials,
    pub instructions: String,
    pub coordinator: RequestCoordinator,
    pub file_concurrency: usize,
}

impl StepContext {
    fn request(&self, kind: AnalysisKind, subject: Subject, content: String) -> AnalysisRequest {
        AnalysisRequest::new(kind, subject, self.user_id.clone())
            .with_instructions(self.instructions.clone())
            .with_content(content)
    }

    async fn resolve(&self, request: AnalysisRequest) -> ResultEnvelope {
        self.coordinator
            .resolve(request, self.credentials.clone(), true)
            .await
    }
}

/// Executes one kind of step.
///
/// An `Err` fails the whole job. Degraded results should be returned as output.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Convention: `namespace.handler_name` (e.g., "core.security")
    fn name(&self) -> &str;

    async fn run(
        &self,
        step: &Step,
        ctx: &StepContext,
        previous: &[StepResult],
    ) -> Result<StepOutput>;
}

/// Handler registry keyed by step kind.
#[derive(Clone, Default)]
pub struct StepHandlers {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl StepHandlers {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handler for every kind.
    pub fn with_defaults() -> Self {
        let mut handlers = Self::new();
        handlers.register(StepKind::Structure, Arc::new(StructureHandler));
        handlers.register(StepKind::Files, Arc::new(FilesHandler));
        handlers.register(StepKind::Security, Arc::new(SecurityHandler));
        handlers.register(StepKind::Tests, Arc::new(TestsHandler));
        handlers.register(StepKind::Insights, Arc::new(InsightsHandler));
        handlers
    }

    /// Register (or replace) the handler for a kind.
    pub fn register(&mut self, kind: StepKind, handler: Arc<dyn StepHandler>) {
        tracing::debug!(step_kind = %kind, handler = handler.name(), "Registered step handler");
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

/// Route every file through the coordinator with bounded concurrency.
///
/// A degraded file lands in `errors`; it never aborts the batch.
pub async fn analyze_files_parallel(files: &[ProjectFile], ctx: &StepContext) -> FileBatchResult {
    let outcomes: Vec<(String, ResultEnvelope)> = stream::iter(files.iter().cloned())
        .map(|file| {
            let content = file
                .content
                .clone()
                .unwrap_or_else(|| format!("({} bytes, content not loaded)", file.size_bytes));
            let request = ctx.request(
                AnalysisKind::SingleFile,
                Subject::file(ctx.project.project_id.clone(), file.path.clone()),
                content,
            );
            async move { (file.path, ctx.resolve(request).await) }
        })
        .buffer_unordered(ctx.file_concurrency.max(1))
        .collect()
        .await;

    let mut batch = FileBatchResult::default();
    for (path, envelope) in outcomes {
        if envelope.success {
            batch.results.insert(path, envelope);
        } else {
            let reason = envelope
                .metadata
                .error
                .unwrap_or_else(|| "analysis unavailable".to_string());
            tracing::warn!(job_id = %ctx.job_id, path = %path, reason = %reason, "File analysis degraded");
            batch.errors.insert(path, reason);
        }
    }

    tracing::debug!(
        job_id = %ctx.job_id,
        analyzed = batch.results.len(),
        failed = batch.errors.len(),
        "File batch finished"
    );
    batch
}

/// Concatenated file bodies, bounded so the prompt stays small.
fn project_digest(project: &ProjectSnapshot, max_files: usize, max_chars: usize) -> String {
    let mut digest = String::new();
    for file in project.files.iter().filter(|f| f.content.is_some()).take(max_files) {
        let body: String = file
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(max_chars)
            .collect();
        digest.push_str(&format!("=== {} ===\n{}\n", file.path, body));
    }
    digest
}

struct StructureHandler;

#[async_trait]
impl StepHandler for StructureHandler {
    fn name(&self) -> &str {
        "core.structure"
    }

    async fn run(&self, _step: &Step, ctx: &StepContext, _previous: &[StepResult]) -> Result<StepOutput> {
        let request = ctx.request(
            AnalysisKind::FullProject,
            Subject::project(ctx.project.project_id.clone()),
            ctx.project.tree_listing(),
        );
        Ok(StepOutput::Single {
            envelope: ctx.resolve(request).await,
        })
    }
}

struct FilesHandler;

#[async_trait]
impl StepHandler for FilesHandler {
    fn name(&self) -> &str {
        "core.files"
    }

    async fn run(&self, step: &Step, ctx: &StepContext, _previous: &[StepResult]) -> Result<StepOutput> {
        Ok(StepOutput::Files(analyze_files_parallel(&step.files, ctx).await))
    }
}

struct SecurityHandler;

#[async_trait]
impl StepHandler for SecurityHandler {
    fn name(&self) -> &str {
        "core.security"
    }

    async fn run(&self, _step: &Step, ctx: &StepContext, _previous: &[StepResult]) -> Result<StepOutput> {
        let content = format!(
            "Files:\n{}\n\n{}",
            ctx.project.tree_listing(),
            project_digest(&ctx.project, 20, 4000)
        );
        let request = ctx.request(
            AnalysisKind::SecurityAudit,
            Subject::project(ctx.project.project_id.clone()),
            content,
        );
        Ok(StepOutput::Single {
            envelope: ctx.resolve(request).await,
        })
    }
}

struct TestsHandler;

#[async_trait]
impl StepHandler for TestsHandler {
    fn name(&self) -> &str {
        "core.tests"
    }

    async fn run(&self, _step: &Step, ctx: &StepContext, _previous: &[StepResult]) -> Result<StepOutput> {
        let tests: Vec<&str> = ctx
            .project
            .files
            .iter()
            .filter(|f| f.is_test_like())
            .map(|f| f.path.as_str())
            .collect();
        let content = format!(
            "Test files:\n{}\n\nAll files:\n{}",
            tests.join("\n"),
            ctx.project.tree_listing()
        );
        let request = ctx.request(
            AnalysisKind::TestCoverage,
            Subject::project(ctx.project.project_id.clone()),
            content,
        );
        Ok(StepOutput::Single {
            envelope: ctx.resolve(request).await,
        })
    }
}

struct InsightsHandler;

#[async_trait]
impl StepHandler for InsightsHandler {
    fn name(&self) -> &str {
        "core.insights"
    }

    async fn run(&self, _step: &Step, ctx: &StepContext, previous: &[StepResult]) -> Result<StepOutput> {
        let mut content = String::new();
        for result in previous {
            for envelope in result.output.envelopes() {
                if let Some(summary) = envelope.results.get("summary").and_then(|s| s.as_str()) {
                    content.push_str(&format!("[{}] {}\n", result.kind, summary));
                }
            }
        }
        if content.is_empty() {
            content.push_str("No earlier findings were available.");
        }

        let request = ctx.request(
            AnalysisKind::Insights,
            Subject::project(ctx.project.project_id.clone()),
            content,
        );
        Ok(StepOutput::Single {
            envelope: ctx.resolve(request).await,
        })
    }
}
