//! Project-wide analysis jobs
//!
//! A job runs its strategy's steps strictly in order on a spawned task. Progress
//! is kept in a shared job table and broadcast as [`JobEvent`]s. Cancellation is
//! cooperative: the token is checked at step boundaries only, and a step that
//! has already started is allowed to finish.
//!
//! Once a job reaches a terminal status its active entry, token and project
//! marker are dropped. A bounded list of finished snapshots keeps `progress` and
//! `result` answerable afterwards.

pub mod job;
pub mod steps;
pub mod strategy;

pub use job::{JobEvent, JobStatus, ProgressSnapshot};
pub use steps::{
    analyze_files_parallel, FileBatchResult, StepContext, StepHandler, StepHandlers, StepOutput,
    StepResult,
};
pub use strategy::{build_strategy, Step, StepKind};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::aggregate::aggregate;
use crate::config::OrchestratorConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::{Error, Result};
use crate::store::{persist_in_background, AnalysisRecord, AnalysisStore};
use crate::types::{
    AnalysisKind, EnvelopeMetadata, ProjectSnapshot, ResultEnvelope, Subject, TokenUsage,
    UserCredentials,
};
use job::JobState;

const EVENT_CAPACITY: usize = 256;

/// Who a job runs for and what they asked.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub user_id: String,
    pub credentials: UserCredentials,
    pub instructions: String,
}

impl AnalysisOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: UserCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

struct FinishedJob {
    snapshot: ProgressSnapshot,
    result: Option<ResultEnvelope>,
}

#[derive(Default)]
struct JobTable {
    active: HashMap<String, JobState>,
    /// project id -> running job id
    running_projects: HashMap<String, String>,
    /// Oldest first
    finished: VecDeque<FinishedJob>,
}

/// Fails the job if its runner stops without reaching a terminal status,
/// e.g. when a step handler panics. A no-op once the job has finished.
struct RunnerGuard {
    inner: Arc<Inner>,
    job_id: String,
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        let error = "job runner stopped before finishing";
        if self
            .inner
            .finish(&self.job_id, JobStatus::Failed, Some(error.to_string()), None)
        {
            tracing::error!(job_id = %self.job_id, error, "Job runner exited early");
        }
    }
}

/// Runs and tracks project analysis jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: RequestCoordinator,
    handlers: StepHandlers,
    store: Arc<dyn AnalysisStore>,
    config: OrchestratorConfig,
    jobs: Mutex<JobTable>,
    events: broadcast::Sender<JobEvent>,
}

impl JobOrchestrator {
    pub fn new(
        coordinator: RequestCoordinator,
        handlers: StepHandlers,
        store: Arc<dyn AnalysisStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                coordinator,
                handlers,
                store,
                config,
                jobs: Mutex::new(JobTable::default()),
                events,
            }),
        }
    }

    /// Start a job for a project. Rejected while the project already has one.
    pub fn start(&self, project: ProjectSnapshot, options: AnalysisOptions) -> Result<String> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let project_id = project.project_id.clone();

        let token = {
            let mut jobs = self.inner.jobs.lock().unwrap();
            if jobs.running_projects.contains_key(&project_id) {
                return Err(Error::AlreadyRunning(project_id));
            }
            let job = JobState::new(job_id.clone(), project_id.clone());
            let token = job.cancel.clone();
            jobs.active.insert(job_id.clone(), job);
            jobs.running_projects.insert(project_id.clone(), job_id.clone());
            token
        };

        let steps = build_strategy(&project, &self.inner.config);
        tracing::info!(
            job_id = %job_id,
            project_id = %project_id,
            files = project.files.len(),
            steps = steps.len(),
            "Starting analysis job"
        );

        self.inner.update(&job_id, |job| {
            job.step_names = steps.iter().map(|s| s.name.clone()).collect();
            job.transition(JobStatus::Analyzing);
        });

        let ctx = StepContext {
            job_id: job_id.clone(),
            project: Arc::new(project),
            user_id: options.user_id,
            credentials: options.credentials,
            instructions: options.instructions,
            coordinator: self.inner.coordinator.clone(),
            file_concurrency: self.inner.config.file_concurrency,
        };

        let inner = self.inner.clone();
        let guard = RunnerGuard {
            inner: self.inner.clone(),
            job_id: job_id.clone(),
        };
        tokio::spawn(async move {
            let _guard = guard;
            inner.run_job(steps, ctx, token).await
        });

        Ok(job_id)
    }

    /// Current snapshot of an active or recently finished job.
    pub fn progress(&self, job_id: &str) -> Result<ProgressSnapshot> {
        let jobs = self.inner.jobs.lock().unwrap();
        if let Some(job) = jobs.active.get(job_id) {
            return Ok(job.snapshot());
        }
        jobs.finished
            .iter()
            .find(|f| f.snapshot.job_id == job_id)
            .map(|f| f.snapshot.clone())
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Final envelope of a completed job; `None` while running or if it did not complete.
    pub fn result(&self, job_id: &str) -> Result<Option<ResultEnvelope>> {
        let jobs = self.inner.jobs.lock().unwrap();
        if jobs.active.contains_key(job_id) {
            return Ok(None);
        }
        jobs.finished
            .iter()
            .find(|f| f.snapshot.job_id == job_id)
            .map(|f| f.result.clone())
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Cancel an active job. The running step finishes; no further step starts.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let token = {
            let jobs = self.inner.jobs.lock().unwrap();
            jobs.active
                .get(job_id)
                .map(|job| job.cancel.clone())
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?
        };

        token.cancel();
        tracing::info!(job_id, "Cancellation requested");
        self.inner.finish(job_id, JobStatus::Cancelled, None, None);
        Ok(())
    }

    /// Running job for a project, if any.
    pub fn active_job_for(&self, project_id: &str) -> Option<String> {
        let jobs = self.inner.jobs.lock().unwrap();
        jobs.running_projects.get(project_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Mutate an active job and broadcast its new snapshot.
    /// Returns false once the job is no longer active.
    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobState)) -> bool {
        let snapshot = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.active.get_mut(job_id) {
                Some(job) => {
                    apply(job);
                    job.snapshot()
                }
                None => return false,
            }
        };
        self.emit(JobEvent::Progress(snapshot));
        true
    }

    /// Move a job to a terminal status and clean up after it.
    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
        result: Option<ResultEnvelope>,
    ) -> bool {
        let snapshot = {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(mut job) = jobs.active.remove(job_id) else {
                return false;
            };
            jobs.running_projects.remove(&job.project_id);

            if status == JobStatus::Completed {
                job.progress = 100;
            }
            if let Some(e) = &error {
                job.errors.push(e.clone());
            }
            job.transition(status);

            let snapshot = job.snapshot();
            jobs.finished.push_back(FinishedJob {
                snapshot: snapshot.clone(),
                result: result.clone(),
            });
            while jobs.finished.len() > self.config.retained_jobs.max(1) {
                jobs.finished.pop_front();
            }
            snapshot
        };

        tracing::info!(
            job_id,
            status = %status,
            completed_steps = snapshot.completed_steps,
            total_steps = snapshot.total_steps,
            "Job finished"
        );

        self.emit(JobEvent::Progress(snapshot));
        self.emit(match status {
            JobStatus::Completed => JobEvent::Completed {
                job_id: job_id.to_string(),
                envelope: Box::new(result.unwrap_or_else(|| {
                    ResultEnvelope::degraded("job completed without a result", 0, 0)
                })),
            },
            JobStatus::Cancelled => JobEvent::Cancelled {
                job_id: job_id.to_string(),
            },
            _ => JobEvent::Failed {
                job_id: job_id.to_string(),
                error: error.unwrap_or_else(|| "job failed".to_string()),
            },
        });
        true
    }

    async fn run_job(&self, steps: Vec<Step>, ctx: StepContext, token: CancellationToken) {
        let job_id = ctx.job_id.clone();
        let started = tokio::time::Instant::now();
        let total = steps.len();
        let mut results: Vec<StepResult> = Vec::with_capacity(total);

        for (index, step) in steps.iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!(job_id = %job_id, step = index + 1, "Job cancelled before step");
                return;
            }

            if !self.update(&job_id, |job| job.current_step = step.name.clone()) {
                return;
            }
            tracing::debug!(job_id = %job_id, step = %step.name, kind = %step.kind, "Running step");

            let outcome = match self.handlers.get(step.kind) {
                Some(handler) => handler.run(step, &ctx, &results).await,
                None => Err(Error::Config(format!(
                    "no handler registered for {} steps",
                    step.kind
                ))),
            };

            let output = match outcome {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(job_id = %job_id, step = %step.name, error = %e, "Step failed");
                    self.finish(
                        &job_id,
                        JobStatus::Failed,
                        Some(format!("{}: {}", step.name, e)),
                        None,
                    );
                    return;
                }
            };

            if token.is_cancelled() {
                tracing::info!(job_id = %job_id, step = %step.name, "Job cancelled during step");
                return;
            }

            let step_errors = output.errors();
            results.push(StepResult {
                name: step.name.clone(),
                kind: step.kind,
                output,
            });
            self.update(&job_id, |job| {
                job.errors.extend(step_errors);
                job.complete_step(index + 1);
            });

            if index + 1 < total {
                tokio::time::sleep(Duration::from_millis(self.config.step_delay_ms)).await;
            }
        }

        let envelope = final_envelope(&results, started.elapsed());
        persist_in_background(
            self.store.clone(),
            AnalysisRecord {
                kind: AnalysisKind::FullProject,
                subject: Subject::project(ctx.project.project_id.clone()),
                user_id: ctx.user_id.clone(),
                job_id: Some(job_id.clone()),
                envelope: envelope.clone(),
            },
        );
        self.finish(&job_id, JobStatus::Completed, None, Some(envelope));
    }
}

/// Envelope for a completed job: the aggregate report plus every step's output.
fn final_envelope(results: &[StepResult], elapsed: Duration) -> ResultEnvelope {
    let mut usage = TokenUsage::default();
    let mut attempts = 0;
    for result in results {
        usage.add(&result.output.usage());
        attempts += result
            .output
            .envelopes()
            .iter()
            .filter(|e| !e.metadata.cached)
            .map(|e| e.metadata.attempts)
            .sum::<u32>();
    }

    let report = aggregate(results);
    ResultEnvelope {
        success: true,
        analysis_id: uuid::Uuid::new_v4().to_string(),
        provider: None,
        results: serde_json::json!({
            "report": report,
            "steps": results,
        }),
        metadata: EnvelopeMetadata {
            duration_ms: elapsed.as_millis() as u64,
            attempts,
            usage,
            cached: false,
            valid: true,
            error: None,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}
