//! Job state, progress snapshots and job events

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::types::ResultEnvelope;

/// Job lifecycle.
///
/// `Initializing -> Analyzing -> {Completed | Failed | Cancelled}`. Terminal states
/// have no outgoing transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initializing,
    Analyzing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Initializing, JobStatus::Analyzing) => true,
            (JobStatus::Initializing | JobStatus::Analyzing, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What presentation layers poll for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub project_id: String,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub current_step: String,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Broadcast to subscribers as jobs move.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress(ProgressSnapshot),
    Completed {
        job_id: String,
        envelope: Box<ResultEnvelope>,
    },
    Failed {
        job_id: String,
        error: String,
    },
    Cancelled {
        job_id: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Progress(snapshot) => &snapshot.job_id,
            JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id } => job_id,
        }
    }
}

/// Mutable state of an active job.
pub(crate) struct JobState {
    pub id: String,
    pub project_id: String,
    pub status: JobStatus,
    pub step_names: Vec<String>,
    pub completed_steps: usize,
    pub progress: u8,
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub cancel: CancellationToken,
}

impl JobState {
    pub fn new(id: String, project_id: String) -> Self {
        Self {
            id,
            project_id,
            status: JobStatus::Initializing,
            step_names: Vec::new(),
            completed_steps: 0,
            progress: 0,
            current_step: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            errors: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Apply a status change; illegal transitions are ignored and reported.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring illegal job transition"
            );
            return false;
        }

        tracing::debug!(job_id = %self.id, from = %self.status, to = %next, "Job transition");
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Record a finished step. Progress only moves forward.
    pub fn complete_step(&mut self, completed: usize) {
        let total = self.step_names.len().max(1);
        self.completed_steps = completed.min(total);
        let progress = (self.completed_steps * 100 / total) as u8;
        self.progress = self.progress.max(progress);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            completed_steps: self.completed_steps,
            total_steps: self.step_names.len(),
            errors: self.errors.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exit() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Initializing,
                JobStatus::Analyzing,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(JobStatus::Initializing.can_transition_to(JobStatus::Analyzing));
        assert!(JobStatus::Analyzing.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Analyzing.can_transition_to(JobStatus::Initializing));
    }

    #[test]
    fn test_progress_counts_completed_steps() {
        let mut job = JobState::new("j".into(), "p".into());
        job.step_names = vec!["a".into(), "b".into(), "c".into()];

        job.complete_step(1);
        assert_eq!(job.progress, 33);
        job.complete_step(2);
        assert_eq!(job.progress, 66);
        job.complete_step(3);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_transition_sets_finished_at() {
        let mut job = JobState::new("j".into(), "p".into());
        assert!(job.transition(JobStatus::Analyzing));
        assert!(job.finished_at.is_none());
        assert!(job.transition(JobStatus::Failed));
        assert!(job.finished_at.is_some());
        assert!(!job.transition(JobStatus::Completed));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let job = JobState::new("j".into(), "p".into());
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["status"], "initializing");
        assert_eq!(json["currentStep"], "");
        assert_eq!(json["completedSteps"], 0);
        assert_eq!(json["totalSteps"], 0);
    }
}
