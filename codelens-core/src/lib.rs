//! # codelens-core
//!
//! Core library for codelens - AI-backed code analysis across multiple providers.
//!
//! This library provides:
//! - A provider registry with free (quota-gated) and premium (key-gated) backends
//! - Provider selection, per-provider retry with backoff, and provider fallback
//! - A request coordinator that caches results and coalesces identical requests
//! - A job orchestrator that runs project-wide analyses as ordered steps
//! - Configuration, logging, and a SQLite quota ledger
//!
//! ## Architecture
//!
//! A request flows through:
//! - **Coordinator:** fingerprint, cache lookup, single-flight
//! - **Selector:** pick the best available provider for the analysis kind
//! - **Executor:** run the prompt with retries against that provider
//!
//! Project jobs are a sequence of steps, each routing its work through the
//! coordinator.
//!
//! ## Example
//!
//! ```rust,no_run
//! use codelens_core::{AnalysisKind, AnalysisRequest, AnalysisService, Config, Subject, UserCredentials};
//!
//! # async fn run() -> codelens_core::Result<()> {
//! let config = Config::load()?;
//! let service = AnalysisService::from_config(&config)?;
//!
//! let request = AnalysisRequest::new(
//!     AnalysisKind::SingleFile,
//!     Subject::file("my-project", "src/main.rs"),
//!     "alice",
//! )
//! .with_content("fn main() {}");
//!
//! let envelope = service.resolve_analysis(request, UserCredentials::new()).await;
//! println!("{}", serde_json::to_string_pretty(&envelope)?);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use aggregate::{AggregateReport, QualitySignal};
pub use config::Config;
pub use coordinator::RequestCoordinator;
pub use db::Database;
pub use error::{Error, FailureKind, Result};
pub use executor::{ExecutionResult, RetryingExecutor};
pub use orchestrator::{
    AnalysisOptions, JobEvent, JobOrchestrator, JobStatus, ProgressSnapshot, StepKind,
};
pub use providers::{Provider, ProviderKind, ProviderRegistry, ProviderTier};
pub use quota::QuotaTracker;
pub use retry::RetryPolicy;
pub use selection::{AvailabilityStatus, ProviderAvailability, ProviderSelector};
pub use service::{AnalysisService, ServiceBuilder};
pub use store::{AnalysisRecord, AnalysisStore, MemoryAnalysisStore, RemoteAnalysisStore};
pub use types::*;

// Public modules
pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod quota;
pub mod retry;
pub mod selection;
pub mod service;
pub mod store;
pub mod types;
