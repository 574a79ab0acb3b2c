//! Caller-facing facade
//!
//! [`AnalysisService`] wires the registry, quota tracker, selector, executor,
//! coordinator and orchestrator together and exposes the operations callers use.
//! Every component is an owned instance shared by `Arc`; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::{Config, CoordinatorConfig, OrchestratorConfig, StoreConfig};
use crate::coordinator::RequestCoordinator;
use crate::db::Database;
use crate::error::Result;
use crate::executor::RetryingExecutor;
use crate::orchestrator::{
    AnalysisOptions, JobEvent, JobOrchestrator, ProgressSnapshot, StepHandlers,
};
use crate::providers::{HttpProviderClient, ProviderClient, ProviderKind, ProviderRegistry};
use crate::quota::QuotaTracker;
use crate::retry::RetryPolicy;
use crate::selection::{ProviderAvailability, ProviderSelector};
use crate::store::{AnalysisStore, MemoryAnalysisStore, RemoteAnalysisStore};
use crate::types::{AnalysisRequest, ProjectSnapshot, ResultEnvelope, UserCredentials};

/// Assembles an [`AnalysisService`]; anything not supplied is built from config.
pub struct ServiceBuilder {
    registry: ProviderRegistry,
    retry: RetryPolicy,
    coordinator: CoordinatorConfig,
    orchestrator: OrchestratorConfig,
    store_config: StoreConfig,
    persist_quota: bool,
    client: Option<Arc<dyn ProviderClient>>,
    store: Option<Arc<dyn AnalysisStore>>,
    quota: Option<Arc<QuotaTracker>>,
    handlers: Option<StepHandlers>,
    server_credentials: Vec<(ProviderKind, String)>,
}

impl ServiceBuilder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            registry: ProviderRegistry::from_config(config)?,
            retry: config.retry.policy(),
            coordinator: config.coordinator.clone(),
            orchestrator: config.orchestrator.clone(),
            store_config: config.store.clone(),
            persist_quota: config.quota.persist,
            client: None,
            store: None,
            quota: None,
            handlers: None,
            server_credentials: Vec::new(),
        })
    }

    pub fn client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn quota(mut self, quota: Arc<QuotaTracker>) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn handlers(mut self, handlers: StepHandlers) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Use this key for a free provider instead of its environment variable.
    pub fn server_credential(mut self, provider: ProviderKind, key: impl Into<String>) -> Self {
        self.server_credentials.push((provider, key.into()));
        self
    }

    pub fn build(self) -> Result<AnalysisService> {
        let client: Arc<dyn ProviderClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpProviderClient::new(
                self.retry.attempt_timeout + Duration::from_secs(5),
            )?),
        };

        let store: Arc<dyn AnalysisStore> = match self.store {
            Some(store) => store,
            None if self.store_config.is_remote() => {
                Arc::new(RemoteAnalysisStore::new(&self.store_config)?)
            }
            None => Arc::new(MemoryAnalysisStore::new()),
        };

        let quota = match self.quota {
            Some(quota) => quota,
            None if self.persist_quota => {
                let db = Database::open(&Config::database_path())?;
                db.migrate()?;
                Arc::new(QuotaTracker::with_ledger(Arc::new(db))?)
            }
            None => Arc::new(QuotaTracker::new()),
        };

        let mut executor = RetryingExecutor::new(client, quota.clone(), self.retry);
        for (provider, key) in self.server_credentials {
            executor = executor.with_server_credential(provider, key);
        }

        let registry = Arc::new(self.registry);
        let selector = Arc::new(ProviderSelector::new(registry.clone(), quota.clone()));
        let coordinator = RequestCoordinator::new(
            selector.clone(),
            Arc::new(executor),
            store.clone(),
            self.coordinator,
        );
        let orchestrator = JobOrchestrator::new(
            coordinator.clone(),
            self.handlers.unwrap_or_else(StepHandlers::with_defaults),
            store,
            self.orchestrator,
        );

        tracing::debug!(providers = registry.len(), "Analysis service ready");

        Ok(AnalysisService {
            registry,
            quota,
            selector,
            coordinator,
            orchestrator,
        })
    }
}

/// Entry point for callers: one-off requests and project jobs.
#[derive(Clone)]
pub struct AnalysisService {
    registry: Arc<ProviderRegistry>,
    quota: Arc<QuotaTracker>,
    selector: Arc<ProviderSelector>,
    coordinator: RequestCoordinator,
    orchestrator: JobOrchestrator,
}

impl AnalysisService {
    pub fn builder(config: &Config) -> Result<ServiceBuilder> {
        ServiceBuilder::new(config)
    }

    /// Build every component from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        ServiceBuilder::new(config)?.build()
    }

    /// Start a project-wide job; returns the job id.
    pub fn start_analysis(&self, project: ProjectSnapshot, options: AnalysisOptions) -> Result<String> {
        self.orchestrator.start(project, options)
    }

    pub fn get_progress(&self, job_id: &str) -> Result<ProgressSnapshot> {
        self.orchestrator.progress(job_id)
    }

    pub fn cancel_analysis(&self, job_id: &str) -> Result<()> {
        self.orchestrator.cancel(job_id)
    }

    /// Final envelope of a completed job.
    pub fn job_result(&self, job_id: &str) -> Result<Option<ResultEnvelope>> {
        self.orchestrator.result(job_id)
    }

    /// One-off analysis outside any job. Never fails; see [`RequestCoordinator::resolve`].
    pub async fn resolve_analysis(
        &self,
        request: AnalysisRequest,
        credentials: UserCredentials,
    ) -> ResultEnvelope {
        self.coordinator.resolve(request, credentials, true).await
    }

    pub fn available_providers(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
    ) -> Vec<ProviderAvailability> {
        self.selector.available_providers(user_id, credentials)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.orchestrator.subscribe()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }
}
