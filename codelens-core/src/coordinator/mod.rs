//! Request coordination: caching, coalescing and provider fallback
//!
//! [`RequestCoordinator::resolve`] is the single path every analysis request goes
//! through. It never returns an error: expected failures become a degraded
//! [`ResultEnvelope`].
//!
//! Concurrent requests with the same fingerprint share one execution. The work
//! runs in a spawned task so it settles even if every caller goes away, and the
//! in-flight entry is removed by a guard owned by that task.
//!
//! Lock order is `in_flight` then the cache. A result is cached before its
//! in-flight entry is removed, so a caller that finds neither under the
//! `in_flight` lock is the only one to start an execution.

mod cache;
mod prompt;
mod response;

pub use cache::ResultCache;
pub use prompt::build_prompt;
pub use response::parse_findings;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::config::CoordinatorConfig;
use crate::executor::{ExecutionResult, RetryingExecutor};
use crate::providers::ProviderKind;
use crate::selection::ProviderSelector;
use crate::store::{persist_in_background, AnalysisRecord, AnalysisStore};
use crate::types::{
    AnalysisKind, AnalysisRequest, EnvelopeMetadata, Fingerprint, ResultEnvelope, UserCredentials,
};

type SharedResolution = Shared<BoxFuture<'static, ResultEnvelope>>;

/// Caches results and coalesces identical concurrent requests.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    selector: Arc<ProviderSelector>,
    executor: Arc<RetryingExecutor>,
    store: Arc<dyn AnalysisStore>,
    cache: ResultCache,
    in_flight: Mutex<HashMap<Fingerprint, SharedResolution>>,
    config: CoordinatorConfig,
}

/// Removes the in-flight entry when the execution settles.
struct InFlightGuard {
    inner: Arc<Inner>,
    fingerprint: Fingerprint,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap()
            .remove(&self.fingerprint);
    }
}

impl RequestCoordinator {
    pub fn new(
        selector: Arc<ProviderSelector>,
        executor: Arc<RetryingExecutor>,
        store: Arc<dyn AnalysisStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                selector,
                executor,
                store,
                cache: ResultCache::new(),
                in_flight: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn selector(&self) -> &Arc<ProviderSelector> {
        &self.inner.selector
    }

    /// How long a result for `kind` stays fresh.
    pub fn freshness(&self, kind: AnalysisKind) -> Duration {
        freshness_for(&self.inner.config, kind)
    }

    /// Number of executions currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.lock().unwrap().len()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Resolve a request to an envelope.
    ///
    /// With `use_cache`, a fresh cached result is returned as-is (marked cached).
    /// Concurrent calls for the same fingerprint await one shared execution.
    pub async fn resolve(
        &self,
        request: AnalysisRequest,
        credentials: UserCredentials,
        use_cache: bool,
    ) -> ResultEnvelope {
        let fingerprint = request.fingerprint();
        let window = self.freshness(request.kind);

        if use_cache {
            if let Some(hit) = self.inner.cache.get_fresh(&fingerprint, window) {
                tracing::debug!(fingerprint = %fingerprint, "Cache hit");
                return hit.as_cached();
            }
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            match in_flight.get(&fingerprint) {
                Some(existing) => {
                    tracing::debug!(fingerprint = %fingerprint, "Joining in-flight execution");
                    existing.clone()
                }
                None => {
                    // An execution may have cached its result and released its
                    // entry since the first lookup. It caches before releasing.
                    if use_cache {
                        if let Some(hit) = self.inner.cache.get_fresh(&fingerprint, window) {
                            tracing::debug!(fingerprint = %fingerprint, "Cache hit after settle");
                            return hit.as_cached();
                        }
                    }

                    let inner = self.inner.clone();
                    let guard = InFlightGuard {
                        inner: self.inner.clone(),
                        fingerprint: fingerprint.clone(),
                    };
                    let task = tokio::spawn(async move {
                        let _guard = guard;
                        inner.run(request, credentials).await
                    });

                    let resolution: SharedResolution = async move {
                        match task.await {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::error!(error = %e, "Analysis task aborted");
                                ResultEnvelope::degraded(format!("analysis task aborted: {e}"), 0, 0)
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(fingerprint.clone(), resolution.clone());
                    resolution
                }
            }
        };

        shared.await
    }
}

fn freshness_for(config: &CoordinatorConfig, kind: AnalysisKind) -> Duration {
    if kind.is_predictive() {
        Duration::from_secs(config.predictive_freshness_secs)
    } else {
        Duration::from_secs(config.freshness_secs)
    }
}

impl Inner {
    /// Provider rounds with fallback, then validation and caching.
    async fn run(&self, request: AnalysisRequest, credentials: UserCredentials) -> ResultEnvelope {
        let started = tokio::time::Instant::now();
        let fingerprint = request.fingerprint();
        let prompt = build_prompt(&request);
        let max_rounds = self.config.max_provider_rounds.max(1);

        let mut tried: Vec<ProviderKind> = Vec::new();
        let mut attempts = 0u32;
        let mut last_error = String::from("no provider attempted");

        for round in 1..=max_rounds {
            let provider = match self.selector.select_provider_excluding(
                &request.user_id,
                request.kind,
                &credentials,
                &tried,
            ) {
                Ok(provider) => provider,
                Err(e) => {
                    if round == 1 {
                        last_error = e.to_string();
                    }
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        round,
                        error = %e,
                        "No provider left to try"
                    );
                    break;
                }
            };
            tried.push(provider.kind);

            match self
                .executor
                .execute(&provider, &prompt, &request.user_id, &credentials)
                .await
            {
                Ok(result) => {
                    attempts += result.attempts;
                    return self.finish(request, fingerprint, result, attempts, started);
                }
                Err(e) => {
                    attempts += self.executor.policy().max_attempts;
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        provider = %provider.kind,
                        round,
                        error = %e,
                        "Provider round failed"
                    );
                    last_error = e.to_string();
                    if !e.allows_fallback() {
                        break;
                    }
                }
            }
        }

        tracing::error!(
            fingerprint = %fingerprint,
            providers_tried = tried.len(),
            attempts,
            "All providers exhausted, returning degraded result"
        );
        ResultEnvelope::degraded(last_error, attempts, started.elapsed().as_millis() as u64)
    }

    fn finish(
        &self,
        request: AnalysisRequest,
        fingerprint: Fingerprint,
        result: ExecutionResult,
        attempts: u32,
        started: tokio::time::Instant,
    ) -> ResultEnvelope {
        let (results, valid, error) = match parse_findings(&result.content) {
            Ok(findings) => (findings, true, None),
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    provider = %result.provider,
                    error = %e,
                    "Provider output failed validation"
                );
                (
                    serde_json::json!({ "raw": result.content }),
                    false,
                    Some(e.to_string()),
                )
            }
        };

        let envelope = ResultEnvelope {
            success: true,
            analysis_id: uuid::Uuid::new_v4().to_string(),
            provider: Some(result.provider.to_string()),
            results,
            metadata: EnvelopeMetadata {
                duration_ms: started.elapsed().as_millis() as u64,
                attempts,
                usage: result.usage,
                cached: false,
                valid,
                error,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        if valid {
            self.cache.insert(fingerprint, envelope.clone());
        }

        persist_in_background(
            self.store.clone(),
            AnalysisRecord {
                kind: request.kind,
                subject: request.subject,
                user_id: request.user_id,
                job_id: None,
                envelope: envelope.clone(),
            },
        );

        envelope
    }
}
