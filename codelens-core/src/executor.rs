//! Retrying execution against a single provider
//!
//! One call to [`RetryingExecutor::execute`] is a full attempt sequence against the
//! same provider: resolve the credential, call the client under a per-attempt
//! timeout, back off and try again on failure. Switching providers is the
//! coordinator's job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, FailureKind, Result};
use crate::providers::{
    CompletionOptions, CredentialSource, Provider, ProviderClient, ProviderFailure, ProviderKind,
    ProviderTarget,
};
use crate::quota::QuotaTracker;
use crate::retry::{retry_async, AttemptError, RetryPolicy};
use crate::types::{Prompt, TokenUsage, UserCredentials};

/// Successful provider execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: ProviderKind,
    /// Attempts it took, 1-based
    pub attempts: u32,
    pub duration: Duration,
}

/// Runs prompts against a provider with retry and backoff.
pub struct RetryingExecutor {
    client: Arc<dyn ProviderClient>,
    quota: Arc<QuotaTracker>,
    policy: RetryPolicy,
    options: CompletionOptions,
    /// Server-side keys, read from the environment once per provider
    server_credentials: Mutex<HashMap<ProviderKind, Option<String>>>,
}

impl RetryingExecutor {
    pub fn new(client: Arc<dyn ProviderClient>, quota: Arc<QuotaTracker>, policy: RetryPolicy) -> Self {
        Self {
            client,
            quota,
            policy,
            options: CompletionOptions::default(),
            server_credentials: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Pin a server-side credential instead of reading the environment.
    pub fn with_server_credential(self, provider: ProviderKind, key: impl Into<String>) -> Self {
        self.server_credentials
            .lock()
            .unwrap()
            .insert(provider, Some(key.into()));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn server_credential(&self, provider: ProviderKind, var: &str) -> Option<String> {
        let mut cache = self.server_credentials.lock().unwrap();
        cache
            .entry(provider)
            .or_insert_with(|| {
                let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
                tracing::debug!(provider = %provider, var, found = value.is_some(), "Read server credential");
                value
            })
            .clone()
    }

    fn resolve_target(
        &self,
        provider: &Provider,
        credentials: &UserCredentials,
    ) -> std::result::Result<ProviderTarget, ProviderFailure> {
        let source = provider.profile.credential_source();
        let credential = match source {
            CredentialSource::ServerEnv(var) => {
                self.server_credential(provider.kind, var).ok_or_else(|| {
                    ProviderFailure::new(FailureKind::Initialization, format!("{var} is not set"))
                })?
            }
            CredentialSource::UserKey { .. } => credentials
                .get(provider.kind)
                .filter(|key| source.is_plausible(key))
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderFailure::new(
                        FailureKind::Initialization,
                        format!("no usable {} key supplied", provider.display_name),
                    )
                })?,
        };

        if provider.mark_initialized() {
            tracing::info!(provider = %provider.kind, model = %provider.model, "Provider initialized");
        }

        Ok(ProviderTarget {
            provider: provider.kind,
            model: provider.model.clone(),
            endpoint: provider.profile.endpoint().to_string(),
            credential,
            headers: provider.profile.extra_headers(),
        })
    }

    /// Run `prompt` against `provider`, retrying the same provider on failure.
    pub async fn execute(
        &self,
        provider: &Provider,
        prompt: &Prompt,
        user_id: &str,
        credentials: &UserCredentials,
    ) -> Result<ExecutionResult> {
        let started = tokio::time::Instant::now();

        let outcome = retry_async(&self.policy, provider.id(), |attempt| {
            let target = self.resolve_target(provider, credentials);
            async move {
                let target = target?;
                tracing::debug!(provider = %target.provider, attempt, "Dispatching prompt");
                self.client.execute(&target, prompt, &self.options).await
            }
        })
        .await;

        match outcome {
            Ok((completion, attempts)) => {
                if provider.is_free() {
                    let cost = completion.usage.total_tokens as f64 * provider.cost_per_token;
                    self.quota
                        .record(user_id, provider.kind, completion.usage.total_tokens, cost);
                }

                tracing::info!(
                    provider = %provider.kind,
                    attempts,
                    total_tokens = completion.usage.total_tokens,
                    "Provider execution succeeded"
                );

                Ok(ExecutionResult {
                    success: true,
                    content: completion.content,
                    usage: completion.usage,
                    model: provider.model.clone(),
                    provider: provider.kind,
                    attempts,
                    duration: started.elapsed(),
                })
            }
            Err(exhausted) => {
                let kind = match &exhausted.last {
                    AttemptError::TimedOut(_) => FailureKind::Timeout,
                    AttemptError::Failed(failure) => failure.kind,
                };
                let cause = match &exhausted.last {
                    AttemptError::Failed(failure) => failure.message.clone(),
                    timed_out => timed_out.to_string(),
                };

                tracing::warn!(
                    provider = %provider.kind,
                    attempts = exhausted.attempts,
                    failure = %kind,
                    cause = %cause,
                    "Provider execution failed"
                );

                Err(Error::ProviderExecution {
                    provider: provider.id().to_string(),
                    kind,
                    cause,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Completion, ProviderRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyClient {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProviderClient for FlakyClient {
        async fn execute(
            &self,
            _target: &ProviderTarget,
            _prompt: &Prompt,
            _options: &CompletionOptions,
        ) -> std::result::Result<Completion, ProviderFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ProviderFailure::transport(format!("HTTP 503 on call {n}")))
            } else {
                Ok(Completion {
                    content: "{\"summary\":\"ok\"}".to_string(),
                    usage: TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                    },
                })
            }
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "system".to_string(),
            user: "user".to_string(),
        }
    }

    fn executor(failures: u32) -> (RetryingExecutor, Arc<FlakyClient>, Arc<QuotaTracker>) {
        let client = Arc::new(FlakyClient {
            failures,
            calls: AtomicU32::new(0),
        });
        let quota = Arc::new(QuotaTracker::new());
        let executor = RetryingExecutor::new(client.clone(), quota.clone(), RetryPolicy::default())
            .with_server_credential(ProviderKind::Groq, "gsk_test");
        (executor, client, quota)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_failures() {
        let (executor, client, quota) = executor(2);
        let registry = ProviderRegistry::builtin();
        let groq = registry.get(ProviderKind::Groq).unwrap();

        let result = executor
            .execute(&groq, &prompt(), "alice", &UserCredentials::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.provider, ProviderKind::Groq);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(quota.usage("alice", ProviderKind::Groq), 1);
        assert!(groq.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_surface_error_after_backoff() {
        let (executor, client, quota) = executor(10);
        let registry = ProviderRegistry::builtin();
        let groq = registry.get(ProviderKind::Groq).unwrap();
        let started = tokio::time::Instant::now();

        let err = executor
            .execute(&groq, &prompt(), "alice", &UserCredentials::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProviderExecution { kind: FailureKind::Transport, .. }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_millis(6100));
        assert_eq!(quota.usage("alice", ProviderKind::Groq), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_premium_key_is_initialization_failure() {
        let (executor, client, _) = executor(0);
        let registry = ProviderRegistry::builtin();
        let openai = registry.get(ProviderKind::OpenAi).unwrap();

        let err = executor
            .execute(&openai, &prompt(), "alice", &UserCredentials::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ProviderExecution { kind: FailureKind::Initialization, .. }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(!openai.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_premium_usage_not_recorded() {
        let (executor, _, quota) = executor(0);
        let registry = ProviderRegistry::builtin();
        let openai = registry.get(ProviderKind::OpenAi).unwrap();
        let creds = UserCredentials::new().with(ProviderKind::OpenAi, "sk-0123456789abcdefghij");

        let result = executor
            .execute(&openai, &prompt(), "alice", &creds)
            .await
            .unwrap();

        assert_eq!(result.attempts, 1);
        assert_eq!(quota.usage("alice", ProviderKind::OpenAi), 0);
    }
}
