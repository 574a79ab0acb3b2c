//! Shared fixtures: a scripted provider client and service wiring

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codelens_core::orchestrator::StepHandlers;
use codelens_core::providers::{
    Completion, CompletionOptions, ProviderClient, ProviderFailure, ProviderTarget,
};
use codelens_core::{
    AnalysisService, Config, EnvelopeMetadata, MemoryAnalysisStore, ProjectFile, ProjectSnapshot,
    Prompt, ProviderKind, QuotaTracker, ResultEnvelope, TokenUsage,
};

/// A well-formed findings payload.
pub const FINDINGS: &str = r#"{"summary": "looks fine", "issues": [{"title": "unused import"}], "score": 82, "recommendations": ["remove dead code"]}"#;

/// What the scripted client does for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
}

impl Reply {
    pub fn findings() -> Self {
        Reply::Text(FINDINGS.to_string())
    }

    pub fn fail() -> Self {
        Reply::Fail("connection reset".to_string())
    }
}

/// Provider client driven by a per-provider reply queue.
///
/// When a provider's queue is empty the default reply is used. Prompts whose
/// user text contains a poison marker always fail.
pub struct ScriptedClient {
    default: Reply,
    queues: Mutex<HashMap<ProviderKind, VecDeque<Reply>>>,
    poison: Option<String>,
    delay: Duration,
    calls: AtomicU32,
    calls_by_provider: Mutex<HashMap<ProviderKind, u32>>,
}

impl ScriptedClient {
    pub fn new(default: Reply) -> Self {
        Self {
            default,
            queues: Mutex::new(HashMap::new()),
            poison: None,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            calls_by_provider: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poison(mut self, marker: &str) -> Self {
        self.poison = Some(marker.to_string());
        self
    }

    pub fn script(self, provider: ProviderKind, replies: Vec<Reply>) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(provider)
            .or_default()
            .extend(replies);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, provider: ProviderKind) -> u32 {
        self.calls_by_provider
            .lock()
            .unwrap()
            .get(&provider)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    async fn execute(
        &self,
        target: &ProviderTarget,
        prompt: &Prompt,
        _options: &CompletionOptions,
    ) -> Result<Completion, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_provider
            .lock()
            .unwrap()
            .entry(target.provider)
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(marker) = &self.poison {
            if prompt.user.contains(marker.as_str()) {
                return Err(ProviderFailure::transport("poisoned prompt"));
            }
        }

        let reply = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&target.provider)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default.clone());

        match reply {
            Reply::Text(content) => Ok(Completion {
                content,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                },
            }),
            Reply::Fail(message) => Err(ProviderFailure::transport(message)),
        }
    }
}

/// Config with no on-disk quota ledger and no delay between steps.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.quota.persist = false;
    config.orchestrator.step_delay_ms = 0;
    config
}

pub struct Harness {
    pub service: AnalysisService,
    pub client: Arc<ScriptedClient>,
    pub store: Arc<MemoryAnalysisStore>,
}

pub fn harness(client: ScriptedClient) -> Harness {
    harness_with(client, &test_config(), None)
}

pub fn harness_with(
    client: ScriptedClient,
    config: &Config,
    handlers: Option<StepHandlers>,
) -> Harness {
    codelens_core::logging::init_test();
    let client = Arc::new(client);
    let store = Arc::new(MemoryAnalysisStore::new());

    let mut builder = AnalysisService::builder(config)
        .expect("builder")
        .client(client.clone())
        .store(store.clone())
        .quota(Arc::new(QuotaTracker::new()))
        .server_credential(ProviderKind::Gemini, "gemini-test-key")
        .server_credential(ProviderKind::Groq, "groq-test-key")
        .server_credential(ProviderKind::HuggingFace, "hf-test-key");
    if let Some(handlers) = handlers {
        builder = builder.handlers(handlers);
    }

    Harness {
        service: builder.build().expect("build"),
        client,
        store,
    }
}

/// A project of `count` source files, optionally with one test file.
pub fn project(id: &str, count: usize, with_tests: bool) -> ProjectSnapshot {
    let mut files: Vec<ProjectFile> = (1..=count)
        .map(|i| {
            ProjectFile::new(format!("src/module_{i:02}.rs"), 120)
                .with_content(format!("pub fn f{i}() -> u32 {{ {i} }}"))
        })
        .collect();
    if with_tests {
        files.push(
            ProjectFile::new("tests/smoke_test.rs", 40).with_content("#[test] fn smoke() {}"),
        );
    }
    ProjectSnapshot::new(id, files)
}

pub fn ok_envelope(provider: &str) -> ResultEnvelope {
    ResultEnvelope {
        success: true,
        analysis_id: format!("test-{provider}"),
        provider: Some(provider.to_string()),
        results: serde_json::json!({"summary": "ok", "issues": [], "recommendations": []}),
        metadata: EnvelopeMetadata {
            attempts: 1,
            valid: true,
            ..Default::default()
        },
        timestamp: "2026-10-16T00:00:00Z".to_string(),
    }
}
