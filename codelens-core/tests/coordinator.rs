//! Request resolution through the service: coalescing, caching, retries and
//! provider fallback, driven by a scripted provider client.

mod common;

use std::time::Duration;

use codelens_core::config::ProviderOverride;
use codelens_core::{
    AnalysisKind, AnalysisRequest, AvailabilityStatus, ProviderKind, Subject, UserCredentials,
};
use common::{harness, harness_with, test_config, Reply, ScriptedClient};

fn file_request(file: &str) -> AnalysisRequest {
    AnalysisRequest::new(AnalysisKind::SingleFile, Subject::file("proj", file), "alice")
        .with_content("fn main() { println!(\"hi\"); }")
}

// ============================================
// Coalescing
// ============================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_share_one_execution() {
    let h = harness(ScriptedClient::new(Reply::findings()).with_delay(Duration::from_millis(200)));

    let resolves = (0..5).map(|_| {
        h.service
            .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
    });
    let envelopes = futures::future::join_all(resolves).await;

    assert_eq!(h.client.calls(), 1);
    let first = &envelopes[0].analysis_id;
    assert!(envelopes.iter().all(|e| &e.analysis_id == first));
    assert!(envelopes.iter().all(|e| e.success));
    assert_eq!(h.service.coordinator().in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_different_fingerprints_execute_separately() {
    let h = harness(ScriptedClient::new(Reply::findings()).with_delay(Duration::from_millis(50)));

    let (a, b) = tokio::join!(
        h.service
            .resolve_analysis(file_request("src/a.rs"), UserCredentials::new()),
        h.service
            .resolve_analysis(file_request("src/b.rs"), UserCredentials::new()),
    );

    assert_eq!(h.client.calls(), 2);
    assert_ne!(a.analysis_id, b.analysis_id);
}

#[tokio::test(start_paused = true)]
async fn test_paths_differing_only_in_escaped_characters_do_not_share_results() {
    let h = harness(ScriptedClient::new(Reply::findings()));

    let slash = h
        .service
        .resolve_analysis(file_request("src/a.rs"), UserCredentials::new())
        .await;
    let underscore = h
        .service
        .resolve_analysis(file_request("src_a.rs"), UserCredentials::new())
        .await;

    assert_eq!(h.client.calls(), 2);
    assert!(!underscore.metadata.cached);
    assert_ne!(slash.analysis_id, underscore.analysis_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_coalescing_holds_across_worker_threads() {
    const FILES: usize = 400;
    const CALLERS_PER_FILE: usize = 8;

    let h = harness(ScriptedClient::new(Reply::findings()));
    let credentials =
        UserCredentials::new().with(ProviderKind::OpenAi, "sk-test-0123456789abcdef0123");

    let mut tasks = Vec::with_capacity(FILES * CALLERS_PER_FILE);
    for i in 0..FILES {
        for _ in 0..CALLERS_PER_FILE {
            let service = h.service.clone();
            let credentials = credentials.clone();
            let request = file_request(&format!("src/module_{i}.rs"));
            tasks.push(tokio::spawn(async move {
                service.resolve_analysis(request, credentials).await
            }));
        }
    }

    for task in tasks {
        assert!(task.await.unwrap().success);
    }

    assert_eq!(h.client.calls(), FILES as u32);
    assert_eq!(h.service.coordinator().in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_execution_settles_when_caller_goes_away() {
    let h = harness(ScriptedClient::new(Reply::findings()).with_delay(Duration::from_millis(500)));

    let service = h.service.clone();
    let caller = tokio::spawn(async move {
        service
            .resolve_analysis(file_request("src/lib.rs"), UserCredentials::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.service.coordinator().in_flight_len(), 0);

    // The abandoned execution still populated the cache.
    let envelope = h
        .service
        .resolve_analysis(file_request("src/lib.rs"), UserCredentials::new())
        .await;
    assert!(envelope.metadata.cached);
    assert_eq!(h.client.calls(), 1);
}

// ============================================
// Caching
// ============================================

#[tokio::test(start_paused = true)]
async fn test_cached_result_expires_after_freshness_window() {
    let h = harness(ScriptedClient::new(Reply::findings()));

    let first = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;
    assert!(!first.metadata.cached);
    assert_eq!(h.client.calls(), 1);

    tokio::time::advance(Duration::from_secs(299)).await;
    let second = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;
    assert!(second.metadata.cached);
    assert_eq!(second.analysis_id, first.analysis_id);
    assert_eq!(h.client.calls(), 1);

    tokio::time::advance(Duration::from_millis(1001)).await;
    let third = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;
    assert!(!third.metadata.cached);
    assert_ne!(third.analysis_id, first.analysis_id);
    assert_eq!(h.client.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_predictive_results_use_longer_window() {
    let h = harness(ScriptedClient::new(Reply::findings()));
    let request = || {
        AnalysisRequest::new(AnalysisKind::Predictive, Subject::project("proj"), "alice")
    };

    h.service
        .resolve_analysis(request(), UserCredentials::new())
        .await;
    tokio::time::advance(Duration::from_secs(600)).await;
    let again = h
        .service
        .resolve_analysis(request(), UserCredentials::new())
        .await;

    assert!(again.metadata.cached);
    assert_eq!(h.client.calls(), 1);
}

// ============================================
// Retry and fallback
// ============================================

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_on_same_provider() {
    let client = ScriptedClient::new(Reply::findings())
        .script(ProviderKind::Groq, vec![Reply::fail(), Reply::fail()]);
    let h = harness(client);

    let request = AnalysisRequest::new(AnalysisKind::Performance, Subject::project("proj"), "alice");
    let envelope = h
        .service
        .resolve_analysis(request, UserCredentials::new())
        .await;

    assert!(envelope.success);
    assert_eq!(envelope.provider.as_deref(), Some("groq"));
    assert_eq!(envelope.metadata.attempts, 3);
    assert_eq!(h.client.calls_to(ProviderKind::Groq), 3);
    assert_eq!(h.client.calls_to(ProviderKind::Gemini), 0);
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_next_provider_after_exhaustion() {
    let client = ScriptedClient::new(Reply::findings())
        .script(ProviderKind::Groq, vec![Reply::fail(), Reply::fail(), Reply::fail()]);
    let h = harness(client);

    let request = AnalysisRequest::new(AnalysisKind::Performance, Subject::project("proj"), "alice");
    let envelope = h
        .service
        .resolve_analysis(request, UserCredentials::new())
        .await;

    assert!(envelope.success);
    assert_eq!(envelope.provider.as_deref(), Some("gemini"));
    assert_eq!(envelope.metadata.attempts, 4);
    assert_eq!(h.client.calls_to(ProviderKind::Groq), 3);
    assert_eq!(h.client.calls_to(ProviderKind::Gemini), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_envelope_when_every_provider_fails() {
    let h = harness(ScriptedClient::new(Reply::fail()));

    let envelope = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;

    assert!(!envelope.success);
    assert!(envelope.provider.is_none());
    assert_eq!(envelope.metadata.attempts, 6);
    assert!(envelope.metadata.error.is_some());
    assert!(!envelope.results["summary"].as_str().unwrap().is_empty());
    assert_eq!(envelope.results["confidence"], "low");
    assert_eq!(h.client.calls(), 6);

    // Degraded results are never cached.
    h.service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;
    assert_eq!(h.client.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_premium_provider_used_when_key_supplied() {
    let h = harness(ScriptedClient::new(Reply::findings()));
    let credentials =
        UserCredentials::new().with(ProviderKind::OpenAi, "sk-test-0123456789abcdef0123");

    let envelope = h
        .service
        .resolve_analysis(file_request("src/main.rs"), credentials)
        .await;

    assert_eq!(envelope.provider.as_deref(), Some("openai"));
    assert_eq!(h.client.calls_to(ProviderKind::OpenAi), 1);
    // Premium usage is not metered.
    assert_eq!(h.service.quota().usage("alice", ProviderKind::OpenAi), 0);
}

// ============================================
// Quota
// ============================================

#[tokio::test(start_paused = true)]
async fn test_exhausted_quota_moves_selection_to_next_provider() {
    let mut config = test_config();
    config.providers.insert(
        "groq".to_string(),
        ProviderOverride {
            monthly_limit: Some(2),
            ..Default::default()
        },
    );
    let h = harness_with(ScriptedClient::new(Reply::findings()), &config, None);

    for i in 0..2 {
        let request = AnalysisRequest::new(
            AnalysisKind::Performance,
            Subject::file("proj", format!("src/hot_{i}.rs")),
            "alice",
        );
        let envelope = h
            .service
            .resolve_analysis(request, UserCredentials::new())
            .await;
        assert_eq!(envelope.provider.as_deref(), Some("groq"));
    }
    assert_eq!(h.service.quota().usage("alice", ProviderKind::Groq), 2);

    let groq = h
        .service
        .available_providers("alice", &UserCredentials::new())
        .into_iter()
        .find(|row| row.provider == ProviderKind::Groq)
        .unwrap();
    assert_eq!(groq.status, AvailabilityStatus::LimitReached);

    let request = AnalysisRequest::new(
        AnalysisKind::Performance,
        Subject::file("proj", "src/hot_2.rs"),
        "alice",
    );
    let envelope = h
        .service
        .resolve_analysis(request, UserCredentials::new())
        .await;
    assert_eq!(envelope.provider.as_deref(), Some("gemini"));
    assert_eq!(h.client.calls_to(ProviderKind::Groq), 2);

    // Another user has their own window.
    assert_eq!(h.service.quota().usage("bob", ProviderKind::Groq), 0);
}

#[tokio::test]
async fn test_no_provider_available_degrades_without_calls() {
    let mut config = test_config();
    for id in ["gemini", "groq", "huggingface"] {
        config.providers.insert(
            id.to_string(),
            ProviderOverride {
                monthly_limit: Some(0),
                ..Default::default()
            },
        );
    }
    let h = harness_with(ScriptedClient::new(Reply::findings()), &config, None);

    let envelope = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;

    assert!(!envelope.success);
    assert!(envelope
        .metadata
        .error
        .as_deref()
        .unwrap()
        .contains("no provider available"));
    assert_eq!(h.client.calls(), 0);
}

// ============================================
// Validation
// ============================================

#[tokio::test]
async fn test_unparseable_output_is_returned_raw_and_not_cached() {
    let raw = "The code looks fine to me, nothing to report.";
    let h = harness(ScriptedClient::new(Reply::Text(raw.to_string())));

    let envelope = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;

    assert!(envelope.success);
    assert!(!envelope.metadata.valid);
    assert_eq!(envelope.results["raw"], raw);

    h.service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;
    assert_eq!(h.client.calls(), 2);
}

#[tokio::test]
async fn test_fenced_json_is_accepted() {
    let fenced = format!("```json\n{}\n```", common::FINDINGS);
    let h = harness(ScriptedClient::new(Reply::Text(fenced)));

    let envelope = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;

    assert!(envelope.metadata.valid);
    assert_eq!(envelope.results["score"], 82);
    assert_eq!(envelope.metadata.usage.total_tokens, 150);
}

#[tokio::test]
async fn test_successful_results_are_persisted() {
    let h = harness(ScriptedClient::new(Reply::findings()));

    let envelope = h
        .service
        .resolve_analysis(file_request("src/main.rs"), UserCredentials::new())
        .await;

    for _ in 0..20 {
        if !h.store.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].envelope.analysis_id, envelope.analysis_id);
    assert_eq!(records[0].user_id, "alice");
    assert!(records[0].job_id.is_none());
}
