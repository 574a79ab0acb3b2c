//! Durable record of finished analyses
//!
//! The engine only ever calls [`AnalysisStore::save_analysis`] and never waits on
//! the outcome for correctness: callers spawn the save and log failures.
//! [`RemoteAnalysisStore`] posts to an HTTP save API; [`MemoryAnalysisStore`] is
//! used when no server is configured, and by tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::types::{AnalysisKind, ResultEnvelope, Subject};

/// What gets persisted for one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub kind: AnalysisKind,
    pub subject: Subject,
    pub user_id: String,
    /// Set for project-wide jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub envelope: ResultEnvelope,
}

/// Persistence API.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Save a record; returns the stored id.
    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<String>;

    /// Fetch a stored record by id; `None` if it does not exist.
    async fn fetch_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>>;
}

/// Spawn a save and log the outcome. Never fails.
pub fn persist_in_background(store: std::sync::Arc<dyn AnalysisStore>, record: AnalysisRecord) {
    tokio::spawn(async move {
        match store.save_analysis(&record).await {
            Ok(id) => tracing::debug!(
                analysis_id = %record.envelope.analysis_id,
                stored_id = %id,
                "Analysis persisted"
            ),
            Err(e) => tracing::warn!(
                analysis_id = %record.envelope.analysis_id,
                error = %e,
                "Failed to persist analysis"
            ),
        }
    });
}

/// Response from POST /analyses
#[derive(Debug, Deserialize)]
struct SaveResponse {
    id: String,
}

/// HTTP client for the analysis save API
pub struct RemoteAnalysisStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl RemoteAnalysisStore {
    /// Create a store client from configuration
    ///
    /// Returns an error if `server_url` is missing or the config is invalid.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("store.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AnalysisStore for RemoteAnalysisStore {
    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<String> {
        let url = format!("{}/analyses", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| Error::Store(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let saved: SaveResponse = response
                .json()
                .await
                .map_err(|e| Error::Store(format!("failed to parse response: {}", e)))?;
            Ok(saved.id)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Store(format!("API error ({}): {}", status, error_text)))
        }
    }

    async fn fetch_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let url = format!("{}/analyses/{}", self.base_url, urlencoding::encode(id));

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Store(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let record: AnalysisRecord = response
                .json()
                .await
                .map_err(|e| Error::Store(format!("failed to parse response: {}", e)))?;
            Ok(Some(record))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(None)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Store(format!("API error ({}): {}", status, error_text)))
        }
    }
}

/// Keeps records in process memory.
#[derive(Default)]
pub struct MemoryAnalysisStore {
    records: Mutex<Vec<AnalysisRecord>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<String> {
        self.records.lock().unwrap().push(record.clone());
        Ok(record.envelope.analysis_id.clone())
    }

    async fn fetch_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.envelope.analysis_id == id)
            .cloned())
    }
}
