//! Per-user, per-provider monthly usage counters
//!
//! Windows are keyed by `(user, provider, period)` with period `YYYY-MM` in UTC.
//! Rollover needs no job: a new month simply has no window yet. Old windows are
//! never deleted.
//!
//! An optional SQLite ledger makes counters survive restarts. Rows are written
//! while the window lock is held, so the ledger never goes backwards. Ledger
//! failures are logged and never surface to callers.

use crate::db::Database;
use crate::error::Result;
use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Usage accumulated by one user on one provider in one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaWindow {
    pub user_id: String,
    pub provider: ProviderKind,
    pub period: String,
    pub request_count: u64,
    pub token_count: u64,
    pub cost: f64,
}

type WindowKey = (String, ProviderKind, String);

/// Period key for a timestamp.
pub fn period_of(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Period key for now.
pub fn current_period() -> String {
    period_of(Utc::now())
}

/// Tracks request counts against free-tier limits.
#[derive(Default)]
pub struct QuotaTracker {
    windows: Mutex<HashMap<WindowKey, QuotaWindow>>,
    ledger: Option<Arc<Database>>,
}

impl QuotaTracker {
    /// In-memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backed by a ledger; loads the current period's windows.
    pub fn with_ledger(ledger: Arc<Database>) -> Result<Self> {
        let period = current_period();
        let loaded = ledger.quota_windows_for_period(&period)?;
        tracing::debug!(period = %period, windows = loaded.len(), "Loaded quota windows");

        let windows = loaded
            .into_iter()
            .map(|w| ((w.user_id.clone(), w.provider, w.period.clone()), w))
            .collect();

        Ok(Self {
            windows: Mutex::new(windows),
            ledger: Some(ledger),
        })
    }

    /// Requests recorded this period; 0 when nothing was recorded.
    pub fn usage(&self, user_id: &str, provider: ProviderKind) -> u64 {
        self.usage_in(user_id, provider, &current_period())
    }

    pub fn usage_in(&self, user_id: &str, provider: ProviderKind, period: &str) -> u64 {
        let windows = self.windows.lock().unwrap();
        windows
            .get(&(user_id.to_string(), provider, period.to_string()))
            .map(|w| w.request_count)
            .unwrap_or(0)
    }

    /// Snapshot of this period's window, if any.
    pub fn window(&self, user_id: &str, provider: ProviderKind) -> Option<QuotaWindow> {
        let windows = self.windows.lock().unwrap();
        windows
            .get(&(user_id.to_string(), provider, current_period()))
            .cloned()
    }

    /// Count one request. Never fails.
    pub fn record(&self, user_id: &str, provider: ProviderKind, tokens: u64, cost: f64) {
        self.record_in(user_id, provider, tokens, cost, &current_period());
    }

    pub fn record_in(
        &self,
        user_id: &str,
        provider: ProviderKind,
        tokens: u64,
        cost: f64,
        period: &str,
    ) {
        let mut windows = self.windows.lock().unwrap();
        let window = windows
            .entry((user_id.to_string(), provider, period.to_string()))
            .or_insert_with(|| QuotaWindow {
                user_id: user_id.to_string(),
                provider,
                period: period.to_string(),
                request_count: 0,
                token_count: 0,
                cost: 0.0,
            });
        window.request_count += 1;
        window.token_count += tokens;
        window.cost += cost;

        tracing::debug!(
            user_id,
            provider = %provider,
            period,
            requests = window.request_count,
            "Recorded provider usage"
        );

        // Written under the window lock so ledger rows land in count order
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.upsert_quota_window(window) {
                tracing::warn!(provider = %provider, error = %e, "Failed to persist quota window");
            }
        }
    }
}
