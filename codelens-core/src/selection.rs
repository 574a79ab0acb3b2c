//! Provider selection
//!
//! Decides which provider serves a request, based on tier gating (quota for free
//! providers, a plausible user key for premium ones) and a static preference list
//! per analysis kind.

use crate::error::{Error, Result};
use crate::providers::{Provider, ProviderKind, ProviderRegistry, ProviderTier};
use crate::quota::QuotaTracker;
use crate::types::{AnalysisKind, UserCredentials};
use serde::Serialize;
use std::sync::Arc;

/// Whether a provider can serve a given user right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    /// Free-tier monthly limit used up
    LimitReached,
    /// Premium provider without a plausible user key
    RequiresCredential,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::LimitReached => "limit_reached",
            AvailabilityStatus::RequiresCredential => "requires_credential",
        }
    }
}

/// One row of the availability listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAvailability {
    pub provider: ProviderKind,
    pub display_name: String,
    pub tier: ProviderTier,
    pub model: String,
    pub status: AvailabilityStatus,
    /// Requests used this period (free tier)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl ProviderAvailability {
    pub fn is_available(&self) -> bool {
        self.status == AvailabilityStatus::Available
    }
}

/// Preferred providers for an analysis kind, best first.
pub fn preference_order(kind: AnalysisKind) -> &'static [ProviderKind] {
    use ProviderKind::*;
    match kind {
        AnalysisKind::FullProject => &[Anthropic, OpenAi, Gemini, Groq, HuggingFace],
        AnalysisKind::SingleFile => &[OpenAi, Anthropic, Groq, Gemini, HuggingFace],
        AnalysisKind::BugFix => &[Anthropic, OpenAi, Gemini, Groq],
        AnalysisKind::SecurityAudit => &[Anthropic, OpenAi, Gemini, Groq],
        AnalysisKind::Performance => &[Groq, Gemini, OpenAi, Anthropic],
        AnalysisKind::TestCoverage => &[OpenAi, Gemini, Groq, Anthropic],
        AnalysisKind::Insights => &[Anthropic, OpenAi, Gemini],
        AnalysisKind::Predictive => &[Gemini, Groq, Anthropic, OpenAi],
    }
}

/// Picks providers for requests.
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    quota: Arc<QuotaTracker>,
}

impl ProviderSelector {
    pub fn new(registry: Arc<ProviderRegistry>, quota: Arc<QuotaTracker>) -> Self {
        Self { registry, quota }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    fn status_of(
        &self,
        provider: &Provider,
        user_id: &str,
        credentials: &UserCredentials,
    ) -> (AvailabilityStatus, Option<u64>) {
        match provider.tier {
            ProviderTier::Free => {
                let used = self.quota.usage(user_id, provider.kind);
                let status = match provider.monthly_limit {
                    Some(limit) if used >= u64::from(limit) => AvailabilityStatus::LimitReached,
                    _ => AvailabilityStatus::Available,
                };
                (status, Some(used))
            }
            ProviderTier::Premium => {
                let plausible = credentials
                    .get(provider.kind)
                    .map(|key| provider.profile.credential_source().is_plausible(key))
                    .unwrap_or(false);
                let status = if plausible {
                    AvailabilityStatus::Available
                } else {
                    AvailabilityStatus::RequiresCredential
                };
                (status, None)
            }
        }
    }

    /// Every registered provider with its status for this user.
    ///
    /// Available before unavailable; among available, premium before free;
    /// registry order otherwise.
    pub fn available_providers(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
    ) -> Vec<ProviderAvailability> {
        let mut rows: Vec<ProviderAvailability> = self
            .registry
            .all()
            .iter()
            .map(|provider| {
                let (status, usage) = self.status_of(provider, user_id, credentials);
                ProviderAvailability {
                    provider: provider.kind,
                    display_name: provider.display_name.clone(),
                    tier: provider.tier,
                    model: provider.model.clone(),
                    status,
                    usage,
                    limit: provider.monthly_limit,
                }
            })
            .collect();

        rows.sort_by_key(|row| {
            let available = row.is_available();
            (!available, available && row.tier == ProviderTier::Free)
        });
        rows
    }

    /// Best available provider for `kind`.
    pub fn select_provider(
        &self,
        user_id: &str,
        kind: AnalysisKind,
        credentials: &UserCredentials,
    ) -> Result<Arc<Provider>> {
        self.select_provider_excluding(user_id, kind, credentials, &[])
    }

    /// Like [`select_provider`](Self::select_provider), skipping providers already tried.
    pub fn select_provider_excluding(
        &self,
        user_id: &str,
        kind: AnalysisKind,
        credentials: &UserCredentials,
        excluded: &[ProviderKind],
    ) -> Result<Arc<Provider>> {
        let available: Vec<ProviderKind> = self
            .available_providers(user_id, credentials)
            .into_iter()
            .filter(|row| row.is_available() && !excluded.contains(&row.provider))
            .map(|row| row.provider)
            .collect();

        if available.is_empty() {
            return Err(Error::NoProviderAvailable(format!(
                "{} analysis for user {}",
                kind, user_id
            )));
        }

        let chosen = preference_order(kind)
            .iter()
            .copied()
            .find(|k| available.contains(k))
            .unwrap_or(available[0]);

        tracing::debug!(
            user_id,
            analysis_kind = %kind,
            provider = %chosen,
            excluded = excluded.len(),
            "Selected provider"
        );

        self.registry
            .get(chosen)
            .ok_or_else(|| Error::UnknownProvider(chosen.to_string()))
    }
}
