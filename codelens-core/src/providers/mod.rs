//! AI provider registry
//!
//! The registry is built once from the catalog plus config overrides and is
//! read-only afterwards. The only mutation is a provider's `initialized` flag.

pub mod client;
pub mod profile;

pub use client::{
    Completion, CompletionOptions, HttpProviderClient, ProviderClient, ProviderFailure,
    ProviderTarget,
};
pub use profile::{CredentialSource, ProviderProfile};

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Supported AI backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Registry order.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Gemini,
        ProviderKind::Groq,
        ProviderKind::HuggingFace,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownProvider(s.to_string()))
    }
}

/// Free providers are gated by a monthly quota, premium ones by a user credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    Free,
    Premium,
}

impl ProviderTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTier::Free => "free",
            ProviderTier::Premium => "premium",
        }
    }
}

/// A registered AI backend.
#[derive(Debug)]
pub struct Provider {
    pub kind: ProviderKind,
    pub display_name: String,
    pub tier: ProviderTier,
    pub model: String,
    pub capabilities: BTreeSet<String>,
    pub cost_per_token: f64,
    pub requires_user_credential: bool,
    /// Free tier only
    pub monthly_limit: Option<u32>,
    pub profile: ProviderProfile,
    initialized: AtomicBool,
}

impl Provider {
    pub fn from_profile(profile: ProviderProfile) -> Self {
        let tier = profile.tier();
        Self {
            kind: profile.kind(),
            display_name: profile.display_name().to_string(),
            tier,
            model: profile.model().to_string(),
            capabilities: profile
                .capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            cost_per_token: profile.cost_per_token(),
            requires_user_credential: tier == ProviderTier::Premium,
            monthly_limit: profile.monthly_limit(),
            profile,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn is_free(&self) -> bool {
        self.tier == ProviderTier::Free
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Flip `initialized`. Returns true only for the call that flipped it.
    pub fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }
}

/// Read-only lookup from provider kind to provider.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<Provider>>,
}

impl ProviderRegistry {
    pub fn new(profiles: Vec<ProviderProfile>) -> Self {
        let providers = profiles
            .into_iter()
            .map(|p| Arc::new(Provider::from_profile(p)))
            .collect();
        Self { providers }
    }

    /// Catalog defaults, no overrides.
    pub fn builtin() -> Self {
        Self::new(ProviderProfile::catalog())
    }

    /// Catalog with `[providers.<id>]` overrides applied.
    pub fn from_config(config: &Config) -> Result<Self> {
        for id in config.providers.keys() {
            id.parse::<ProviderKind>()?;
        }

        let profiles = ProviderProfile::catalog()
            .into_iter()
            .map(|mut profile| {
                if let Some(over) = config.providers.get(profile.kind().as_str()) {
                    tracing::debug!(provider = %profile.kind(), "Applying provider override");
                    profile.apply_override(over);
                }
                profile
            })
            .collect();

        Ok(Self::new(profiles))
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<Provider>> {
        self.providers.iter().find(|p| p.kind == kind).cloned()
    }

    /// Look up by id; unknown ids are an error.
    pub fn lookup(&self, id: &str) -> Result<Arc<Provider>> {
        let kind: ProviderKind = id.parse()?;
        self.get(kind)
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }

    /// Providers in registry order.
    pub fn all(&self) -> &[Arc<Provider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
