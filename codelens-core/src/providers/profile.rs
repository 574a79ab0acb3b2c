//! Built-in provider catalog
//!
//! Each provider kind has its own settings struct; everything kind-specific is
//! answered by matching on [`ProviderProfile`].

use super::{ProviderKind, ProviderTier};
use crate::config::ProviderOverride;

/// Where a provider's credential comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Server-side environment variable, read once
    ServerEnv(&'static str),
    /// Key supplied by the user with each request
    UserKey {
        prefix: &'static str,
        min_len: usize,
    },
}

impl CredentialSource {
    /// Cheap shape check for a user-supplied key. Server credentials always pass.
    pub fn is_plausible(&self, key: &str) -> bool {
        match self {
            CredentialSource::ServerEnv(_) => true,
            CredentialSource::UserKey { prefix, min_len } => {
                let key = key.trim();
                key.starts_with(prefix) && key.len() >= *min_len
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    pub model: String,
    pub endpoint: String,
    pub monthly_limit: u32,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            monthly_limit: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroqSettings {
    pub model: String,
    pub endpoint: String,
    pub monthly_limit: u32,
}

impl Default for GroqSettings {
    fn default() -> Self {
        Self {
            model: "llama-3.3-70b-versatile".to_string(),
            endpoint: "https://api.groq.com/openai/v1".to_string(),
            monthly_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HuggingFaceSettings {
    pub model: String,
    pub endpoint: String,
    pub monthly_limit: u32,
}

impl Default for HuggingFaceSettings {
    fn default() -> Self {
        Self {
            model: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
            endpoint: "https://router.huggingface.co/v1".to_string(),
            monthly_limit: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiSettings {
    pub model: String,
    pub endpoint: String,
    /// Sent as `OpenAI-Organization` when set
    pub organization: Option<String>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            organization: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicSettings {
    pub model: String,
    pub endpoint: String,
    /// Sent as `anthropic-version`
    pub api_version: String,
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-latest".to_string(),
            endpoint: "https://api.anthropic.com/v1".to_string(),
            api_version: "2023-06-01".to_string(),
        }
    }
}

/// Static configuration for one provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderProfile {
    Gemini(GeminiSettings),
    Groq(GroqSettings),
    HuggingFace(HuggingFaceSettings),
    OpenAi(OpenAiSettings),
    Anthropic(AnthropicSettings),
}

impl ProviderProfile {
    /// Default profile for a kind.
    pub fn builtin(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gemini => ProviderProfile::Gemini(GeminiSettings::default()),
            ProviderKind::Groq => ProviderProfile::Groq(GroqSettings::default()),
            ProviderKind::HuggingFace => ProviderProfile::HuggingFace(HuggingFaceSettings::default()),
            ProviderKind::OpenAi => ProviderProfile::OpenAi(OpenAiSettings::default()),
            ProviderKind::Anthropic => ProviderProfile::Anthropic(AnthropicSettings::default()),
        }
    }

    /// The whole catalog, in registry order.
    pub fn catalog() -> Vec<ProviderProfile> {
        ProviderKind::ALL.into_iter().map(Self::builtin).collect()
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderProfile::Gemini(_) => ProviderKind::Gemini,
            ProviderProfile::Groq(_) => ProviderKind::Groq,
            ProviderProfile::HuggingFace(_) => ProviderKind::HuggingFace,
            ProviderProfile::OpenAi(_) => ProviderKind::OpenAi,
            ProviderProfile::Anthropic(_) => ProviderKind::Anthropic,
        }
    }

    pub fn tier(&self) -> ProviderTier {
        match self {
            ProviderProfile::Gemini(_)
            | ProviderProfile::Groq(_)
            | ProviderProfile::HuggingFace(_) => ProviderTier::Free,
            ProviderProfile::OpenAi(_) | ProviderProfile::Anthropic(_) => ProviderTier::Premium,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderProfile::Gemini(_) => "Google Gemini",
            ProviderProfile::Groq(_) => "Groq",
            ProviderProfile::HuggingFace(_) => "Hugging Face",
            ProviderProfile::OpenAi(_) => "OpenAI",
            ProviderProfile::Anthropic(_) => "Anthropic",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderProfile::Gemini(s) => &s.model,
            ProviderProfile::Groq(s) => &s.model,
            ProviderProfile::HuggingFace(s) => &s.model,
            ProviderProfile::OpenAi(s) => &s.model,
            ProviderProfile::Anthropic(s) => &s.model,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ProviderProfile::Gemini(s) => &s.endpoint,
            ProviderProfile::Groq(s) => &s.endpoint,
            ProviderProfile::HuggingFace(s) => &s.endpoint,
            ProviderProfile::OpenAi(s) => &s.endpoint,
            ProviderProfile::Anthropic(s) => &s.endpoint,
        }
    }

    /// Monthly request cap; free tier only.
    pub fn monthly_limit(&self) -> Option<u32> {
        match self {
            ProviderProfile::Gemini(s) => Some(s.monthly_limit),
            ProviderProfile::Groq(s) => Some(s.monthly_limit),
            ProviderProfile::HuggingFace(s) => Some(s.monthly_limit),
            ProviderProfile::OpenAi(_) | ProviderProfile::Anthropic(_) => None,
        }
    }

    pub fn credential_source(&self) -> CredentialSource {
        match self {
            ProviderProfile::Gemini(_) => CredentialSource::ServerEnv("GEMINI_API_KEY"),
            ProviderProfile::Groq(_) => CredentialSource::ServerEnv("GROQ_API_KEY"),
            ProviderProfile::HuggingFace(_) => CredentialSource::ServerEnv("HF_TOKEN"),
            ProviderProfile::OpenAi(_) => CredentialSource::UserKey {
                prefix: "sk-",
                min_len: 20,
            },
            ProviderProfile::Anthropic(_) => CredentialSource::UserKey {
                prefix: "sk-ant-",
                min_len: 20,
            },
        }
    }

    /// USD per token, used for ledger cost estimates.
    pub fn cost_per_token(&self) -> f64 {
        match self {
            ProviderProfile::Gemini(_)
            | ProviderProfile::Groq(_)
            | ProviderProfile::HuggingFace(_) => 0.0,
            ProviderProfile::OpenAi(_) => 0.000_01,
            ProviderProfile::Anthropic(_) => 0.000_015,
        }
    }

    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            ProviderProfile::Gemini(_) => &["code-review", "long-context", "json-mode"],
            ProviderProfile::Groq(_) => &["code-review", "low-latency", "json-mode"],
            ProviderProfile::HuggingFace(_) => &["code-review"],
            ProviderProfile::OpenAi(_) => &["code-review", "security", "json-mode", "test-generation"],
            ProviderProfile::Anthropic(_) => &["code-review", "security", "long-context", "insights"],
        }
    }

    /// Extra HTTP headers the provider expects on every call.
    pub fn extra_headers(&self) -> Vec<(String, String)> {
        match self {
            ProviderProfile::OpenAi(OpenAiSettings {
                organization: Some(org),
                ..
            }) => vec![("OpenAI-Organization".to_string(), org.clone())],
            ProviderProfile::Anthropic(s) => {
                vec![("anthropic-version".to_string(), s.api_version.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// Apply a config override. Monthly limits are ignored for premium providers.
    pub fn apply_override(&mut self, over: &ProviderOverride) {
        let (model, endpoint, limit) = match self {
            ProviderProfile::Gemini(s) => (&mut s.model, &mut s.endpoint, Some(&mut s.monthly_limit)),
            ProviderProfile::Groq(s) => (&mut s.model, &mut s.endpoint, Some(&mut s.monthly_limit)),
            ProviderProfile::HuggingFace(s) => {
                (&mut s.model, &mut s.endpoint, Some(&mut s.monthly_limit))
            }
            ProviderProfile::OpenAi(s) => (&mut s.model, &mut s.endpoint, None),
            ProviderProfile::Anthropic(s) => (&mut s.model, &mut s.endpoint, None),
        };

        if let Some(m) = &over.model {
            *model = m.clone();
        }
        if let Some(e) = &over.endpoint {
            *endpoint = e.trim_end_matches('/').to_string();
        }
        if let (Some(limit), Some(l)) = (limit, over.monthly_limit) {
            *limit = l;
        }
    }
}
