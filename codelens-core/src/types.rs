//! Core domain types for codelens
//!
//! | Term | Definition |
//! |------|------------|
//! | **AnalysisRequest** | One logical ask: a kind of analysis over a subject, on behalf of a user |
//! | **Subject** | What is being analyzed: a project, optionally narrowed to a file or a bug |
//! | **Fingerprint** | Stable key derived from kind + subject ids; the cache and coalescing key |
//! | **ResultEnvelope** | The unit handed back to callers and stored in the cache |
//! | **ProjectSnapshot** | The file listing a project-wide job is planned from |

use crate::providers::ProviderKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================
// Analysis kinds
// ============================================

/// Kind of analysis requested.
///
/// Drives provider preference order and cache freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    FullProject,
    SingleFile,
    BugFix,
    SecurityAudit,
    Performance,
    TestCoverage,
    Insights,
    Predictive,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 8] = [
        AnalysisKind::FullProject,
        AnalysisKind::SingleFile,
        AnalysisKind::BugFix,
        AnalysisKind::SecurityAudit,
        AnalysisKind::Performance,
        AnalysisKind::TestCoverage,
        AnalysisKind::Insights,
        AnalysisKind::Predictive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::FullProject => "full-project",
            AnalysisKind::SingleFile => "single-file",
            AnalysisKind::BugFix => "bug-fix",
            AnalysisKind::SecurityAudit => "security-audit",
            AnalysisKind::Performance => "performance",
            AnalysisKind::TestCoverage => "test-coverage",
            AnalysisKind::Insights => "insights",
            AnalysisKind::Predictive => "predictive",
        }
    }

    /// Predictive scans use the longer freshness window.
    pub fn is_predictive(&self) -> bool {
        matches!(self, AnalysisKind::Predictive)
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AnalysisKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown analysis kind: {s}"))
    }
}

// ============================================
// Requests and fingerprints
// ============================================

/// What an analysis is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub project_id: String,
    pub file_id: Option<String>,
    pub bug_id: Option<String>,
}

impl Subject {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            file_id: None,
            bug_id: None,
        }
    }

    pub fn file(project_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            file_id: Some(file_id.into()),
            bug_id: None,
        }
    }

    pub fn with_bug(mut self, bug_id: impl Into<String>) -> Self {
        self.bug_id = Some(bug_id.into());
        self
    }
}

/// One logical analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub kind: AnalysisKind,
    pub subject: Subject,
    /// Free-text instructions from the user
    #[serde(default)]
    pub instructions: String,
    pub user_id: String,
    /// Material the prompt is built from (file body, tree listing, digests).
    /// Not part of the fingerprint.
    #[serde(default)]
    pub content: Option<String>,
}

impl AnalysisRequest {
    pub fn new(kind: AnalysisKind, subject: Subject, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            subject,
            instructions: String::new(),
            user_id: user_id.into(),
            content: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::for_request(self)
    }
}

/// Maximum fingerprint length in bytes.
pub const MAX_FINGERPRINT_LEN: usize = 128;

/// Hex digits of the subject hash at the end of every fingerprint.
const FINGERPRINT_HASH_LEN: usize = 16;

/// Deterministic cache/coalescing key for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build from kind + subject identifiers.
    ///
    /// `kind:project:file:bug` with characters outside `[A-Za-z0-9._:-]` turned
    /// into `_`, cut to fit, then `~` and a short sha256 of the unescaped parts.
    /// The readable prefix is for logs only; the hash keeps distinct subjects apart.
    pub fn for_request(request: &AnalysisRequest) -> Self {
        let subject = &request.subject;
        let parts = [
            Some(request.kind.as_str()),
            Some(subject.project_id.as_str()),
            subject.file_id.as_deref(),
            subject.bug_id.as_deref(),
        ];

        let readable: String = parts
            .iter()
            .map(|part| part.unwrap_or("-"))
            .collect::<Vec<_>>()
            .join(":")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        // Tagged and length-prefixed, so no two part lists hash the same input
        let mut hasher = Sha256::new();
        for part in parts {
            match part {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        let digest = hex::encode(hasher.finalize());

        // readable is pure ASCII, so byte slicing is safe
        let keep = readable.len().min(MAX_FINGERPRINT_LEN - FINGERPRINT_HASH_LEN - 1);
        Fingerprint(format!(
            "{}~{}",
            &readable[..keep],
            &digest[..FINGERPRINT_HASH_LEN]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prompt sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// ============================================
// Credentials
// ============================================

/// Credentials a user supplied for premium providers.
///
/// `Debug` never prints the secrets.
#[derive(Clone, Default)]
pub struct UserCredentials {
    keys: HashMap<ProviderKind, String>,
}

impl UserCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ProviderKind, key: impl Into<String>) -> Self {
        self.insert(provider, key);
        self
    }

    pub fn insert(&mut self, provider: ProviderKind, key: impl Into<String>) {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(provider, key.trim().to_string());
        }
    }

    pub fn get(&self, provider: ProviderKind) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&str> = self.keys.keys().map(|k| k.as_str()).collect();
        providers.sort_unstable();
        f.debug_struct("UserCredentials")
            .field("providers", &providers)
            .finish()
    }
}

// ============================================
// Results
// ============================================

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Execution metadata carried by every envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub duration_ms: u64,
    pub attempts: u32,
    pub usage: TokenUsage,
    /// Served from the result cache
    pub cached: bool,
    /// Provider output parsed as structured findings
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The unit returned to callers and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub success: bool,
    pub analysis_id: String,
    /// Provider id that produced the result
    pub provider: Option<String>,
    pub results: serde_json::Value,
    pub metadata: EnvelopeMetadata,
    /// RFC 3339
    pub timestamp: String,
}

impl ResultEnvelope {
    /// Well-formed failure envelope used when every provider is exhausted.
    pub fn degraded(reason: impl Into<String>, attempts: u32, duration_ms: u64) -> Self {
        let reason = reason.into();
        Self {
            success: false,
            analysis_id: uuid::Uuid::new_v4().to_string(),
            provider: None,
            results: fallback_payload(),
            metadata: EnvelopeMetadata {
                duration_ms,
                attempts,
                usage: TokenUsage::default(),
                cached: false,
                valid: false,
                error: Some(reason),
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Copy of this envelope marked as a cache hit.
    pub fn as_cached(&self) -> Self {
        let mut envelope = self.clone();
        envelope.metadata.cached = true;
        envelope
    }
}

fn fallback_payload() -> serde_json::Value {
    serde_json::json!({
        "summary": "Analysis service is temporarily unavailable. No AI provider could complete this request; results below are a placeholder.",
        "issues": [],
        "confidence": "low",
        "score": null,
        "recommendations": [
            "Retry the analysis in a few minutes.",
            "Add a premium provider key to avoid shared free-tier limits."
        ]
    })
}

// ============================================
// Projects
// ============================================

/// A file inside a project snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    /// Path relative to the project root, `/`-separated
    pub path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Heuristic used to decide whether a test-coverage step is worthwhile.
    pub fn is_test_like(&self) -> bool {
        let path = self.path.to_ascii_lowercase();
        let file_name = path.rsplit('/').next().unwrap_or(&path);

        path.split('/')
            .any(|segment| matches!(segment, "test" | "tests" | "__tests__" | "spec" | "specs"))
            || file_name.starts_with("test_")
            || file_name.contains("_test.")
            || file_name.contains(".test.")
            || file_name.contains(".spec.")
            || file_name.contains("_spec.")
    }
}

/// File listing a project-wide job is planned from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub project_id: String,
    pub name: Option<String>,
    pub root: Option<PathBuf>,
    pub files: Vec<ProjectFile>,
}

impl ProjectSnapshot {
    pub fn new(project_id: impl Into<String>, files: Vec<ProjectFile>) -> Self {
        Self {
            project_id: project_id.into(),
            name: None,
            root: None,
            files,
        }
    }

    pub fn has_tests(&self) -> bool {
        self.files.iter().any(ProjectFile::is_test_like)
    }

    /// Newline-separated path listing, used as structure-step input.
    pub fn tree_listing(&self) -> String {
        let mut paths: Vec<&str> = self.files.iter().map(|f| f.path.as_str()).collect();
        paths.sort_unstable();
        paths.join("\n")
    }
}
