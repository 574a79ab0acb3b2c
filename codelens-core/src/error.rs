//! Error types for codelens-core

use thiserror::Error;

/// Why a single provider attempt failed.
///
/// Every variant is retried the same way; the distinction only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential could not be resolved or the provider could not be set up
    Initialization,
    /// Network or HTTP-level failure
    Transport,
    /// The attempt exceeded its time budget
    Timeout,
    /// The provider answered with something we could not read
    MalformedResponse,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Initialization => "initialization",
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::MalformedResponse => "malformed_response",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the codelens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// No provider is usable for this user and analysis kind
    #[error("no provider available: {0}")]
    NoProviderAvailable(String),

    /// A provider call failed after its attempt budget
    #[error("provider {provider} failed ({kind}): {cause}")]
    ProviderExecution {
        provider: String,
        kind: FailureKind,
        cause: String,
    },

    /// Provider response failed structural parsing
    #[error("validation error: {0}")]
    Validation(String),

    /// Job was cancelled at a step boundary
    #[error("analysis cancelled")]
    Cancelled,

    /// A job is already running for this project
    #[error("analysis already running for project {0}")]
    AlreadyRunning(String),

    /// Provider id is not in the registry
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Job id is not tracked
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote analysis store error
    #[error("store error: {0}")]
    Store(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the coordinator may try another provider after this error.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Error::ProviderExecution { .. })
    }
}

/// Result type alias for codelens-core
pub type Result<T> = std::result::Result<T, Error>;
