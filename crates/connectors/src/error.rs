use thiserror::Error;

/// Failures surfaced by provider adapters.
///
/// Adapters resolve what they safely can internally (429 retries, expired
/// sync tokens) and only raise conditions the orchestrator or pipeline must
/// decide on.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("HTTP {status}: {body}")]
    Download { status: u16, body: String },

    /// Sync token rejected by the source (HTTP 410). Handled inside the
    /// adapter by falling back to a full listing; never escapes a
    /// well-behaved `detect_changes`.
    #[error("sync token expired")]
    Gone,

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected payload: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether redelivering the triggering message could ever succeed.
    pub fn is_terminal(&self) -> bool {
        match self {
            ProviderError::Authentication(_) => true,
            ProviderError::FileTooLarge { .. } => true,
            // Permanent client errors; 429 and 410 never reach here as
            // Download.
            ProviderError::Download { status, .. } => (400..500).contains(status),
            ProviderError::RateLimited { .. }
            | ProviderError::Gone
            | ProviderError::Request(_)
            | ProviderError::Decode(_) => false,
        }
    }
}
