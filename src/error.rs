use thiserror::Error;

/// Everything that can end a signing round or a single node's contribution to one.
///
/// Node-local failures (`Transport`, `Verification`, `MalformedResult`) are absorbed by the
/// gatherer and only show up in its counters; the remaining variants are round-level outcomes.
#[derive(Debug, Error)]
pub enum SigningError {
    // setup
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid hex value: {0}")]
    Format(String),

    // per node
    #[error("transport error: {0}")]
    Transport(String),

    #[error("BLS verification failed: {0}")]
    Verification(String),

    #[error("malformed result: {0}")]
    MalformedResult(String),

    #[error("{tool} failed: {detail}")]
    Capability { tool: String, detail: String },

    #[error("BLS-sign finished with error: {0}")]
    Custodian(String),

    // round outcomes
    #[error("signature error(2), got {errors} errors(s) for {nodes} node(s)")]
    InsufficientQuorum { errors: usize, nodes: usize },

    #[error("signature error(3), got {errors} errors(s) for {nodes} node(s)")]
    Timeout { errors: usize, nodes: usize },

    #[error("signing round exceeded {limit_ms} ms, got {errors} errors(s) for {nodes} node(s)")]
    WallClock {
        limit_ms: u64,
        errors: usize,
        nodes: usize,
    },

    #[error("aggregate signature was not verified, no verification capability configured")]
    VerificationSkipped,

    #[error("signing round ended without a result")]
    Abandoned,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SigningError {
    /// Poll-step ceiling or outer wall clock.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WallClock { .. })
    }
}

impl From<reqwest::Error> for SigningError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
