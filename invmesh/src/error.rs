use thiserror::Error;

/// Result type alias for invmesh operations
pub type Result<T> = std::result::Result<T, InvMeshError>;

/// Errors raised by the invmesh runtime itself.
///
/// These never travel on the wire. Faults that can still be answered with an
/// envelope are converted into an [`Exception`](crate::exception::Exception)
/// and replied in-band; only the variants for which [`is_fatal`] returns true
/// escape the worker loop.
///
/// [`is_fatal`]: InvMeshError::is_fatal
#[derive(Error, Debug)]
pub enum InvMeshError {
    /// The broker closed or reset the connection mid-request
    #[error("peer reset the connection: {0}")]
    PeerReset(String),

    /// The very first poll of a worker failed
    #[error("first poll failed: {0}")]
    FirstPoll(String),

    /// The broker answered with a non-success HTTP status
    #[error("request failed with status code {status}")]
    Status { status: u16, body: Option<String> },

    /// Per-call timeout elapsed
    #[error("timeout of {timeout_ms}ms exceeded")]
    Timeout { timeout_ms: u64 },

    /// Any other transport level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Message serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker address discovery failed
    #[error("address resolution failed for '{address}': {reason}")]
    Resolution { address: String, reason: String },

    /// Configuration errors, including a second instance in one process
    #[error("configuration error: {0}")]
    Config(String),
}

impl InvMeshError {
    /// Create a new config error
    pub fn config_error<T: ToString>(message: T) -> Self {
        Self::Config(message.to_string())
    }

    /// Create a new resolution error
    pub fn resolution_error(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resolution {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the peer answered with `404 Not Found`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Whether the error must stop a worker instead of being replied in-band
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PeerReset(_) | Self::FirstPoll(_))
    }
}

impl From<config::ConfigError> for InvMeshError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
