//! Error types and numeric codes for the runtime.

/// Numeric error codes reported across the bridge and in CLI output.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const LOOKUP_FAILED: i32 = -32850;
    pub const LOOKUP_TIMEOUT: i32 = -32851;
    pub const CHANNEL_CLOSED: i32 = -32852;
    pub const STORAGE_ERROR: i32 = -32853;
    pub const CONFIG_ERROR: i32 = -32854;
}

/// Failure of a single privileged lookup.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("HTTP {0}")]
    Http(u16),

    #[error("User not found")]
    UserNotFound,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    /// Failure reported by the far side of the bridge, as flattened on the wire.
    #[error("{0}")]
    Remote(String),
}

/// All errors that can occur in the runtime.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("Lookup timed out after {0} ms")]
    Timeout(u64),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Filter error: {0}")]
    Filter(#[from] geo_filter::FilterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        match self {
            RuntimeError::ParseError(_) | RuntimeError::Json(_) => PARSE_ERROR,
            RuntimeError::Lookup(_) => LOOKUP_FAILED,
            RuntimeError::Timeout(_) => LOOKUP_TIMEOUT,
            RuntimeError::ChannelClosed => CHANNEL_CLOSED,
            RuntimeError::Config(_) => CONFIG_ERROR,
            RuntimeError::Filter(_) => STORAGE_ERROR,
            RuntimeError::InternalError(_) | RuntimeError::Io(_) => INTERNAL_ERROR,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
