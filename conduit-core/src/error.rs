//! Error types for CONDUIT operations

use thiserror::Error;

/// Errors raised by backend factories and live handles.
///
/// `ConstructionFailed` is what a factory returns when it cannot build a
/// handle. The cache hands it back to the caller of `acquire` untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Construction failed for {scheme}://{authority}: {reason}")]
    ConstructionFailed {
        scheme: String,
        authority: String,
        reason: String,
    },

    #[error("Close failed for {destination}: {reason}")]
    CloseFailed { destination: String, reason: String },

    #[error("Handle for {destination} is already closed")]
    AlreadyClosed { destination: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No backend factory registered for scheme: {scheme}")]
    UnknownScheme { scheme: String },

    #[error("Failed to parse {source_name}: {reason}")]
    ParseFailed { source_name: String, reason: String },

    #[error("Global handle provider is already installed")]
    AlreadyInstalled,
}

/// Caller identity errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Principal name must not be empty")]
    EmptyPrincipal,

    #[error("Credential set lock poisoned")]
    LockPoisoned,
}

/// A single handle that failed to close during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// Human-readable description of the cache entry.
    pub entry: String,
    /// The error reported by the handle.
    pub error: BackendError,
}

/// Handle cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Sweep closed all entries but {} handle(s) failed to close", failures.len())]
    SweepIncomplete { failures: Vec<CloseFailure> },
}

/// Record serialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Stream is not open")]
    NotOpen,

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("Failed to encode {schema} record: {reason}")]
    Encode { schema: String, reason: String },

    #[error("Failed to decode {schema} record: {reason}")]
    Decode { schema: String, reason: String },
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Io {
            reason: err.to_string(),
        }
    }
}

/// Master error type for all CONDUIT errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConduitError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for CONDUIT operations.
pub type ConduitResult<T> = Result<T, ConduitError>;

// =============================================================================
// TESTS
// =============================================================================
