use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A single field-level validation failure.
///
/// Raised before any side effect — a mutation that fails validation touches
/// neither the local store nor the sync metadata store.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"Validation failed at "{}": {}"#, self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors surfaced by local store / metadata store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// For adapters whose backend cannot express a miss as `Ok(None)`.
    /// The in-memory stores never construct this.
    #[error("Record not found: {scope}/{id}")]
    NotFound { scope: String, id: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Error from the remote gateway. Wraps arbitrary transport-layer failures
/// as strings so they can be captured into `SyncMetadata.last_error`.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}

// ---------------------------------------------------------------------------
// EngineError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Incompatible quantity unit: existing batch is {existing}, input is {incoming}")]
    IncompatibleUnit { existing: String, incoming: String },

    #[error("Offline: {0} requires connectivity")]
    Connectivity(String),

    #[error("Remote gateway failure: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias — the default error type is `EngineError`.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
