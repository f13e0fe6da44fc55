use thiserror::Error;

/// Failures reported by a [`DocumentStore`](crate::ports::DocumentStore).
///
/// `Conflict` and `ConnectionLost` are the two kinds callers are expected to
/// recover from; everything else is treated as fatal by the worker loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("view {0} returned no rows")]
    NoResults(String),

    /// The revision supplied with a write does not match the stored one.
    #[error("revision conflict on document {0}")]
    Conflict(String),

    #[error("connection to the store was lost: {0}")]
    ConnectionLost(String),

    #[error("document {id} is invalid: {source}")]
    InvalidDocument {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StoreError::ConnectionLost(_))
    }
}

/// Failures of in-record operations (attachments, ids).
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("attachment {0} not found")]
    MissingAttachment(String),

    #[error("attachment {name} is not valid base64: {source}")]
    Base64 {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("document id must be set")]
    MissingId,
}

/// Errors that terminate [`RunActor::run`](crate::app::RunActor::run).
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),

    #[error("signal handlers are already installed by another actor in this process")]
    HandlerAlreadyInstalled,

    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: ProcessError,
    },
}

/// Failure raised by task processing code. Recorded into the task's error
/// history, never propagated out of the run loop.
pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;
