//! Error types for the console.

use std::fmt;

use thiserror::Error;

/// Result type alias using the console's error type.
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Everything that can go wrong while talking to the log API or running a
/// console workflow.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The request never produced an HTTP response (connect, timeout, TLS).
    #[error("Request failed: {0}")]
    Transport(String),

    /// The server rejected the credentials or the session token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller-supplied input was malformed, locally or according to the server.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success HTTP status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// The enqueue call succeeded at the HTTP level but returned no job id.
    #[error("Export was not enqueued")]
    EnqueueRejected,

    #[error("Export {job_id} failed")]
    ExportFailed { job_id: String },

    #[error("Export {job_id} timed out after {attempts} polls")]
    ExportTimedOut { job_id: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification category a failure belongs to. Each error maps onto exactly
/// one kind so the presentation layer can pick its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Authentication,
    Validation,
    JobFailed,
    Timeout,
    Local,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Authentication => write!(f, "auth"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::JobFailed => write!(f, "job-failed"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Local => write!(f, "local"),
        }
    }
}

impl ConsoleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsoleError::Transport(_)
            | ConsoleError::NotFound(_)
            | ConsoleError::Api { .. }
            | ConsoleError::Decode(_) => ErrorKind::Transport,
            ConsoleError::Unauthorized(_) => ErrorKind::Authentication,
            ConsoleError::Validation(_) => ErrorKind::Validation,
            ConsoleError::EnqueueRejected | ConsoleError::ExportFailed { .. } => {
                ErrorKind::JobFailed
            }
            ConsoleError::ExportTimedOut { .. } => ErrorKind::Timeout,
            ConsoleError::Config(_) | ConsoleError::Io(_) => ErrorKind::Local,
        }
    }

    /// Map a non-success HTTP status plus the server's message onto a variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ConsoleError::Unauthorized(message),
            400 | 422 => ConsoleError::Validation(message),
            404 => ConsoleError::NotFound(message),
            _ => ConsoleError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ConsoleError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ConsoleError::from_status(status.as_u16(), e.to_string())
        } else {
            ConsoleError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(e: serde_json::Error) -> Self {
        ConsoleError::Decode(e.to_string())
    }
}

impl From<serde_yaml::Error> for ConsoleError {
    fn from(e: serde_yaml::Error) -> Self {
        ConsoleError::Config(e.to_string())
    }
}
