//! Error types for the gateway, the job monitor, and the reconciliation engine.
//!
//! Gateway failures keep the upstream status code and body intact so the
//! engine can decide what they mean (not found, already running, rejected
//! mutation). The engine then maps everything it surfaces to a caller-facing
//! [`ErrorKind`], which is the stable `errorKind` code returned by the HTTP
//! layer.

use serde::Serialize;
use thiserror::Error;

/// Wordings the platform uses when it refuses a start because indexing is
/// already underway. Generic "in progress" text (a data source deletion in
/// progress, say) is not one of them.
const ALREADY_RUNNING_PHRASES: &[&str] = &[
    "already running",
    "already in progress",
    "already being indexed",
    "indexing in progress",
    "indexing job in progress",
    "job is in progress",
];

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised by a [`ResourceGateway`](crate::gateway::ResourceGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The platform answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response whose body was not JSON.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl GatewayError {
    /// HTTP status of the upstream response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether the platform is refusing to start indexing because a job is
    /// already running for the knowledge base.
    ///
    /// The platform has no dedicated status code for this, so any 409 counts,
    /// as does any error body that says so in words.
    pub fn is_already_running(&self) -> bool {
        match self {
            GatewayError::Status { status, message } => {
                if *status == 409 {
                    return true;
                }
                let lower = message.to_ascii_lowercase();
                ALREADY_RUNNING_PHRASES
                    .iter()
                    .any(|phrase| lower.contains(phrase))
            }
            _ => false,
        }
    }

    /// Upstream message without the status prefix.
    pub fn upstream_message(&self) -> String {
        match self {
            GatewayError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Project, database or embedding model could not be resolved.
    ConfigMissing,
    KbCreateFailed,
    DatasourceAddFailed,
    DatasourceDeleteFailed,
    /// Job start was rejected for a reason other than "already running".
    IndexingStartFailed,
    /// Already running, but no active job could be found.
    IndexingConflictUnresolved,
    IndexingFailed,
    IndexingTimeout,
    /// A read against the platform failed.
    UpstreamError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigMissing => "CONFIG_MISSING",
            ErrorKind::KbCreateFailed => "KB_CREATE_FAILED",
            ErrorKind::DatasourceAddFailed => "DATASOURCE_ADD_FAILED",
            ErrorKind::DatasourceDeleteFailed => "DATASOURCE_DELETE_FAILED",
            ErrorKind::IndexingStartFailed => "INDEXING_START_FAILED",
            ErrorKind::IndexingConflictUnresolved => "INDEXING_CONFLICT_UNRESOLVED",
            ErrorKind::IndexingFailed => "INDEXING_FAILED",
            ErrorKind::IndexingTimeout => "INDEXING_TIMEOUT",
            ErrorKind::UpstreamError => "UPSTREAM_ERROR",
        }
    }

    /// Whether re-invoking later (same inputs, same job id) may succeed
    /// without any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::IndexingConflictUnresolved
                | ErrorKind::IndexingTimeout
                | ErrorKind::UpstreamError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure returned by the engine: `{ errorKind, message }`.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct ReconcileError {
    #[serde(rename = "errorKind")]
    pub kind: ErrorKind,
    pub message: String,
}

impl ReconcileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrap a gateway failure, keeping only the upstream message.
    pub fn upstream(kind: ErrorKind, err: &GatewayError) -> Self {
        Self::new(kind, err.upstream_message())
    }
}

/// Errors raised by [`JobMonitor::poll`](crate::monitor::JobMonitor::poll).
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("indexing failed: {message}")]
    IndexingFailed { message: String },

    #[error("indexing did not finish after {attempts} attempts")]
    IndexingTimeout { attempts: u32 },

    #[error("status fetch failed: {0}")]
    Upstream(#[from] GatewayError),
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::IndexingFailed { .. } => ErrorKind::IndexingFailed,
            MonitorError::IndexingTimeout { .. } => ErrorKind::IndexingTimeout,
            MonitorError::Upstream(_) => ErrorKind::UpstreamError,
        }
    }
}

impl From<MonitorError> for ReconcileError {
    fn from(err: MonitorError) -> Self {
        let kind = err.kind();
        let message = match err {
            MonitorError::IndexingFailed { message } => message,
            MonitorError::Upstream(inner) => inner.upstream_message(),
            other => other.to_string(),
        };
        ReconcileError::new(kind, message)
    }
}
