//! Request error types.
//!
//! Errors are classified by tag, not by type: every [`RequestError`] maps to
//! an [`ErrorClass`] that drives retry and cancellation handling.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Transport-level failure category reported by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    ConnectTimeout,
    SendTimeout,
    ReceiveTimeout,
    /// Non-success status code returned by the remote end.
    Status(u16),
    /// The transport aborted the call because its cancellation token fired.
    Cancelled,
    Other,
}

/// Error raised by an injected service call.
#[derive(Debug, Clone)]
pub struct ServiceError {
    kind: ServiceErrorKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Status(code), message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Other, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ServiceErrorKind::Cancelled, "transport cancelled")
    }

    /// Attach the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Connect/send/receive timeouts and 5xx statuses.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ServiceErrorKind::ConnectTimeout
            | ServiceErrorKind::SendTimeout
            | ServiceErrorKind::ReceiveTimeout => true,
            ServiceErrorKind::Status(code) => (500..600).contains(&code),
            ServiceErrorKind::Cancelled | ServiceErrorKind::Other => false,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ServiceErrorKind::Status(code) => write!(f, "Service error (status {code}): {}", self.message),
            _ => write!(f, "Service error: {}", self.message),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors surfaced by the orchestrator and its rate-limiting primitives.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request superseded by a newer request for the same key")]
    Superseded,

    #[error("Retry cancelled")]
    RetryCancelled,

    #[error("Debounced call cancelled")]
    DebounceCancelled,

    #[error("Throttled call cancelled")]
    ThrottleCancelled,

    #[error("No previous params recorded for the active key")]
    NoPreviousParams,

    #[error("load_more requires a load_more_params function")]
    LoadMoreUnavailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Classification used for retry and visibility decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Intentional abandonment; never surfaced to hooks or state.
    Cancellation,
    /// Worth retrying.
    Transient,
    /// Genuine failure, surfaced verbatim.
    Permanent,
    /// Programmer misuse, raised synchronously.
    Misuse,
}

/// Pluggable replacement for [`RequestError::class`].
pub type ErrorClassifier = Arc<dyn Fn(&RequestError) -> ErrorClass + Send + Sync>;

impl RequestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Service(e) if e.kind() == ServiceErrorKind::Cancelled => ErrorClass::Cancellation,
            Self::Service(e) if e.is_transient() => ErrorClass::Transient,
            Self::Service(_) => ErrorClass::Permanent,
            Self::Cancelled
            | Self::Superseded
            | Self::RetryCancelled
            | Self::DebounceCancelled
            | Self::ThrottleCancelled => ErrorClass::Cancellation,
            Self::NoPreviousParams | Self::LoadMoreUnavailable | Self::InvalidConfig(_) => {
                ErrorClass::Misuse
            }
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.class() == ErrorClass::Cancellation
    }

    /// Status code, when the service reported one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service(e) => match e.kind() {
                ServiceErrorKind::Status(code) => Some(code),
                _ => None,
            },
            _ => None,
        }
    }
}
