//! Error types for the middleware

use thiserror::Error;

/// Middleware error types
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("Request timed out after {0} milliseconds")]
    Timeout(u64),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("invalid proxy string \"{proxy}\": {reason}")]
    BadProxyString { proxy: String, reason: String },

    #[error("invalid endpoint \"{endpoint}\": {reason}")]
    BadEndpoint { endpoint: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("Object adapter in {state} state (adapter: {adapter})")]
    AdapterState { adapter: String, state: String },

    #[error("object does not exist (proxy: {proxy}, adapter: {adapter})")]
    ObjectNotExist { proxy: String, adapter: String },

    #[error("operation \"{op}\" does not exist (proxy: {proxy}, adapter: {adapter})")]
    OperationNotExist {
        proxy: String,
        adapter: String,
        op: String,
    },

    #[error("{kind}: {message}")]
    UserException { kind: String, message: String },

    #[error("{0}")]
    Unknown(String),

    #[error("invalid request mode: expected {expected}, got {got}")]
    InvalidRequestMode { expected: String, got: String },

    #[error("task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl MiddlewareError {
    /// True for errors that indicate the peer could not be reached or the
    /// connection broke, as opposed to an answer from the peer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MiddlewareError::Io(_)
                | MiddlewareError::ConnectionClosed
                | MiddlewareError::InvalidFrame(_)
                | MiddlewareError::FrameTooLarge { .. }
                | MiddlewareError::BufferUnderflow { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MiddlewareError::Timeout(_))
    }

    /// Build a user exception for the remote side to raise.
    pub fn user(kind: impl Into<String>, message: impl Into<String>) -> Self {
        MiddlewareError::UserException {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MiddlewareError>;

/// Message used when a failure carries no text of its own
pub const UNKNOWN_EXCEPTION: &str = "unknown exception";

/// Extract the message from a caught panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        UNKNOWN_EXCEPTION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = MiddlewareError::Timeout(300);
        assert_eq!(err.to_string(), "Request timed out after 300 milliseconds");
        assert!(err.is_timeout());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_classification() {
        assert!(MiddlewareError::ConnectionClosed.is_transport());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(MiddlewareError::from(io).is_transport());
        assert!(!MiddlewareError::user("NotFound", "no such scope").is_transport());
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*caught), "boom 7");
        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
        assert_eq!(panic_message(&*caught), UNKNOWN_EXCEPTION);
    }
}
