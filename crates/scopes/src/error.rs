//! Error types for the scopes runtime

use scopes_rpc::MiddlewareError;
use thiserror::Error;

/// Result type for scopes operations
pub type Result<T> = std::result::Result<T, ScopesError>;

/// Error type handed to and returned from user scope code
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Wire kinds of the user exceptions raised by scopes servants
pub mod kind {
    pub const NOT_FOUND: &str = "NotFound";
    pub const INVALID_ARGUMENT: &str = "InvalidArgument";
    pub const LOGIC: &str = "Logic";
    pub const RESOURCE: &str = "Resource";
    pub const REGISTRY: &str = "Registry";
}

/// Scopes errors
#[derive(Error, Debug)]
pub enum ScopesError {
    /// Unknown scope (or other named entity)
    #[error("{what} \"{id}\" not found")]
    NotFound { what: String, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("logic error: {0}")]
    Logic(String),

    /// Failure inside user code or a resource it depends on
    #[error("resource error: {0}")]
    Resource(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("middleware error: {0}")]
    Middleware(#[from] MiddlewareError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ScopesError {
    pub fn not_found(what: impl Into<String>, id: impl Into<String>) -> Self {
        ScopesError::NotFound {
            what: what.into(),
            id: id.into(),
        }
    }

    /// True if a twoway call timed out; callers may retry these
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScopesError::Middleware(e) if e.is_timeout())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ScopesError::NotFound { .. })
    }

    /// Rebuild the typed error from what a remote servant raised
    pub fn from_remote(e: MiddlewareError) -> Self {
        match e {
            MiddlewareError::UserException { kind, message } => match kind.as_str() {
                kind::NOT_FOUND => ScopesError::not_found("scope", message),
                kind::INVALID_ARGUMENT => ScopesError::InvalidArgument(message),
                kind::LOGIC => ScopesError::Logic(message),
                kind::RESOURCE => ScopesError::Resource(message),
                kind::REGISTRY => ScopesError::Registry(message),
                _ => ScopesError::Middleware(MiddlewareError::UserException { kind, message }),
            },
            other => ScopesError::Middleware(other),
        }
    }
}

impl From<ScopesError> for MiddlewareError {
    fn from(e: ScopesError) -> Self {
        match e {
            ScopesError::NotFound { id, .. } => MiddlewareError::user(kind::NOT_FOUND, id),
            ScopesError::InvalidArgument(msg) => MiddlewareError::user(kind::INVALID_ARGUMENT, msg),
            ScopesError::Logic(msg) => MiddlewareError::user(kind::LOGIC, msg),
            ScopesError::Resource(msg) => MiddlewareError::user(kind::RESOURCE, msg),
            ScopesError::Registry(msg) => MiddlewareError::user(kind::REGISTRY, msg),
            ScopesError::Middleware(e) => e,
            other => MiddlewareError::Unknown(other.to_string()),
        }
    }
}
