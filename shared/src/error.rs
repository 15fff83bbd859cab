use serde::{Deserialize, Serialize};

/// Error taxonomy of the chat core.
///
/// Validation and authorization errors are terminal for the operation that
/// triggered them and are only ever reported to the initiating user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Transport failure. Recoverable by retrying.
    #[error("network error: {0}")]
    Network(String),
    /// Missing or invalid realtime credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error kind used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotAuthorized,
    NotFound,
    Network,
    Auth,
    Internal,
}

/// JSON error body returned by HTTP endpoints and carried by `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::NotAuthorized(m)
            | Self::NotFound(m)
            | Self::Network(m)
            | Self::Auth(m)
            | Self::Internal(m) => m,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.detail().to_string(),
        }
    }
}

impl From<ErrorBody> for ChatError {
    fn from(body: ErrorBody) -> Self {
        match body.kind {
            ErrorKind::Validation => Self::Validation(body.message),
            ErrorKind::NotAuthorized => Self::NotAuthorized(body.message),
            ErrorKind::NotFound => Self::NotFound(body.message),
            ErrorKind::Network => Self::Network(body.message),
            ErrorKind::Auth => Self::Auth(body.message),
            ErrorKind::Internal => Self::Internal(body.message),
        }
    }
}
