//! Error types for tsmeta

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Numeric status codes carried on the wire next to the error message.
pub mod status {
    pub const SUCCESS: u16 = 200;
    pub const INVALID_PLAN: u16 = 301;
    pub const INVALID_AUTHOR_OPERATION: u16 = 302;
    pub const NOT_LEADER: u16 = 400;
    pub const TIMEOUT: u16 = 401;
    pub const ALREADY_EXISTS: u16 = 501;
    pub const NOT_FOUND: u16 = 502;
    pub const INSUFFICIENT_NODES: u16 = 503;
    pub const NODE_IN_USE: u16 = 504;
    pub const PERMISSION_DENIED: u16 = 602;
    pub const AUTHENTICATION_FAILED: u16 = 603;
    pub const INTERNAL: u16 = 900;
}

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command log error: {0}")]
    Log(String),

    // === Plan Errors ===
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid author operation code: {0}")]
    InvalidAuthorOperation(i32),

    // === Consensus Errors ===
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Catalog Errors ===
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // === Allocation Errors ===
    #[error("Insufficient running nodes: need {needed}, have {available}")]
    InsufficientNodes { needed: usize, available: usize },

    #[error("Node {0} still hosts region groups")]
    NodeInUse(u32),

    // === Auth Errors ===
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Client Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote error {code}: {message}")]
    Remote { code: u16, message: String },

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::NotLeader(_) | Error::InsufficientNodes { .. } => true,
            Error::Remote { code, .. } => matches!(
                *code,
                status::NOT_LEADER | status::TIMEOUT | status::INSUFFICIENT_NODES
            ),
            _ => false,
        }
    }

    /// Status code carried in RPC responses
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidPlan(_) => status::INVALID_PLAN,
            Error::InvalidAuthorOperation(_) => status::INVALID_AUTHOR_OPERATION,
            Error::NotLeader(_) => status::NOT_LEADER,
            Error::Timeout(_) => status::TIMEOUT,
            Error::AlreadyExists(_) => status::ALREADY_EXISTS,
            Error::NotFound(_) => status::NOT_FOUND,
            Error::InsufficientNodes { .. } => status::INSUFFICIENT_NODES,
            Error::NodeInUse(_) => status::NODE_IN_USE,
            Error::PermissionDenied(_) => status::PERMISSION_DENIED,
            Error::AuthenticationFailed(_) => status::AUTHENTICATION_FAILED,
            Error::Remote { code, .. } => *code,
            Error::Io(_)
            | Error::Log(_)
            | Error::InvalidConfig(_)
            | Error::Http(_)
            | Error::Internal(_) => status::INTERNAL,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidPlan(_) | Error::InvalidAuthorOperation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::NodeInUse(_) => StatusCode::CONFLICT,
            Error::NotLeader(_) => StatusCode::TEMPORARY_REDIRECT,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::InsufficientNodes { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Error::Http(_) | Error::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Log(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout("submit".into()).is_retryable());
        assert!(Error::NotLeader("node-2".into()).is_retryable());
        assert!(!Error::AlreadyExists("root.sg".into()).is_retryable());
        assert!(!Error::InvalidAuthorOperation(17).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::InvalidAuthorOperation(-1).status_code(),
            status::INVALID_AUTHOR_OPERATION
        );
        assert_eq!(
            Error::NotFound("root.sg".into()).to_http_status(),
            axum::http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Log("torn".into()).status_code(),
            status::INTERNAL
        );
    }
}
