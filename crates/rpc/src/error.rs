//! Vendor error classification and the client error types.
//!
//! The device reports failures as `(code, message)` pairs. Classification
//! folds them into a fixed [`ErrorKind`] taxonomy. Kinds that mean "this
//! device does not support that" are *ignorable*: callers probing optional
//! capabilities treat them as an absent feature instead of a fault.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vendor codes
// ---------------------------------------------------------------------------

pub const CODE_USER_OR_PASSWORD_NOT_VALID: i64 = 268632085;
pub const CODE_USER_LOCKED: i64 = 268632081;
pub const CODE_USER_BLACKLISTED: i64 = 268632082;
pub const CODE_USER_IN_USE: i64 = 268632083;
pub const CODE_INVALID_SESSION: i64 = 287637505;
pub const CODE_INVALID_SESSION_ALT: i64 = 287637504;
pub const CODE_INVALID_REQUEST: i64 = 268894209;
pub const CODE_METHOD_NOT_FOUND: i64 = 268894210;
pub const CODE_UNKNOWN: i64 = 268959743;
pub const CODE_INTERFACE_NOT_FOUND: i64 = 285409284;
pub const CODE_NO_DATA: i64 = 285409409;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable classification of a vendor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidLogin,
    InvalidSession,
    InvalidRequest,
    MethodNotFound,
    InterfaceNotFound,
    NoData,
    Unknown,
}

impl ErrorKind {
    /// Classify a vendor `(code, message)` pair.
    ///
    /// Known codes win; otherwise the message is matched; anything else is
    /// [`ErrorKind::Unknown`].
    pub fn classify(code: i64, message: &str) -> Self {
        match code {
            CODE_USER_OR_PASSWORD_NOT_VALID
            | CODE_USER_LOCKED
            | CODE_USER_BLACKLISTED
            | CODE_USER_IN_USE => return ErrorKind::InvalidLogin,
            CODE_INVALID_SESSION | CODE_INVALID_SESSION_ALT => return ErrorKind::InvalidSession,
            CODE_INVALID_REQUEST => return ErrorKind::InvalidRequest,
            CODE_METHOD_NOT_FOUND => return ErrorKind::MethodNotFound,
            CODE_INTERFACE_NOT_FOUND => return ErrorKind::InterfaceNotFound,
            CODE_NO_DATA => return ErrorKind::NoData,
            CODE_UNKNOWN => return ErrorKind::Unknown,
            _ => {}
        }

        let message = message.to_ascii_lowercase();
        if message.contains("invalid session") {
            ErrorKind::InvalidSession
        } else if message.contains("interface not found") {
            ErrorKind::InterfaceNotFound
        } else if message.contains("method not found") {
            ErrorKind::MethodNotFound
        } else if message.contains("no data") {
            ErrorKind::NoData
        } else if message.contains("request invalid") || message.contains("invalid request") {
            ErrorKind::InvalidRequest
        } else if message.contains("password not valid") || message.contains("has been locked") {
            ErrorKind::InvalidLogin
        } else {
            ErrorKind::Unknown
        }
    }

    /// Whether the kind means "feature absent" rather than a fault.
    pub fn is_ignorable(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest
                | ErrorKind::MethodNotFound
                | ErrorKind::InterfaceNotFound
                | ErrorKind::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidLogin => "invalid_login",
            ErrorKind::InvalidSession => "invalid_session",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::MethodNotFound => "method_not_found",
            ErrorKind::InterfaceNotFound => "interface_not_found",
            ErrorKind::NoData => "no_data",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Login failures
// ---------------------------------------------------------------------------

/// Why the device refused a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginFailure {
    UserOrPasswordNotValid,
    Locked,
    Blacklisted,
    InUse,
    Other,
}

impl LoginFailure {
    pub fn from_code(code: i64) -> Self {
        match code {
            CODE_USER_OR_PASSWORD_NOT_VALID => LoginFailure::UserOrPasswordNotValid,
            CODE_USER_LOCKED => LoginFailure::Locked,
            CODE_USER_BLACKLISTED => LoginFailure::Blacklisted,
            CODE_USER_IN_USE => LoginFailure::InUse,
            _ => LoginFailure::Other,
        }
    }
}

/// Terminal login failure. Needs a credential or device-side change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason:?} ({code}): {message}")]
pub struct LoginError {
    pub reason: LoginFailure,
    pub code: i64,
    pub message: String,
}

impl LoginError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            reason: LoginFailure::from_code(code),
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport and client errors
// ---------------------------------------------------------------------------

/// Network-level failure. Always retryable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else if e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// Errors returned by [`RpcClient`](crate::client::RpcClient) calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The device could not be reached or did not answer in time.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device answered with a classified error.
    #[error("{method} failed with {kind} ({code}): {message}")]
    Protocol {
        method: String,
        kind: ErrorKind,
        code: i64,
        message: String,
    },

    /// The device refused the credentials.
    #[error("login failed: {0}")]
    Login(#[from] LoginError),

    /// The device broke the protocol (e.g. no challenge in login phase 1).
    #[error("protocol violation in {method}: {detail}")]
    Violation { method: String, detail: String },

    /// The response parameters did not have the expected shape.
    #[error("failed to decode {method} response: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

impl RpcError {
    /// Classified kind, for protocol errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RpcError::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_ignorable(&self) -> bool {
        self.kind().map(ErrorKind::is_ignorable).unwrap_or(false)
    }

    pub fn is_no_data(&self) -> bool {
        self.kind() == Some(ErrorKind::NoData)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    /// Whether operators need to fix credentials rather than wait.
    pub fn is_login_failure(&self) -> bool {
        matches!(self, RpcError::Login(_))
    }
}

/// Turn an ignorable protocol error into `Ok(None)`.
///
/// Used when probing optional device capabilities.
pub fn ignore_unsupported<T>(result: Result<T, RpcError>) -> Result<Option<T>, RpcError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_ignorable() => Ok(None),
        Err(e) => Err(e),
    }
}
