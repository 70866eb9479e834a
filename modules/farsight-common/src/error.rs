use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Scope;

/// Classification of a query failure. The orchestrator routes on this, so the
/// set is closed and serialized verbatim on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No adapter serves the requested scope.
    NoScope,
    NotFound,
    NotPermitted,
    Timeout,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NoScope => write!(f, "NOSCOPE"),
            ErrorKind::NotFound => write!(f, "NOTFOUND"),
            ErrorKind::NotPermitted => write!(f, "NOTPERMITTED"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::Other => write!(f, "OTHER"),
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOSCOPE" => Ok(Self::NoScope),
            "NOTFOUND" => Ok(Self::NotFound),
            "NOTPERMITTED" => Ok(Self::NotPermitted),
            "TIMEOUT" => Ok(Self::Timeout),
            "OTHER" => Ok(Self::Other),
            other => Err(format!("unknown ErrorKind: {other}")),
        }
    }
}

/// A 401/403 from a remote control plane, kept as the typed cause behind a
/// NOTPERMITTED so callers can still read the raw status and body.
#[derive(Debug, Error)]
#[error("remote API returned {status}: {body}")]
pub struct PermissionError {
    pub status: u16,
    pub body: String,
}

/// The error an adapter method returns. Carries the taxonomy kind, a
/// human-readable message and the originating scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
    pub scope: Option<Scope>,
    #[serde(skip)]
    permission: Option<Arc<PermissionError>>,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), scope: None, permission: None }
    }

    pub fn no_scope(scope: &Scope, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoScope, message).in_scope(scope)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotPermitted, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    /// Wrap an explicit 401/403 so the HTTP status survives as `source()`.
    pub fn from_permission(err: PermissionError) -> Self {
        let message = err.to_string();
        Self {
            kind: ErrorKind::NotPermitted,
            message,
            scope: None,
            permission: Some(Arc::new(err)),
        }
    }

    pub fn in_scope(mut self, scope: &Scope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The typed 401/403 cause, when this error came off the wire as one.
    pub fn permission(&self) -> Option<&PermissionError> {
        self.permission.as_deref()
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{} in scope {}: {}", self.kind, scope, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.permission
            .as_ref()
            .map(|p| p.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Top-level failures outside the per-query taxonomy.
#[derive(Error, Debug)]
pub enum FarsightError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Adapter registration error: {0}")]
    Registration(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
