//! Error taxonomy shared by strategies, the generic store and the resolver.

use serde::{Deserialize, Serialize};

use crate::validation::ErrorList;

/// Faults surfaced by the registry layer.
///
/// Collaborator errors pass through unchanged; the type is `Clone + PartialEq`
/// so callers can assert that a propagated error is the one they produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum RegistryError {
    /// Structured, field-pathed validation failures. Never retried.
    #[error("{kind} {name:?} is invalid: {errors}")]
    Invalid { kind: String, name: String, errors: ErrorList },
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("operation cannot be fulfilled on {kind} {name:?}: {message}")]
    Conflict { kind: String, name: String, message: String },
    /// Malformed client input detected before any lookup.
    #[error("{0}")]
    BadRequest(String),
    /// An object of the wrong kind reached a strategy or matcher: a wiring defect.
    #[error("object is not a {expected} (found {found})")]
    TypeMismatch { expected: String, found: String },
    /// The looked-up object has no usable network address.
    #[error("{0}")]
    MissingHost(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl RegistryError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { kind: kind.into(), name: name.into() }
    }

    pub fn invalid(kind: impl Into<String>, name: impl Into<String>, errors: ErrorList) -> Self {
        Self::Invalid { kind: kind.into(), name: name.into(), errors }
    }

    pub fn conflict(kind: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict { kind: kind.into(), name: name.into(), message: message.into() }
    }

    /// Client-facing reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "Invalid",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Conflict { .. } => "Conflict",
            Self::BadRequest(_) => "BadRequest",
            Self::TypeMismatch { .. } | Self::Internal(_) => "InternalError",
            Self::MissingHost(_) => "ServiceUnavailable",
        }
    }

    /// HTTP-equivalent status code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Invalid { .. } => 422,
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } | Self::Conflict { .. } => 409,
            Self::BadRequest(_) => 400,
            Self::TypeMismatch { .. } | Self::Internal(_) => 500,
            Self::MissingHost(_) => 503,
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
    pub fn is_invalid(&self) -> bool { matches!(self, Self::Invalid { .. }) }
    pub fn is_conflict(&self) -> bool { matches!(self, Self::Conflict { .. }) }
    pub fn is_bad_request(&self) -> bool { matches!(self, Self::BadRequest(_)) }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self { Self::Internal(format!("object codec: {e}")) }
}
