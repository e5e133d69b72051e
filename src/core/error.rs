//! Error types surfaced by the gateway and the financial calculator.

use crate::core::model::EntityKind;
use thiserror::Error;

/// Authentication failures. Any of these clears the held session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("not logged in")]
    NotLoggedIn,

    /// Rejected login. Carries the backend's reason verbatim so callers can
    /// tell wrong credentials from a locked account.
    #[error("login rejected: {0}")]
    InvalidCredentials(String),

    #[error("session expired")]
    Expired,

    #[error("access denied: {0}")]
    Denied(String),
}

/// Everything a gateway operation can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("backend unreachable: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Only transport failures are worth retrying; everything else would fail
    /// the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Transport(format!("malformed response: {e}"))
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Failures of the pure financial calculations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("invalid financing input: {0}")]
    InvalidFinancingInput(String),

    #[error("IRR did not converge: {0}")]
    NoConvergence(String),
}

/// A calculation run on behalf of a gateway call failed on its inputs.
impl From<CalcError> for GatewayError {
    fn from(e: CalcError) -> Self {
        GatewayError::Validation(e.to_string())
    }
}
