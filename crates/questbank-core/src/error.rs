use thiserror::Error;

/// Coin economy errors.
///
/// Every failure inside a mutating operation aborts the whole operation;
/// callers observe exactly one of these codes and no partial state change.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Stable machine-readable code surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Storage(_) => "STORAGE",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden(detail.into())
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{entity} '{id}' not found"))
    }
}
