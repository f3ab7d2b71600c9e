use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by the PKI engine.
///
/// `User` errors are caused by the caller (bad input, unknown reference) and
/// are safe to surface. `Internal` errors point at storage failures or
/// corrupted state and should be treated as operational alerts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PkiError {
    #[error("{0}")]
    User(String),

    #[error("{0}")]
    Internal(String),
}

impl PkiError {
    pub fn user(message: impl Into<String>) -> Self {
        PkiError::User(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PkiError::Internal(message.into())
    }

    pub fn is_user(&self) -> bool {
        matches!(self, PkiError::User(_))
    }

    /// Prefixes the message with `context`, keeping the error kind.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            PkiError::User(msg) => PkiError::User(format!("{context}: {msg}")),
            PkiError::Internal(msg) => PkiError::Internal(format!("{context}: {msg}")),
        }
    }
}

/// A failed reference resolution.
///
/// Carries the sentinel identifier naming the step that failed so that call
/// sites can log which lookup went wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct ResolveError {
    pub sentinel: &'static str,
    pub error: PkiError,
}

impl ResolveError {
    pub fn new(sentinel: &'static str, error: PkiError) -> Self {
        Self { sentinel, error }
    }
}

impl From<ResolveError> for PkiError {
    fn from(error: ResolveError) -> Self {
        error.error
    }
}

macro_rules! impl_internal_error {
    ($($error_type:ty => $context:literal),* $(,)?) => {
        $(
            impl From<$error_type> for PkiError {
                fn from(error: $error_type) -> Self {
                    PkiError::Internal(format!(concat!($context, ": {}"), error))
                }
            }
        )*
    };
}

impl_internal_error! {
    StorageError => "storage failure",
    serde_json::Error => "record encoding failure",
    openssl::error::ErrorStack => "cryptographic failure",
    rcgen::Error => "CRL signing failure",
}

/// Convenient Result type alias
pub type PkiResult<T> = Result<T, PkiError>;
