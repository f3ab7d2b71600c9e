use axum::http::StatusCode;
use thiserror::Error;

use crate::pki::PkiError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Pki(#[from] PkiError),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Pki(PkiError::User(_)) => StatusCode::BAD_REQUEST,
            AppError::Pki(PkiError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, AppError::Pki(PkiError::Internal(_)))
    }
}

macro_rules! impl_pki_error {
    ($($error_type:ty),* $(,)?) => {
        $(
            impl From<$error_type> for AppError {
                fn from(error: $error_type) -> Self {
                    AppError::Pki(error.into())
                }
            }
        )*
    };
}

impl_pki_error! {
    crate::pki::ResolveError,
    crate::storage::StorageError,
}
