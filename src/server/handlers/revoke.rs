use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::instrument;

use crate::server::AppState;
use crate::server::errors::AppError;

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub serial_number: String,
}

#[instrument(skip(state))]
pub async fn revoke_certificate(
    State(state): State<AppState>,
    Json(request): Json<RevokeRequest>,
) -> Result<Response, AppError> {
    let serial = request.serial_number.trim();
    if serial.is_empty() {
        return Err(AppError::bad_request("The serial number must be provided"));
    }

    match state.backend.revoke_cert(serial, false).await? {
        Some(revocation) => Ok(Json(revocation).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
