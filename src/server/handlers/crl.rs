use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::json;
use tracing::instrument;

use crate::pki::crl::{CrlSettings, get_crl_settings};
use crate::pki::{RawFormat, RawResponse};
use crate::server::AppState;
use crate::server::errors::AppError;

pub async fn read_issuer_crl_der(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
) -> Result<RawResponse, AppError> {
    Ok(state
        .backend
        .fetch_issuer_crl(&issuer_ref, RawFormat::Der)
        .await?)
}

pub async fn read_issuer_crl_pem(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
) -> Result<RawResponse, AppError> {
    Ok(state
        .backend
        .fetch_issuer_crl(&issuer_ref, RawFormat::Pem)
        .await?)
}

pub async fn read_crl_settings(
    State(state): State<AppState>,
) -> Result<Json<CrlSettings>, AppError> {
    Ok(Json(get_crl_settings(state.backend.storage()).await?))
}

pub async fn write_crl_settings(
    State(state): State<AppState>,
    Json(settings): Json<CrlSettings>,
) -> Result<Json<CrlSettings>, AppError> {
    state.backend.write_crl_settings(&settings).await?;
    Ok(Json(settings))
}

#[instrument(skip_all)]
pub async fn rotate_crls(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.backend.rotate_crls().await?;
    Ok(Json(json!({ "success": true })))
}
