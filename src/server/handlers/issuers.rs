use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use crate::pki::fetch::{RawFormat, fetch_raw_issuer};
use crate::pki::issuers::{
    self, IssuerUpdate, delete_issuer as remove_issuer, fetch_issuer_by_id, get_issuers_config,
    list_issuers_with_names, resolve_issuer_reference, set_default_issuer,
};
use crate::pki::types::{IssuerEntry, NotAfterBehavior, sentinel};
use crate::pki::{ImportedBundle, RawResponse};
use crate::server::AppState;
use crate::server::errors::AppError;

use super::ListResponse;

/// Public view of an issuer; never carries key material.
#[derive(Debug, Serialize)]
pub struct IssuerResponse {
    pub issuer_id: String,
    pub issuer_name: String,
    pub key_id: String,
    pub certificate: String,
    pub ca_chain: Vec<String>,
    pub manual_chain: Vec<String>,
    pub serial_number: String,
    pub leaf_not_after_behavior: NotAfterBehavior,
}

impl From<IssuerEntry> for IssuerResponse {
    fn from(issuer: IssuerEntry) -> Self {
        Self {
            issuer_id: issuer.id.to_string(),
            issuer_name: issuer.name,
            key_id: issuer.key_id.to_string(),
            certificate: issuer.certificate,
            ca_chain: issuer.ca_chain,
            manual_chain: issuer.manual_chain.iter().map(ToString::to_string).collect(),
            serial_number: issuer.serial_number,
            leaf_not_after_behavior: issuer.leaf_not_after_behavior,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub pem_bundle: String,
}

#[derive(Debug, Deserialize)]
pub struct DefaultRequest {
    pub default: String,
}

pub async fn list_issuers(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<serde_json::Value>>, AppError> {
    let issuers = list_issuers_with_names(state.backend.storage()).await?;
    Ok(Json(
        issuers
            .into_iter()
            .map(|(id, name)| (id.to_string(), json!({ "issuer_name": name })))
            .collect(),
    ))
}

#[instrument(skip_all)]
pub async fn import_bundle(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportedBundle>, AppError> {
    if request.pem_bundle.trim().is_empty() {
        return Err(AppError::bad_request("'pem_bundle' must be provided"));
    }
    Ok(Json(state.backend.import_bundle(&request.pem_bundle).await?))
}

pub async fn read_issuer(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
) -> Result<Json<IssuerResponse>, AppError> {
    let storage = state.backend.storage();
    let issuer_id = resolve_issuer_reference(storage, &issuer_ref).await?;
    let issuer = fetch_issuer_by_id(storage, &issuer_id).await?;
    Ok(Json(issuer.into()))
}

pub async fn update_issuer(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
    Json(update): Json<IssuerUpdate>,
) -> Result<Json<IssuerResponse>, AppError> {
    let issuer = issuers::update_issuer(state.backend.storage(), &issuer_ref, update).await?;
    Ok(Json(issuer.into()))
}

pub async fn delete_issuer(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
) -> Result<Response, AppError> {
    let storage = state.backend.storage();
    let issuer_id = match resolve_issuer_reference(storage, &issuer_ref).await {
        Ok(id) => id,
        // Nothing to delete
        Err(e) if e.sentinel == sentinel::NOT_FOUND => {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Err(e) => return Err(e.into()),
    };

    let was_default = remove_issuer(storage, &issuer_id).await?;
    state.backend.crl_builder().rebuild(storage, true).await?;

    if was_default {
        warn!("Deleted issuer {issuer_id} was the default issuer");
        return Ok(Json(json!({
            "warnings": [format!(
                "Deleted issuer {issuer_id} was the default issuer; no default issuer is configured anymore"
            )]
        }))
        .into_response());
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn read_issuer_der(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
) -> Result<RawResponse, AppError> {
    Ok(fetch_raw_issuer(state.backend.storage(), &issuer_ref, RawFormat::Der).await?)
}

pub async fn read_issuer_pem(
    State(state): State<AppState>,
    Path(issuer_ref): Path<String>,
) -> Result<RawResponse, AppError> {
    Ok(fetch_raw_issuer(state.backend.storage(), &issuer_ref, RawFormat::Pem).await?)
}

pub async fn read_issuers_config(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let config = get_issuers_config(state.backend.storage()).await?;
    Ok(Json(json!({ "default": config.default_issuer_id })))
}

pub async fn write_issuers_config(
    State(state): State<AppState>,
    Json(request): Json<DefaultRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let storage = state.backend.storage();
    let previous = get_issuers_config(storage).await?.default_issuer_id;
    let default = set_default_issuer(storage, &request.default).await?;

    // Unattributed revocations follow the default issuer's CRL
    if previous != default {
        state.backend.crl_builder().rebuild(storage, false).await?;
    }
    Ok(Json(json!({ "default": default })))
}
