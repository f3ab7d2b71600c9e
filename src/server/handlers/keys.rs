use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::pki::PkiError;
use crate::pki::import;
use crate::pki::issuers::is_key_in_use;
use crate::pki::keys::{
    self, fetch_key_by_id, get_keys_config, resolve_key_reference, set_default_key,
};
use crate::pki::types::{KeyEntry, PrivateKeyType, sentinel};
use crate::server::AppState;
use crate::server::errors::AppError;

use super::ListResponse;
use super::issuers::DefaultRequest;

/// Public view of a key; the private material is never returned.
#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub key_id: String,
    pub key_name: String,
    pub key_type: PrivateKeyType,
}

impl From<KeyEntry> for KeyResponse {
    fn from(key: KeyEntry) -> Self {
        Self {
            key_id: key.id.to_string(),
            key_name: key.name,
            key_type: key.private_key_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportKeyRequest {
    pub pem_bundle: String,
    #[serde(default)]
    pub key_name: String,
}

pub async fn list_keys(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<serde_json::Value>>, AppError> {
    let storage = state.backend.storage();
    let mut entries = Vec::new();
    for key_id in keys::list_keys(storage).await? {
        let key = fetch_key_by_id(storage, &key_id).await?;
        entries.push((key_id.to_string(), json!({ "key_name": key.name })));
    }
    Ok(Json(entries.into_iter().collect()))
}

pub async fn import_key(
    State(state): State<AppState>,
    Json(request): Json<ImportKeyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let storage = state.backend.storage();
    let (key, existed) = import::import_key(storage, &request.pem_bundle, &request.key_name).await?;

    // The new key may complete an issuer that can now sign its CRL
    if !existed {
        state.backend.crl_builder().rebuild(storage, false).await?;
    }

    let mut body = serde_json::to_value(KeyResponse::from(key))
        .map_err(|e| PkiError::internal(format!("unable to encode key response: {e}")))?;
    body["existed"] = json!(existed);
    Ok(Json(body))
}

pub async fn read_key(
    State(state): State<AppState>,
    Path(key_ref): Path<String>,
) -> Result<Json<KeyResponse>, AppError> {
    let storage = state.backend.storage();
    let key_id = resolve_key_reference(storage, &key_ref).await?;
    Ok(Json(fetch_key_by_id(storage, &key_id).await?.into()))
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(key_ref): Path<String>,
) -> Result<Response, AppError> {
    let storage = state.backend.storage();
    let key_id = match resolve_key_reference(storage, &key_ref).await {
        Ok(id) => id,
        Err(e) if e.sentinel == sentinel::NOT_FOUND => {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(issuer_id) = is_key_in_use(storage, &key_id).await? {
        return Err(PkiError::user(format!(
            "Failed to Delete Key. This key is in use by issuer {issuer_id}"
        ))
        .into());
    }

    if keys::delete_key(storage, &key_id).await? {
        warn!("Deleted key {key_id} was the default key");
        return Ok(Json(json!({
            "warnings": [format!(
                "Deleted key {key_id} was the default key; no default key is configured anymore"
            )]
        }))
        .into_response());
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn read_keys_config(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let config = get_keys_config(state.backend.storage()).await?;
    Ok(Json(json!({ "default": config.default_key_id })))
}

pub async fn write_keys_config(
    State(state): State<AppState>,
    Json(request): Json<DefaultRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let default = set_default_key(state.backend.storage(), &request.default).await?;
    Ok(Json(json!({ "default": default })))
}
