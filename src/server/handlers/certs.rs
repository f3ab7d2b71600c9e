use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::pki::PkiError;
use crate::pki::certutil::{self, CERTIFICATE_PEM_TAG};
use crate::pki::revocation::{
    CERTS_PREFIX, RevocationResponse, fetch_cert_by_serial, fetch_revocation,
    store_certificate as record_certificate,
};
use crate::server::AppState;
use crate::server::errors::AppError;

#[derive(Debug, Deserialize)]
pub struct StoreCertificateRequest {
    pub certificate: String,
}

#[derive(Debug, Serialize)]
pub struct CertificateResponse {
    pub certificate: String,
    pub revocation_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time_rfc3339: Option<String>,
}

/// Records a certificate issued elsewhere so that it can be revoked by serial.
pub async fn store_certificate(
    State(state): State<AppState>,
    Json(request): Json<StoreCertificateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let block = certutil::decode_single_pem(&certutil::normalize_pem(&request.certificate))?;
    if block.tag() != CERTIFICATE_PEM_TAG {
        return Err(AppError::bad_request(format!(
            "expected a CERTIFICATE PEM block, got {}",
            block.tag()
        )));
    }

    let serial = record_certificate(state.backend.storage(), block.contents()).await?;
    Ok(Json(json!({ "serial_number": serial })))
}

pub async fn read_certificate(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> Result<Json<CertificateResponse>, AppError> {
    let storage = state.backend.storage();
    let revocation = fetch_revocation(storage, &serial).await?;

    let der = match fetch_cert_by_serial(storage, CERTS_PREFIX, &serial).await? {
        Some(der) => der,
        None => match &revocation {
            Some(info) => info.certificate_bytes.clone(),
            None => {
                return Err(PkiError::user(format!(
                    "certificate with serial {serial} not found"
                ))
                .into());
            }
        },
    };

    let times = revocation
        .as_ref()
        .map(RevocationResponse::from)
        .unwrap_or(RevocationResponse {
            revocation_time: 0,
            revocation_time_rfc3339: None,
        });

    Ok(Json(CertificateResponse {
        certificate: certutil::pem_encode(CERTIFICATE_PEM_TAG, &der),
        revocation_time: times.revocation_time,
        revocation_time_rfc3339: times.revocation_time_rfc3339,
    }))
}
