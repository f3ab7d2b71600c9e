use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::storage::{self, Storage};

use super::errors::{PkiError, PkiResult};
use super::issuers::resolve_issuer_reference;
use super::types::{CrlId, IssuerId};

pub const CRL_PREFIX: &str = "crls/";
pub const LOCAL_CRL_CONFIG_PATH: &str = "crls/config";

/// Cluster-local CRL bookkeeping.
///
/// Issuers sharing a CRL map to the same [`CrlId`]; every CRL id carries the
/// number its next build will use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCrlConfig {
    #[serde(default)]
    pub issuer_id_crl_map: HashMap<IssuerId, CrlId>,
    #[serde(default)]
    pub crl_number_map: HashMap<CrlId, i64>,
}

/// Loads the CRL bookkeeping, yielding empty maps when nothing was stored yet.
pub async fn get_local_crl_config(storage: &dyn Storage) -> PkiResult<LocalCrlConfig> {
    Ok(storage::get_json(storage, LOCAL_CRL_CONFIG_PATH)
        .await?
        .unwrap_or_default())
}

pub async fn set_local_crl_config(storage: &dyn Storage, config: &LocalCrlConfig) -> PkiResult<()> {
    storage::put_json(storage, LOCAL_CRL_CONFIG_PATH, config).await?;
    Ok(())
}

pub fn crl_path(crl_id: &CrlId) -> String {
    format!("{CRL_PREFIX}{crl_id}")
}

/// Storage path of the CRL covering the issuer behind `reference`.
pub async fn resolve_issuer_crl_path(storage: &dyn Storage, reference: &str) -> PkiResult<String> {
    let issuer_id = resolve_issuer_reference(storage, reference).await?;
    let config = get_local_crl_config(storage).await?;

    match config.issuer_id_crl_map.get(&issuer_id) {
        Some(crl_id) if !crl_id.is_empty() => Ok(crl_path(crl_id)),
        _ => Err(PkiError::internal(format!(
            "unable to find CRL for issuer: id:{issuer_id}/ref:{reference}"
        ))),
    }
}
