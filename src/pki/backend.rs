use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::storage::Storage;

use super::certutil::{self, CERTIFICATE_PEM_TAG};
use super::crl::{CRL_SETTINGS_PATH, CrlBuilder, CrlSettings, get_crl_settings, set_crl_settings};
use super::errors::{PkiError, PkiResult};
use super::import::{import_issuer, import_key};
use super::issuers::ISSUER_PREFIX;
use super::keys::KEY_PREFIX;
use super::revocation::REVOKED_PREFIX;
use super::system::SystemView;
use super::types::{IssuerId, KeyId};

/// Top-level handle of a PKI mount.
///
/// Owns the storage view, the cluster view and the CRL scheduler. Clones share
/// all three.
#[derive(Clone)]
pub struct PkiBackend {
    storage: Arc<dyn Storage>,
    system: Arc<dyn SystemView>,
    crl_builder: Arc<CrlBuilder>,
}

/// Result of importing a PEM bundle.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImportedBundle {
    pub imported_issuers: Vec<IssuerId>,
    pub imported_keys: Vec<KeyId>,
    pub existing_issuers: Vec<IssuerId>,
    pub existing_keys: Vec<KeyId>,
}

impl PkiBackend {
    pub fn new(
        storage: Arc<dyn Storage>,
        system: Arc<dyn SystemView>,
        crl_lifetime: Duration,
    ) -> Self {
        Self {
            storage,
            system,
            crl_builder: Arc::new(CrlBuilder::new(crl_lifetime)),
        }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn system(&self) -> &dyn SystemView {
        self.system.as_ref()
    }

    pub fn crl_builder(&self) -> &CrlBuilder {
        &self.crl_builder
    }

    /// Reacts to a storage write replicated from another node.
    ///
    /// Writes touching issuers, keys, revocations or CRL settings schedule a
    /// deferred CRL rebuild.
    pub async fn invalidate(&self, key: &str) {
        let affects_crls = key.starts_with(REVOKED_PREFIX)
            || key.starts_with(ISSUER_PREFIX)
            || key.starts_with(KEY_PREFIX)
            || key == CRL_SETTINGS_PATH;

        if affects_crls {
            debug!("Invalidated {key}, scheduling CRL rebuild");
            self.crl_builder
                .request_rebuild_if_active_node(self.system())
                .await;
        }
    }

    /// Imports every key and CA certificate found in a PEM bundle.
    ///
    /// Keys are imported first so that new issuers link to them right away.
    /// CRLs are rebuilt when at least one new issuer was stored.
    pub async fn import_bundle(&self, pem_bundle: &str) -> PkiResult<ImportedBundle> {
        let blocks = pem::parse_many(pem_bundle)
            .map_err(|e| PkiError::user(format!("unable to parse PEM bundle: {e}")))?;
        if blocks.is_empty() {
            return Err(PkiError::user("no data found in PEM bundle"));
        }

        let mut keys = Vec::new();
        let mut certificates = Vec::new();
        for block in blocks {
            let tag = block.tag();
            if tag.contains("PRIVATE KEY") {
                keys.push(certutil::pem_encode(tag, block.contents()));
            } else if tag == CERTIFICATE_PEM_TAG {
                certificates.push(certutil::pem_encode(tag, block.contents()));
            } else {
                return Err(PkiError::user(format!(
                    "unsupported PEM block type in bundle: {tag}"
                )));
            }
        }

        let storage = self.storage();
        let mut result = ImportedBundle::default();
        for key_pem in &keys {
            let (key, existed) = import_key(storage, key_pem, "").await?;
            if existed {
                result.existing_keys.push(key.id);
            } else {
                result.imported_keys.push(key.id);
            }
        }
        for cert_pem in &certificates {
            let (issuer, existed) = import_issuer(storage, cert_pem, "").await?;
            if existed {
                result.existing_issuers.push(issuer.id);
            } else {
                result.imported_issuers.push(issuer.id);
            }
        }

        if !result.imported_issuers.is_empty() {
            info!(
                "Imported {} new issuers, rebuilding CRLs",
                result.imported_issuers.len()
            );
            self.crl_builder.rebuild(storage, true).await?;
        }

        Ok(result)
    }

    /// Stores new CRL settings, republishing the CRLs when `disable` flips.
    pub async fn write_crl_settings(&self, settings: &CrlSettings) -> PkiResult<()> {
        let storage = self.storage();
        let previous = get_crl_settings(storage).await?;
        set_crl_settings(storage, settings).await?;

        if previous.disable != settings.disable {
            info!("CRL publication toggled (disable={}), rebuilding CRLs", settings.disable);
            self.crl_builder
                .rebuild(storage, true)
                .await
                .inspect_err(|e| warn!("CRL rebuild after settings change failed: {e}"))?;
        }
        Ok(())
    }

    /// Rebuilds every CRL immediately.
    pub async fn rotate_crls(&self) -> PkiResult<()> {
        self.crl_builder.rebuild(self.storage(), false).await
    }
}
