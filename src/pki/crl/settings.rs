use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pki::errors::{PkiError, PkiResult};
use crate::storage::{self, Storage};

pub const CRL_SETTINGS_PATH: &str = "config/crl";

/// Longest accepted CRL expiry, the range of a signed 64-bit nanosecond count.
pub const MAX_EXPIRY_SECS: u64 = (i64::MAX / 1_000_000_000) as u64;

/// Mount-level CRL settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlSettings {
    /// Overrides the globally configured CRL lifetime.
    #[serde(default)]
    pub expiry_secs: Option<u64>,
    /// Stops publishing revoked entries; forced rebuilds publish empty CRLs.
    #[serde(default)]
    pub disable: bool,
}

impl CrlSettings {
    pub fn lifetime(&self, default_lifetime: Duration) -> Duration {
        self.expiry_secs
            .map(Duration::from_secs)
            .unwrap_or(default_lifetime)
    }

    pub fn validate(&self) -> PkiResult<()> {
        match self.expiry_secs {
            Some(0) => Err(PkiError::user("CRL expiry must be a positive duration")),
            Some(secs) if secs > MAX_EXPIRY_SECS => Err(PkiError::user(format!(
                "CRL expiry of {secs}s exceeds the maximum of {MAX_EXPIRY_SECS}s"
            ))),
            _ => Ok(()),
        }
    }
}

pub async fn get_crl_settings(storage: &dyn Storage) -> PkiResult<CrlSettings> {
    Ok(storage::get_json(storage, CRL_SETTINGS_PATH)
        .await?
        .unwrap_or_default())
}

pub async fn set_crl_settings(storage: &dyn Storage, settings: &CrlSettings) -> PkiResult<()> {
    settings.validate()?;
    storage::put_json(storage, CRL_SETTINGS_PATH, settings).await?;
    Ok(())
}
