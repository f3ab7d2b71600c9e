use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::storage::{self, Storage};

use super::backend::PkiBackend;
use super::certutil;
use super::errors::{PkiError, PkiResult};
use super::issuers::{CertBundle, fetch_cert_bundle_by_issuer_id, resolve_issuer_reference};
use super::types::{DEFAULT_REF, IssuerId};

pub const REVOKED_PREFIX: &str = "revoked/";
pub const CERTS_PREFIX: &str = "certs/";

// Leases are tracked with second granularity.
const EXPIRY_GRACE_SECS: i64 = 2;

/// A revoked certificate as stored under `revoked/<serial>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationInfo {
    #[serde(with = "base64_bytes")]
    pub certificate_bytes: Vec<u8>,
    /// Seconds since the epoch.
    pub revocation_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_time_utc: Option<DateTime<Utc>>,
    /// Issuer the certificate was attributed to, empty until known.
    #[serde(default)]
    pub issuer_id: IssuerId,
}

impl RevocationInfo {
    /// Revocation instant, preferring the UTC timestamp over the epoch seconds.
    pub fn revoked_at(&self) -> DateTime<Utc> {
        self.revocation_time_utc
            .filter(|t| t.year() > 1)
            .unwrap_or_else(|| {
                DateTime::from_timestamp(self.revocation_time, 0).unwrap_or_default()
            })
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

/// Outcome of a revocation, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationResponse {
    pub revocation_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time_rfc3339: Option<String>,
}

impl From<&RevocationInfo> for RevocationResponse {
    fn from(info: &RevocationInfo) -> Self {
        Self {
            revocation_time: info.revocation_time,
            revocation_time_rfc3339: info
                .revocation_time_utc
                .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// Reads the value stored for `serial` under `prefix`.
///
/// Accepts colon or hyphen serials. Entries still stored under the legacy
/// colon path are moved to the hyphen path on read.
pub async fn fetch_cert_by_serial(
    storage: &dyn Storage,
    prefix: &str,
    serial: &str,
) -> PkiResult<Option<Vec<u8>>> {
    let path = format!("{prefix}{}", certutil::normalize_serial(serial));
    let legacy_path = format!("{prefix}{}", certutil::colon_serial(serial));

    let fetch = |key: String| async move {
        match storage.get(&key).await {
            Ok(Some(value)) if value.is_empty() => Err(PkiError::internal(format!(
                "returned certificate bytes for serial {serial} were empty"
            ))),
            Ok(value) => Ok(value),
            Err(e) => Err(PkiError::internal(format!(
                "error fetching certificate {serial}: {e}"
            ))),
        }
    };

    if let Some(value) = fetch(path.clone()).await? {
        return Ok(Some(value));
    }

    let Some(value) = fetch(legacy_path.clone()).await? else {
        return Ok(None);
    };

    debug!("Moving {legacy_path} to {path}");
    storage.put(&path, &value).await?;
    storage.delete(&legacy_path).await?;
    Ok(Some(value))
}

/// Records an issued certificate so it can later be revoked by serial.
///
/// Returns the certificate's colon-hex serial.
pub async fn store_certificate(storage: &dyn Storage, der: &[u8]) -> PkiResult<String> {
    let serial = {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::user(format!("unable to parse certificate: {e}")))?;
        certutil::certificate_serial(&cert)
    };
    if serial.is_empty() {
        return Err(PkiError::user("certificate has an empty serial number"));
    }

    storage
        .put(
            &format!("{CERTS_PREFIX}{}", certutil::normalize_serial(&serial)),
            der,
        )
        .await?;
    Ok(serial)
}

pub async fn fetch_revocation(
    storage: &dyn Storage,
    serial: &str,
) -> PkiResult<Option<RevocationInfo>> {
    let Some(raw) = fetch_cert_by_serial(storage, REVOKED_PREFIX, serial).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| PkiError::internal(format!("error decoding existing revocation info: {e}")))
}

/// Serials of all revocation records, in storage form.
pub async fn list_revoked(storage: &dyn Storage) -> PkiResult<Vec<String>> {
    Ok(storage.list(REVOKED_PREFIX).await?)
}

async fn fetch_default_ca_bundle(storage: &dyn Storage) -> PkiResult<CertBundle> {
    let issuer_id = resolve_issuer_reference(storage, DEFAULT_REF).await?;
    let (_, bundle) = fetch_cert_bundle_by_issuer_id(storage, &issuer_id, false).await?;
    Ok(bundle)
}

// Returns the certificate's NotAfter (epoch seconds) and whether it is a CA.
fn inspect_certificate(der: &[u8]) -> PkiResult<(i64, bool)> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| PkiError::internal(format!("error parsing certificate: {e}")))?;
    Ok((
        cert.validity().not_after.timestamp(),
        certutil::is_ca(&cert),
    ))
}

impl PkiBackend {
    /// Revokes the certificate with `serial` and rebuilds the CRLs.
    ///
    /// Returns `None` when nothing was done: the mount is being torn down, the
    /// certificate already expired, or a lease tried to revoke a CA or a
    /// certificate that no longer exists.
    pub async fn revoke_cert(
        &self,
        serial: &str,
        from_lease: bool,
    ) -> PkiResult<Option<RevocationResponse>> {
        if self.system().is_tainted() {
            debug!("Mount is being torn down, skipping revocation of {serial}");
            return Ok(None);
        }

        let storage = self.storage();
        let signing_bundle = fetch_default_ca_bundle(storage).await.map_err(|e| match e {
            PkiError::User(_) => e.context("could not fetch the CA certificate"),
            PkiError::Internal(_) => e.context("error fetching CA certificate"),
        })?;

        let colon_serial = certutil::colon_serial(serial);
        if colon_serial == signing_bundle.serial_number {
            return Err(PkiError::user("adding CA to CRL is not allowed"));
        }

        let rev_info = match fetch_revocation(storage, serial).await? {
            Some(existing) => existing,
            None => {
                let Some(cert_der) = fetch_cert_by_serial(storage, CERTS_PREFIX, serial).await?
                else {
                    if from_lease {
                        warn!(
                            "expired certificate revoke failed because not found in storage, treating as success; serial={serial}"
                        );
                        return Ok(None);
                    }
                    return Err(PkiError::user(format!(
                        "certificate with serial {serial} not found"
                    )));
                };

                let (not_after, is_ca) = inspect_certificate(&cert_der)?;
                let now = Utc::now();
                if not_after < now.timestamp() + EXPIRY_GRACE_SECS {
                    debug!("Certificate {colon_serial} already expired, nothing to revoke");
                    return Ok(None);
                }
                if is_ca && from_lease {
                    return Ok(None);
                }

                let rev_info = RevocationInfo {
                    certificate_bytes: cert_der,
                    revocation_time: now.timestamp(),
                    revocation_time_utc: Some(now),
                    issuer_id: IssuerId::default(),
                };
                let path = format!("{REVOKED_PREFIX}{}", certutil::normalize_serial(serial));
                storage::put_json(storage, &path, &rev_info)
                    .await
                    .map_err(|e| {
                        PkiError::internal(format!(
                            "error saving revoked certificate to new location: {e}"
                        ))
                    })?;
                info!("Revoked certificate {colon_serial}");
                rev_info
            }
        };

        self.crl_builder()
            .rebuild(storage, false)
            .await
            .map_err(|e| match e {
                PkiError::User(_) => e.context("Error during CRL building"),
                PkiError::Internal(_) => e.context("error encountered during CRL building"),
            })?;

        Ok(Some(RevocationResponse::from(&rev_info)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::import::write_ca_bundle;
    use crate::pki::system::StaticSystemView;
    use crate::pki::test_fixtures::{
        generate_ca, generate_expired_leaf, generate_intermediate, generate_leaf,
    };
    use crate::storage::MemoryStorage;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_backend() -> (PkiBackend, MemoryStorage, Arc<StaticSystemView>) {
        let storage = MemoryStorage::new();
        let system = Arc::new(StaticSystemView::default());
        let backend = PkiBackend::new(
            Arc::new(storage.clone()),
            system.clone(),
            Duration::from_secs(3600),
        );
        (backend, storage, system)
    }

    #[test]
    fn test_revocation_info_json_layout() {
        let info = RevocationInfo {
            certificate_bytes: vec![1, 2, 3],
            revocation_time: 10,
            revocation_time_utc: None,
            issuer_id: IssuerId::default(),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["certificate_bytes"], "AQID");
        assert_eq!(value["issuer_id"], "");

        let decoded: RevocationInfo = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(decoded.revoked_at().timestamp(), 10);
    }

    #[test]
    fn test_revoked_at_prefers_utc_timestamp() {
        let utc = DateTime::from_timestamp(1_700_000_000, 500).unwrap();
        let info = RevocationInfo {
            revocation_time: 5,
            revocation_time_utc: Some(utc),
            ..Default::default()
        };
        assert_eq!(info.revoked_at(), utc);

        // Zero-valued timestamps from older records fall back to the epoch seconds
        let zero: DateTime<Utc> = "0001-01-01T00:00:00Z".parse().unwrap();
        let legacy = RevocationInfo {
            revocation_time: 5,
            revocation_time_utc: Some(zero),
            ..Default::default()
        };
        assert_eq!(legacy.revoked_at().timestamp(), 5);
    }

    #[test]
    fn test_response_time_drops_trailing_zeros() {
        let whole = RevocationInfo {
            revocation_time: 1_700_000_000,
            revocation_time_utc: DateTime::from_timestamp(1_700_000_000, 0),
            ..Default::default()
        };
        let response = RevocationResponse::from(&whole);
        assert_eq!(response.revocation_time, 1_700_000_000);
        assert_eq!(
            response.revocation_time_rfc3339.as_deref(),
            Some("2023-11-14T22:13:20Z")
        );

        let fractional = RevocationInfo {
            revocation_time_utc: DateTime::from_timestamp(1_700_000_000, 250_000_000),
            ..whole
        };
        assert_eq!(
            RevocationResponse::from(&fractional)
                .revocation_time_rfc3339
                .as_deref(),
            Some("2023-11-14T22:13:20.250Z")
        );
    }

    #[tokio::test]
    async fn test_fetch_cert_by_serial_migrates_legacy_path() {
        let storage = MemoryStorage::new();
        storage.put("certs/aa:bb", b"der").await.unwrap();

        let value = fetch_cert_by_serial(&storage, CERTS_PREFIX, "AA-BB")
            .await
            .unwrap();
        assert_eq!(value, Some(b"der".to_vec()));
        assert_eq!(storage.get("certs/aa-bb").await.unwrap(), Some(b"der".to_vec()));
        assert_eq!(storage.get("certs/aa:bb").await.unwrap(), None);

        assert_eq!(
            fetch_cert_by_serial(&storage, CERTS_PREFIX, "ff").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_revoke_requires_default_issuer() {
        let (backend, _, _) = create_test_backend();
        let err = backend.revoke_cert("aa:bb", false).await.unwrap_err();
        assert!(err.is_user());
        assert!(err.to_string().starts_with("could not fetch the CA certificate"));
    }

    #[tokio::test]
    async fn test_revoke_flow() {
        let (backend, storage, _) = create_test_backend();
        let ca = generate_ca("Root");
        let (issuer, _) = write_ca_bundle(&storage, &ca.key_pem, &ca.cert_pem, &[], "root", "")
            .await
            .unwrap();

        let err = backend
            .revoke_cert(&issuer.serial_number, false)
            .await
            .unwrap_err();
        assert_eq!(err, PkiError::user("adding CA to CRL is not allowed"));

        let err = backend.revoke_cert("01:02", false).await.unwrap_err();
        assert_eq!(err, PkiError::user("certificate with serial 01:02 not found"));
        assert_eq!(backend.revoke_cert("01:02", true).await.unwrap(), None);

        let leaf = generate_leaf(&ca, &[0x0a, 0x0b]);
        store_certificate(&storage, &leaf.der).await.unwrap();

        let first = backend.revoke_cert("0a:0b", false).await.unwrap().unwrap();
        assert!(first.revocation_time_rfc3339.is_some());
        let stored = fetch_revocation(&storage, "0a-0b").await.unwrap().unwrap();
        assert_eq!(stored.revocation_time, first.revocation_time);
        assert_eq!(stored.issuer_id, issuer.id);

        // Revoking again reuses the existing record
        let second = backend.revoke_cert("0A-0B", false).await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(list_revoked(&storage).await.unwrap(), vec!["0a-0b"]);
    }

    #[tokio::test]
    async fn test_revoke_noops() {
        let (backend, storage, system) = create_test_backend();
        let ca = generate_ca("Root");
        write_ca_bundle(&storage, &ca.key_pem, &ca.cert_pem, &[], "root", "")
            .await
            .unwrap();

        let expired = generate_expired_leaf(&ca, &[0x33]);
        store_certificate(&storage, &expired.der).await.unwrap();
        assert_eq!(backend.revoke_cert("33", false).await.unwrap(), None);
        assert!(list_revoked(&storage).await.unwrap().is_empty());

        // A lease never revokes a CA certificate
        let intermediate = generate_intermediate(&ca, "Intermediate");
        let intermediate_der = certutil::certificate_der(&intermediate.cert_pem).unwrap();
        let intermediate_serial = store_certificate(&storage, &intermediate_der).await.unwrap();
        assert_eq!(
            backend.revoke_cert(&intermediate_serial, true).await.unwrap(),
            None
        );
        assert!(list_revoked(&storage).await.unwrap().is_empty());

        let leaf = generate_leaf(&ca, &[0x44]);
        store_certificate(&storage, &leaf.der).await.unwrap();
        system.set_tainted(true);
        assert_eq!(backend.revoke_cert("44", false).await.unwrap(), None);
        assert!(list_revoked(&storage).await.unwrap().is_empty());
    }
}
