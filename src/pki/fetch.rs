//! Raw issuer certificate and CRL reads.

use crate::storage::Storage;

use super::backend::PkiBackend;
use super::certutil::{self, CRL_PEM_TAG};
use super::crl_config::resolve_issuer_crl_path;
use super::errors::{PkiError, PkiResult};
use super::issuers::{fetch_issuer_by_id, resolve_issuer_reference};

pub const CONTENT_TYPE_CERT_DER: &str = "application/pkix-cert";
pub const CONTENT_TYPE_CERT_PEM: &str = "application/pem-certificate-chain";
pub const CONTENT_TYPE_CRL_DER: &str = "application/pkix-crl";
pub const CONTENT_TYPE_CRL_PEM: &str = "application/x-pem-file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Der,
    Pem,
}

/// A raw payload ready to be served as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// 200 with a payload, 204 without.
    pub status: u16,
}

impl RawResponse {
    fn new(content_type: &'static str, body: Vec<u8>) -> Self {
        let status = if body.is_empty() { 204 } else { 200 };
        Self {
            content_type,
            body,
            status,
        }
    }
}

/// Reads the certificate of the issuer behind `reference`.
pub async fn fetch_raw_issuer(
    storage: &dyn Storage,
    reference: &str,
    format: RawFormat,
) -> PkiResult<RawResponse> {
    let issuer_id = resolve_issuer_reference(storage, reference).await?;
    let issuer = fetch_issuer_by_id(storage, &issuer_id).await?;

    Ok(match format {
        RawFormat::Pem => RawResponse::new(CONTENT_TYPE_CERT_PEM, issuer.certificate.into_bytes()),
        RawFormat::Der => RawResponse::new(CONTENT_TYPE_CERT_DER, issuer.certificate_der()?),
    })
}

impl PkiBackend {
    /// Reads the current CRL of the issuer behind `reference`.
    ///
    /// A deferred rebuild, if pending, runs first.
    pub async fn fetch_issuer_crl(
        &self,
        reference: &str,
        format: RawFormat,
    ) -> PkiResult<RawResponse> {
        let storage = self.storage();
        self.crl_builder()
            .rebuild_if_forced(storage)
            .await
            .map_err(|e| e.context("error rebuilding pending CRLs"))?;

        let crl_path = resolve_issuer_crl_path(storage, reference).await?;
        let crl = storage
            .get(&crl_path)
            .await
            .map_err(|e| PkiError::internal(format!("error fetching CRL: {e}")))?
            .unwrap_or_default();

        Ok(match format {
            RawFormat::Der => RawResponse::new(CONTENT_TYPE_CRL_DER, crl),
            RawFormat::Pem if crl.is_empty() => RawResponse::new(CONTENT_TYPE_CRL_PEM, crl),
            RawFormat::Pem => RawResponse::new(
                CONTENT_TYPE_CRL_PEM,
                certutil::pem_encode(CRL_PEM_TAG, &crl).into_bytes(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::import::write_ca_bundle;
    use crate::pki::system::StaticSystemView;
    use crate::pki::test_fixtures::generate_ca;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_raw_issuer_formats() {
        let storage = MemoryStorage::new();
        let ca = generate_ca("Root");
        write_ca_bundle(&storage, &ca.key_pem, &ca.cert_pem, &[], "root", "")
            .await
            .unwrap();

        let pem = fetch_raw_issuer(&storage, "root", RawFormat::Pem).await.unwrap();
        assert_eq!(pem.status, 200);
        assert_eq!(pem.content_type, CONTENT_TYPE_CERT_PEM);
        assert!(String::from_utf8(pem.body).unwrap().starts_with("-----BEGIN CERTIFICATE-----"));

        let der = fetch_raw_issuer(&storage, "default", RawFormat::Der).await.unwrap();
        assert_eq!(der.content_type, CONTENT_TYPE_CERT_DER);
        assert_eq!(der.body, certutil::certificate_der(&ca.cert_pem).unwrap());

        assert!(
            fetch_raw_issuer(&storage, "missing", RawFormat::Der)
                .await
                .unwrap_err()
                .is_user()
        );
    }

    #[tokio::test]
    async fn test_fetch_issuer_crl_runs_pending_rebuild() {
        let storage = MemoryStorage::new();
        let backend = PkiBackend::new(
            Arc::new(storage.clone()),
            Arc::new(StaticSystemView::default()),
            Duration::from_secs(3600),
        );
        let ca = generate_ca("Root");
        write_ca_bundle(&storage, &ca.key_pem, &ca.cert_pem, &[], "root", "")
            .await
            .unwrap();

        // No CRL was built yet
        assert!(backend.fetch_issuer_crl("root", RawFormat::Der).await.is_err());

        backend.invalidate("config/issuer/any").await;
        let der = backend.fetch_issuer_crl("root", RawFormat::Der).await.unwrap();
        assert_eq!(der.status, 200);
        assert_eq!(der.content_type, CONTENT_TYPE_CRL_DER);

        let pem = backend.fetch_issuer_crl("root", RawFormat::Pem).await.unwrap();
        assert!(String::from_utf8(pem.body).unwrap().starts_with("-----BEGIN X509 CRL-----"));
    }
}
