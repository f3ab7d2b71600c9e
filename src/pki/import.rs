//! Deduplicating import of PEM keys and issuers, with automatic key linking.

use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::storage::Storage;

use super::certutil;
use super::errors::{PkiError, PkiResult};
use super::issuers::{
    fetch_issuer_by_id, get_issuers_config, list_issuers, rebuild_issuer_chains,
    set_issuers_config, write_issuer,
};
use super::keys::{fetch_key_by_id, get_keys_config, list_keys, set_keys_config, write_key};
use super::types::{IssuerEntry, IssuerId, KeyEntry, KeyId, NotAfterBehavior};

/// Imports a PEM private key.
///
/// Returns the stored entry and whether it already existed. A new key is
/// linked to every issuer without a key whose certificate carries its public key.
pub async fn import_key(
    storage: &dyn Storage,
    key_value: &str,
    key_name: &str,
) -> PkiResult<(KeyEntry, bool)> {
    let key_value = certutil::normalize_pem(key_value);

    // Both listings are taken up front: the import also repairs issuer links.
    let known_keys = list_keys(storage).await?;
    let known_issuers = list_issuers(storage).await?;

    for key_id in &known_keys {
        let existing = fetch_key_by_id(storage, key_id).await?;
        if existing.private_key == key_value {
            debug!("Key {key_id} already imported");
            return Ok((existing, true));
        }
    }

    let signer = certutil::parse_private_key(&key_value)
        .map_err(|e| PkiError::user(format!("unable to parse private key: {e}")))?;

    let result = KeyEntry {
        id: KeyId::generate(),
        name: key_name.to_string(),
        private_key_type: certutil::private_key_type(&signer),
        private_key: key_value,
    };
    write_key(storage, &result).await?;

    for issuer_id in &known_issuers {
        let mut issuer = fetch_issuer_by_id(storage, issuer_id).await?;
        if !issuer.key_id.is_empty() {
            continue;
        }

        let cert_key = certutil::certificate_public_key(&issuer.certificate)?;
        if signer.public_eq(&cert_key) {
            info!("Linking issuer {issuer_id} to newly imported key {}", result.id);
            issuer.key_id = result.id.clone();
            write_issuer(storage, &issuer).await?;
        }
    }

    let mut config = get_keys_config(storage).await?;
    if config.default_key_id.is_empty() || known_keys.is_empty() {
        config.default_key_id = result.id.clone();
        set_keys_config(storage, &config).await?;
    }

    Ok((result, false))
}

/// Imports a single PEM CA certificate.
///
/// Returns the stored entry and whether it already existed. A new issuer is
/// linked to the first stored key matching its public key.
pub async fn import_issuer(
    storage: &dyn Storage,
    cert_value: &str,
    issuer_name: &str,
) -> PkiResult<(IssuerEntry, bool)> {
    let cert_value = certutil::normalize_pem(cert_value);
    if certutil::count_pem_blocks(&cert_value) != 1 {
        return Err(PkiError::user(
            "bad issuer: potentially multiple PEM blobs in one certificate storage entry",
        ));
    }

    let known_keys = list_keys(storage).await?;
    let known_issuers = list_issuers(storage).await?;

    for issuer_id in &known_issuers {
        let existing = fetch_issuer_by_id(storage, issuer_id).await?;
        if existing.certificate == cert_value {
            debug!("Issuer {issuer_id} already imported");
            return Ok((existing, true));
        }
    }

    let block = certutil::decode_single_pem(&cert_value)?;
    let serial_number = inspect_ca_certificate(block.contents())?;

    let mut result = IssuerEntry {
        id: IssuerId::generate(),
        name: issuer_name.to_string(),
        certificate: cert_value,
        serial_number,
        leaf_not_after_behavior: NotAfterBehavior::Err,
        ..Default::default()
    };

    let cert_key = certutil::certificate_public_key(&result.certificate)
        .map_err(|e| PkiError::user(format!("unable to parse certificate: {e}")))?;
    for key_id in &known_keys {
        let key = fetch_key_by_id(storage, key_id).await?;
        let signer = certutil::parse_private_key(&key.private_key).map_err(|e| {
            PkiError::internal(format!("unable to parse stored key {key_id}: {e}"))
        })?;
        if signer.public_eq(&cert_key) {
            info!("Linking newly imported issuer {} to key {key_id}", result.id);
            result.key_id = key_id.clone();
            break;
        }
    }

    // Rebuilding the chains persists the new issuer.
    rebuild_issuer_chains(storage, &mut result).await?;

    let mut config = get_issuers_config(storage).await?;
    if config.default_issuer_id.is_empty() || known_issuers.is_empty() {
        config.default_issuer_id = result.id.clone();
        set_issuers_config(storage, &config).await?;
    }

    Ok((result, false))
}

// Rejects non-CA certificates and returns the colon-hex serial.
fn inspect_ca_certificate(der: &[u8]) -> PkiResult<String> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| PkiError::user(format!("unable to parse certificate: {e}")))?;
    if !certutil::is_ca(&cert) {
        return Err(PkiError::user("Refusing to import non-CA certificate"));
    }
    Ok(certutil::certificate_serial(&cert))
}

/// Imports a CA key, its certificate and the certificates of its chain.
pub async fn write_ca_bundle(
    storage: &dyn Storage,
    private_key: &str,
    certificate: &str,
    ca_chain: &[String],
    issuer_name: &str,
    key_name: &str,
) -> PkiResult<(IssuerEntry, KeyEntry)> {
    let (key, _) = import_key(storage, private_key, key_name).await?;
    let (issuer, _) = import_issuer(storage, certificate, issuer_name).await?;

    for cert in ca_chain {
        import_issuer(storage, cert, "").await?;
    }

    Ok((issuer, key))
}
