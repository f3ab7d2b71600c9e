use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rcgen::{
    CertificateRevocationListParams, Issuer, KeyIdMethod, KeyPair, RevokedCertParams,
    SerialNumber,
};
use time::OffsetDateTime;
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo, X509Certificate};

use crate::pki::certutil;
use crate::pki::crl_config::{crl_path, get_local_crl_config, set_local_crl_config};
use crate::pki::errors::{PkiError, PkiResult};
use crate::pki::issuers::{
    fetch_cert_bundle_by_issuer_id, fetch_issuer_by_id, get_issuers_config, list_issuers,
};
use crate::pki::revocation::{REVOKED_PREFIX, RevocationInfo, list_revoked};
use crate::pki::types::{CrlId, IssuerEntry, IssuerId, KeyId};
use crate::storage::{self, Storage};

use super::settings::get_crl_settings;

/// A revoked certificate as it appears on a CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: Vec<u8>,
    pub revocation_time: DateTime<Utc>,
}

/// The parts of an issuer certificate needed to attribute revoked certificates.
#[derive(Debug, Clone)]
pub struct IssuerSigner {
    pub id: IssuerId,
    /// DER of the certificate subject.
    pub subject: Vec<u8>,
    /// DER of the certificate SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
}

impl IssuerSigner {
    pub fn from_entry(issuer: &IssuerEntry) -> PkiResult<Self> {
        let der = issuer.certificate_der()?;
        let (_, cert) = X509Certificate::from_der(&der).map_err(|e| {
            PkiError::internal(format!("unable to parse certificate of issuer {}: {e}", issuer.id))
        })?;
        Ok(Self {
            id: issuer.id.clone(),
            subject: cert.subject().as_raw().to_vec(),
            public_key: cert.public_key().raw.to_vec(),
        })
    }

    fn verifies(&self, cert: &X509Certificate<'_>) -> bool {
        if self.subject != cert.issuer().as_raw() {
            return false;
        }
        match SubjectPublicKeyInfo::from_der(&self.public_key) {
            Ok((_, spki)) => cert.verify_signature(Some(&spki)).is_ok(),
            Err(_) => false,
        }
    }
}

/// Revoked certificates partitioned by the issuer that signed them.
#[derive(Debug, Default)]
pub struct RevokedCertEntries {
    /// Certificates whose issuer is unknown or was deleted.
    pub unassigned: Vec<RevokedEntry>,
    pub by_issuer: HashMap<IssuerId, Vec<RevokedEntry>>,
}

// Issuers sharing a key and a subject produce identical CRLs.
type GroupKey = (KeyId, Vec<u8>);

/// Rebuilds the CRL of every issuer group and bumps their CRL numbers.
pub async fn build_crls(
    storage: &dyn Storage,
    default_lifetime: Duration,
    force_new: bool,
) -> PkiResult<()> {
    build_all_crls(storage, default_lifetime, force_new)
        .await
        .map_err(|e| e.context("error building CRLs"))
}

async fn build_all_crls(
    storage: &dyn Storage,
    default_lifetime: Duration,
    force_new: bool,
) -> PkiResult<()> {
    let issuers = list_issuers(storage)
        .await
        .map_err(|e| e.context("while listing issuers"))?;
    let default_issuer = get_issuers_config(storage).await?.default_issuer_id;

    let mut signers = Vec::with_capacity(issuers.len());
    let mut groups: Vec<Vec<IssuerId>> = Vec::new();
    let mut group_index: HashMap<GroupKey, usize> = HashMap::new();

    for issuer_id in &issuers {
        let entry = fetch_issuer_by_id(storage, issuer_id).await?;
        if entry.key_id.is_empty() {
            debug!("Skipping issuer {issuer_id} without a key, it cannot sign a CRL");
            continue;
        }

        let signer = IssuerSigner::from_entry(&entry)?;
        let key = (entry.key_id, signer.subject.clone());
        match group_index.get(&key) {
            Some(&index) => groups[index].push(issuer_id.clone()),
            None => {
                group_index.insert(key, groups.len());
                groups.push(vec![issuer_id.clone()]);
            }
        }
        signers.push(signer);
    }

    let revoked = get_revoked_cert_entries(storage, &signers).await?;
    let mut crl_config = get_local_crl_config(storage).await?;

    for members in &groups {
        let Some(first) = members.first() else {
            continue;
        };
        let representative = if members.contains(&default_issuer) {
            &default_issuer
        } else {
            first
        };

        let mut revoked_list = Vec::new();
        if *representative == default_issuer {
            revoked_list.extend(revoked.unassigned.iter().cloned());
        }
        for member in members {
            if let Some(entries) = revoked.by_issuer.get(member) {
                revoked_list.extend(entries.iter().cloned());
            }
        }

        let mut crl_id: Option<&CrlId> = None;
        for member in members {
            let Some(existing) = crl_config.issuer_id_crl_map.get(member) else {
                continue;
            };
            match crl_id {
                None => crl_id = Some(existing),
                Some(found) if found != existing => {
                    return Err(PkiError::internal(format!(
                        "two issuers with same keys/subjects ({members:?}) have different internal CRL IDs: {found} vs {existing}"
                    )));
                }
                Some(_) => {}
            }
        }
        let crl_id = match crl_id {
            Some(id) => id.clone(),
            None => {
                let id = CrlId::generate();
                crl_config.crl_number_map.insert(id.clone(), 1);
                id
            }
        };

        for member in members {
            crl_config
                .issuer_id_crl_map
                .insert(member.clone(), crl_id.clone());
        }

        let crl_number = crl_config
            .crl_number_map
            .get(&crl_id)
            .copied()
            .unwrap_or_default();
        crl_config
            .crl_number_map
            .insert(crl_id.clone(), crl_number + 1);

        build_crl(
            storage,
            default_lifetime,
            force_new,
            representative,
            &revoked_list,
            &crl_id,
            crl_number,
        )
        .await?;
    }

    set_local_crl_config(storage, &crl_config).await?;
    Ok(())
}

/// Loads every revocation record and attributes it to the issuer that signed it.
///
/// A cached attribution is trusted while that issuer still exists. Fresh
/// attributions are written back to the record.
pub async fn get_revoked_cert_entries(
    storage: &dyn Storage,
    signers: &[IssuerSigner],
) -> PkiResult<RevokedCertEntries> {
    let serials = list_revoked(storage)
        .await
        .map_err(|e| e.context("error fetching list of revoked certs"))?;

    let mut entries = RevokedCertEntries::default();
    for serial in &serials {
        let path = format!("{REVOKED_PREFIX}{serial}");
        let raw = storage.get(&path).await.map_err(|e| {
            PkiError::internal(format!("unable to fetch revoked cert with serial {serial}: {e}"))
        })?;
        let raw = match raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => {
                return Err(PkiError::internal(format!(
                    "revoked certificate entry for serial {serial} is nil"
                )));
            }
        };

        let mut rev_info: RevocationInfo = serde_json::from_slice(&raw).map_err(|e| {
            PkiError::internal(format!("error decoding revocation entry for serial {serial}: {e}"))
        })?;
        if rev_info.certificate_bytes.is_empty() {
            return Err(PkiError::internal(
                "found revoked serial but actual certificate is empty",
            ));
        }

        let (cert_serial, issuer_id) =
            attribute_revoked(serial, &rev_info.certificate_bytes, &rev_info.issuer_id, signers)?;
        let entry = RevokedEntry {
            serial: cert_serial,
            revocation_time: rev_info.revoked_at(),
        };

        let Some(issuer_id) = issuer_id else {
            entries.unassigned.push(entry);
            continue;
        };

        if issuer_id != rev_info.issuer_id {
            debug!("Attributing revoked certificate {serial} to issuer {issuer_id}");
            rev_info.issuer_id = issuer_id.clone();
            storage::put_json(storage, &path, &rev_info)
                .await
                .map_err(|e| {
                    PkiError::internal(format!(
                        "error updating revoked certificate at existing location: {e}"
                    ))
                })?;
        }
        entries.by_issuer.entry(issuer_id).or_default().push(entry);
    }

    Ok(entries)
}

// Returns the certificate serial and the issuer it belongs to, if any.
fn attribute_revoked(
    serial: &str,
    der: &[u8],
    cached: &IssuerId,
    signers: &[IssuerSigner],
) -> PkiResult<(Vec<u8>, Option<IssuerId>)> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        PkiError::internal(format!("unable to parse revoked certificate with serial {serial}: {e}"))
    })?;
    let cert_serial = cert.tbs_certificate.serial.to_bytes_be();

    if !cached.is_empty() && signers.iter().any(|signer| &signer.id == cached) {
        return Ok((cert_serial, Some(cached.clone())));
    }

    let issuer_id = signers
        .iter()
        .find(|signer| signer.verifies(&cert))
        .map(|signer| signer.id.clone());
    Ok((cert_serial, issuer_id))
}

/// Signs and stores one CRL on behalf of `issuer_id`.
///
/// When CRLs are disabled nothing is written unless `force_new` is set, in
/// which case the CRL is published without entries.
pub async fn build_crl(
    storage: &dyn Storage,
    default_lifetime: Duration,
    force_new: bool,
    issuer_id: &IssuerId,
    revoked: &[RevokedEntry],
    crl_id: &CrlId,
    crl_number: i64,
) -> PkiResult<()> {
    let settings = get_crl_settings(storage).await.map_err(|e| {
        PkiError::internal(format!("error fetching CRL config information: {e}"))
    })?;

    let revoked = if settings.disable {
        if !force_new {
            return Ok(());
        }
        &[][..]
    } else {
        revoked
    };

    let (_, bundle) = fetch_cert_bundle_by_issuer_id(storage, issuer_id, true)
        .await
        .map_err(|e| match e {
            PkiError::User(_) => e.context("could not fetch the CA certificate"),
            PkiError::Internal(_) => e.context("error fetching CA certificate"),
        })?;
    let Some(private_key) = bundle.private_key.as_deref() else {
        return Err(PkiError::user(format!(
            "could not fetch the CA certificate: issuer {issuer_id} has no private key"
        )));
    };

    let crl = sign_crl(
        &bundle.certificate,
        private_key,
        revoked,
        crl_number,
        settings.lifetime(default_lifetime),
    )?;

    storage
        .put(&crl_path(crl_id), &crl)
        .await
        .map_err(|e| PkiError::internal(format!("error storing CRL: {e}")))?;

    info!(
        "Stored CRL {crl_id} number {crl_number} with {} entries for issuer {issuer_id}",
        revoked.len()
    );
    Ok(())
}

fn sign_crl(
    cert_pem: &str,
    key_pem: &str,
    revoked: &[RevokedEntry],
    crl_number: i64,
    lifetime: Duration,
) -> PkiResult<Vec<u8>> {
    let key_pair = KeyPair::from_pem(&certutil::to_pkcs8_pem(key_pem)?)?;
    let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)?;

    let revoked_certs = revoked
        .iter()
        .map(|entry| {
            let revocation_time =
                OffsetDateTime::from_unix_timestamp(entry.revocation_time.timestamp())
                    .map_err(|e| PkiError::internal(format!("invalid revocation time: {e}")))?;
            Ok(RevokedCertParams {
                serial_number: SerialNumber::from_slice(&entry.serial),
                revocation_time,
                reason_code: None,
                invalidity_date: None,
            })
        })
        .collect::<PkiResult<Vec<_>>>()?;

    let this_update = OffsetDateTime::now_utc();
    let next_update = time::Duration::try_from(lifetime)
        .ok()
        .and_then(|lifetime| this_update.checked_add(lifetime))
        .ok_or_else(|| {
            PkiError::internal(format!(
                "CRL lifetime of {}s is out of range",
                lifetime.as_secs()
            ))
        })?;
    let params = CertificateRevocationListParams {
        this_update,
        next_update,
        crl_number: SerialNumber::from(u64::try_from(crl_number).unwrap_or_default()),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: KeyIdMethod::Sha256,
    };

    let crl = params.signed_by(&issuer)?;
    Ok(crl.der().to_vec())
}
