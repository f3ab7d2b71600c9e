use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::storage::{self, Storage};

use super::certutil;
use super::errors::{PkiError, PkiResult, ResolveError};
use super::keys::fetch_key_by_id;
use super::types::{
    DEFAULT_REF, IssuerConfig, IssuerEntry, IssuerId, KeyId, NotAfterBehavior, PrivateKeyType,
    sentinel,
};

pub const ISSUER_PREFIX: &str = "config/issuer/";
pub const ISSUERS_CONFIG_PATH: &str = "config/issuers";

impl IssuerEntry {
    /// DER bytes of the issuer's own certificate.
    pub fn certificate_der(&self) -> PkiResult<Vec<u8>> {
        certutil::certificate_der(&self.certificate)
            .map_err(|e| e.context(format!("issuer {}", self.id)))
    }
}

/// Certificate material of an issuer, optionally with its signing key.
#[derive(Debug, Clone, Default)]
pub struct CertBundle {
    pub certificate: String,
    pub ca_chain: Vec<String>,
    pub serial_number: String,
    pub private_key_type: PrivateKeyType,
    pub private_key: Option<String>,
}

/// Requested changes to an issuer. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuerUpdate {
    pub issuer_name: Option<String>,
    pub leaf_not_after_behavior: Option<String>,
    pub manual_chain: Option<Vec<String>>,
}

pub async fn list_issuers(storage: &dyn Storage) -> PkiResult<Vec<IssuerId>> {
    let entries = storage.list(ISSUER_PREFIX).await?;
    Ok(entries.into_iter().map(IssuerId::from).collect())
}

pub async fn fetch_issuer_by_id(
    storage: &dyn Storage,
    issuer_id: &IssuerId,
) -> PkiResult<IssuerEntry> {
    if issuer_id.is_empty() {
        return Err(PkiError::user(
            "unable to fetch pki issuer: empty issuer identifier",
        ));
    }

    let raw = storage
        .get(&format!("{ISSUER_PREFIX}{issuer_id}"))
        .await
        .map_err(|e| PkiError::internal(format!("unable to fetch pki issuer: {e}")))?;
    let Some(raw) = raw else {
        return Err(PkiError::user(format!(
            "pki issuer id {issuer_id} does not exist"
        )));
    };

    serde_json::from_slice(&raw).map_err(|e| {
        PkiError::internal(format!(
            "unable to decode pki issuer with id {issuer_id}: {e}"
        ))
    })
}

pub async fn write_issuer(storage: &dyn Storage, issuer: &IssuerEntry) -> PkiResult<()> {
    storage::put_json(storage, &format!("{ISSUER_PREFIX}{}", issuer.id), issuer).await?;
    Ok(())
}

/// Deletes an issuer, clearing the default pointer first when it referenced it.
///
/// Returns whether the deleted issuer was the configured default.
pub async fn delete_issuer(storage: &dyn Storage, issuer_id: &IssuerId) -> PkiResult<bool> {
    let mut config = get_issuers_config(storage).await?;

    let was_default = config.default_issuer_id == *issuer_id;
    if was_default {
        config.default_issuer_id = IssuerId::default();
        set_issuers_config(storage, &config).await?;
    }

    storage.delete(&format!("{ISSUER_PREFIX}{issuer_id}")).await?;
    Ok(was_default)
}

pub async fn get_issuers_config(storage: &dyn Storage) -> PkiResult<IssuerConfig> {
    Ok(storage::get_json(storage, ISSUERS_CONFIG_PATH)
        .await?
        .unwrap_or_default())
}

pub async fn set_issuers_config(storage: &dyn Storage, config: &IssuerConfig) -> PkiResult<()> {
    storage::put_json(storage, ISSUERS_CONFIG_PATH, config).await?;
    Ok(())
}

/// Points the default issuer at `reference` after resolving it.
pub async fn set_default_issuer(storage: &dyn Storage, reference: &str) -> PkiResult<IssuerId> {
    let issuer_id = resolve_issuer_reference(storage, reference).await?;
    set_issuers_config(
        storage,
        &IssuerConfig {
            default_issuer_id: issuer_id.clone(),
        },
    )
    .await?;
    Ok(issuer_id)
}

/// Resolves `"default"`, an issuer id or an issuer name to an issuer id.
pub async fn resolve_issuer_reference(
    storage: &dyn Storage,
    reference: &str,
) -> Result<IssuerId, ResolveError> {
    if reference == DEFAULT_REF {
        let config = get_issuers_config(storage)
            .await
            .map_err(|e| ResolveError::new(sentinel::CONFIG_ERROR, e))?;
        if config.default_issuer_id.is_empty() {
            return Err(ResolveError::new(
                sentinel::NOT_FOUND,
                PkiError::user("no default issuer currently configured"),
            ));
        }
        return Ok(config.default_issuer_id);
    }

    let issuers = list_issuers(storage)
        .await
        .map_err(|e| ResolveError::new(sentinel::LIST_ERROR, e))?;

    if let Some(issuer_id) = issuers.iter().find(|id| id.as_str() == reference) {
        return Ok(issuer_id.clone());
    }

    for issuer_id in &issuers {
        let issuer = fetch_issuer_by_id(storage, issuer_id)
            .await
            .map_err(|e| ResolveError::new(sentinel::ISSUER_READ, e))?;
        if issuer.name == reference {
            return Ok(issuer.id);
        }
    }

    debug!("No PKI issuer matches reference {reference}");
    Err(ResolveError::new(
        sentinel::NOT_FOUND,
        PkiError::user(format!(
            "unable to find PKI issuer for reference: {reference}"
        )),
    ))
}

/// Lists every issuer id together with its display name.
pub async fn list_issuers_with_names(storage: &dyn Storage) -> PkiResult<Vec<(IssuerId, String)>> {
    let mut result = Vec::new();
    for issuer_id in list_issuers(storage).await? {
        let issuer = fetch_issuer_by_id(storage, &issuer_id).await?;
        result.push((issuer_id, issuer.name));
    }
    Ok(result)
}

/// Returns the first issuer linked to `key_id`, if any.
pub async fn is_key_in_use(storage: &dyn Storage, key_id: &KeyId) -> PkiResult<Option<IssuerId>> {
    for issuer_id in list_issuers(storage).await? {
        let issuer = fetch_issuer_by_id(storage, &issuer_id)
            .await
            .map_err(|e| PkiError::internal(format!("unable to fetch pki issuer: {e}")))?;
        if issuer.key_id == *key_id {
            return Ok(Some(issuer_id));
        }
    }
    Ok(None)
}

pub async fn fetch_cert_bundle_by_issuer_id(
    storage: &dyn Storage,
    issuer_id: &IssuerId,
    load_key: bool,
) -> PkiResult<(IssuerEntry, CertBundle)> {
    let issuer = fetch_issuer_by_id(storage, issuer_id).await?;

    let mut bundle = CertBundle {
        certificate: issuer.certificate.clone(),
        ca_chain: issuer.ca_chain.clone(),
        serial_number: issuer.serial_number.clone(),
        ..Default::default()
    };

    if load_key && !issuer.key_id.is_empty() {
        let key = fetch_key_by_id(storage, &issuer.key_id).await?;
        bundle.private_key_type = key.private_key_type;
        bundle.private_key = Some(key.private_key);
    }

    Ok((issuer, bundle))
}

fn validate_issuer_name(name: &str) -> PkiResult<()> {
    if name == DEFAULT_REF {
        return Err(PkiError::user(
            "reserved keyword 'default' can not be used as issuer name",
        ));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    let valid_edges = !name.starts_with(['-', '_']) && !name.ends_with(['-', '_']);
    if !valid_chars || !valid_edges {
        return Err(PkiError::user("issuer name contained invalid characters"));
    }
    Ok(())
}

/// Applies `update` to the issuer behind `reference`.
///
/// A changed manual chain triggers a chain rebuild, which also persists the
/// other changes.
pub async fn update_issuer(
    storage: &dyn Storage,
    reference: &str,
    update: IssuerUpdate,
) -> PkiResult<IssuerEntry> {
    let issuer_id = resolve_issuer_reference(storage, reference).await?;
    let mut issuer = fetch_issuer_by_id(storage, &issuer_id).await?;
    let mut modified = false;

    if let Some(name) = update.issuer_name
        && name != issuer.name
    {
        if !name.is_empty() {
            validate_issuer_name(&name)?;
            let in_use = list_issuers_with_names(storage)
                .await?
                .into_iter()
                .any(|(id, other)| other == name && id != issuer_id);
            if in_use {
                return Err(PkiError::user("issuer name already in use"));
            }
        }
        issuer.name = name;
        modified = true;
    }

    if let Some(raw) = update.leaf_not_after_behavior {
        let behavior: NotAfterBehavior = raw.parse()?;
        if behavior != issuer.leaf_not_after_behavior {
            issuer.leaf_not_after_behavior = behavior;
            modified = true;
        }
    }

    if let Some(path) = update.manual_chain {
        let mut constructed = Vec::with_capacity(path.len());
        for (index, entry) in path.iter().enumerate() {
            let entry = if index == 0 && entry == "self" {
                issuer_id.as_str()
            } else {
                entry.as_str()
            };
            let resolved = resolve_issuer_reference(storage, entry).await?;
            if index == 0 && resolved != issuer_id {
                return Err(PkiError::user(format!(
                    "expected first cert in chain to be a self-reference, but was: {entry}/{resolved}"
                )));
            }
            constructed.push(resolved);
        }

        if constructed != issuer.manual_chain {
            issuer.manual_chain = constructed;
            rebuild_issuer_chains(storage, &mut issuer).await?;
            modified = false;
        }
    }

    if modified {
        write_issuer(storage, &issuer).await?;
    }
    Ok(issuer)
}

/// Recomputes `ca_chain` for every issuer, treating `reference` as the
/// current version of its entry even if it is not stored yet.
///
/// Issuers whose chain changed are persisted; `reference` is always persisted.
pub async fn rebuild_issuer_chains(
    storage: &dyn Storage,
    reference: &mut IssuerEntry,
) -> PkiResult<()> {
    let mut issuers = Vec::new();
    let mut seen_reference = false;
    for issuer_id in list_issuers(storage).await? {
        if issuer_id == reference.id {
            issuers.push(reference.clone());
            seen_reference = true;
        } else {
            issuers.push(fetch_issuer_by_id(storage, &issuer_id).await?);
        }
    }
    if !seen_reference {
        issuers.push(reference.clone());
    }

    let chains = compute_ca_chains(&issuers)?;

    for (mut issuer, chain) in issuers.into_iter().zip(chains) {
        let is_reference = issuer.id == reference.id;
        if issuer.ca_chain != chain || is_reference {
            issuer.ca_chain = chain;
            write_issuer(storage, &issuer).await?;
        }
        if is_reference {
            *reference = issuer;
        }
    }
    Ok(())
}

fn compute_ca_chains(issuers: &[IssuerEntry]) -> PkiResult<Vec<Vec<String>>> {
    let ders = issuers
        .iter()
        .map(IssuerEntry::certificate_der)
        .collect::<PkiResult<Vec<_>>>()?;
    let certs = ders
        .iter()
        .zip(issuers)
        .map(|(der, issuer)| {
            X509Certificate::from_der(der)
                .map(|(_, cert)| cert)
                .map_err(|e| {
                    PkiError::internal(format!(
                        "unable to parse certificate of issuer {}: {e}",
                        issuer.id
                    ))
                })
        })
        .collect::<PkiResult<Vec<_>>>()?;

    let positions: HashMap<&IssuerId, usize> = issuers
        .iter()
        .enumerate()
        .map(|(index, issuer)| (&issuer.id, index))
        .collect();

    issuers
        .iter()
        .enumerate()
        .map(|(index, issuer)| {
            if issuer.manual_chain.is_empty() {
                return Ok(discover_chain(index, issuers, &certs));
            }
            issuer
                .manual_chain
                .iter()
                .map(|link| {
                    positions
                        .get(link)
                        .map(|&pos| issuers[pos].certificate.clone())
                        .ok_or_else(|| {
                            PkiError::user(format!(
                                "manual chain of issuer {} references unknown issuer {link}",
                                issuer.id
                            ))
                        })
                })
                .collect()
        })
        .collect()
}

// Walks parents by subject match and signature until a self-issued
// certificate, a missing parent or a cycle.
fn discover_chain(
    start: usize,
    issuers: &[IssuerEntry],
    certs: &[X509Certificate<'_>],
) -> Vec<String> {
    let mut chain = vec![issuers[start].certificate.clone()];
    let mut visited = HashSet::from([start]);
    let mut current = start;

    loop {
        let cert = &certs[current];
        if cert.subject().as_raw() == cert.issuer().as_raw() {
            break;
        }

        let parent = certs.iter().enumerate().position(|(pos, candidate)| {
            !visited.contains(&pos)
                && candidate.subject().as_raw() == cert.issuer().as_raw()
                && cert.verify_signature(Some(candidate.public_key())).is_ok()
        });

        let Some(parent) = parent else {
            break;
        };
        chain.push(issuers[parent].certificate.clone());
        visited.insert(parent);
        current = parent;
    }

    chain
}
