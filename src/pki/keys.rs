use tracing::debug;

use crate::storage::{self, Storage};

use super::errors::{PkiError, PkiResult, ResolveError};
use super::types::{DEFAULT_REF, KeyConfig, KeyEntry, KeyId, sentinel};

pub const KEY_PREFIX: &str = "config/key/";
pub const KEYS_CONFIG_PATH: &str = "config/keys";

pub async fn list_keys(storage: &dyn Storage) -> PkiResult<Vec<KeyId>> {
    let entries = storage.list(KEY_PREFIX).await?;
    Ok(entries.into_iter().map(KeyId::from).collect())
}

pub async fn fetch_key_by_id(storage: &dyn Storage, key_id: &KeyId) -> PkiResult<KeyEntry> {
    if key_id.is_empty() {
        return Err(PkiError::user(
            "unable to fetch pki key: empty key identifier",
        ));
    }

    let raw = storage
        .get(&format!("{KEY_PREFIX}{key_id}"))
        .await
        .map_err(|e| PkiError::internal(format!("unable to fetch pki key: {e}")))?;
    let Some(raw) = raw else {
        return Err(PkiError::user(format!("pki key id {key_id} does not exist")));
    };

    serde_json::from_slice(&raw)
        .map_err(|e| PkiError::internal(format!("unable to decode pki key with id {key_id}: {e}")))
}

pub async fn write_key(storage: &dyn Storage, key: &KeyEntry) -> PkiResult<()> {
    storage::put_json(storage, &format!("{KEY_PREFIX}{}", key.id), key).await?;
    Ok(())
}

/// Deletes a key, clearing the default pointer first when it referenced it.
///
/// Returns whether the deleted key was the configured default.
pub async fn delete_key(storage: &dyn Storage, key_id: &KeyId) -> PkiResult<bool> {
    let mut config = get_keys_config(storage).await?;

    let was_default = config.default_key_id == *key_id;
    if was_default {
        config.default_key_id = KeyId::default();
        set_keys_config(storage, &config).await?;
    }

    storage.delete(&format!("{KEY_PREFIX}{key_id}")).await?;
    Ok(was_default)
}

pub async fn get_keys_config(storage: &dyn Storage) -> PkiResult<KeyConfig> {
    Ok(storage::get_json(storage, KEYS_CONFIG_PATH)
        .await?
        .unwrap_or_default())
}

pub async fn set_keys_config(storage: &dyn Storage, config: &KeyConfig) -> PkiResult<()> {
    storage::put_json(storage, KEYS_CONFIG_PATH, config).await?;
    Ok(())
}

/// Points the default key at `reference` after resolving it.
pub async fn set_default_key(storage: &dyn Storage, reference: &str) -> PkiResult<KeyId> {
    let key_id = resolve_key_reference(storage, reference).await?;
    set_keys_config(
        storage,
        &KeyConfig {
            default_key_id: key_id.clone(),
        },
    )
    .await?;
    Ok(key_id)
}

/// Resolves `"default"`, a key id or a key name to a key id.
pub async fn resolve_key_reference(
    storage: &dyn Storage,
    reference: &str,
) -> Result<KeyId, ResolveError> {
    if reference == DEFAULT_REF {
        let config = get_keys_config(storage)
            .await
            .map_err(|e| ResolveError::new(sentinel::CONFIG_ERROR, e))?;
        if config.default_key_id.is_empty() {
            return Err(ResolveError::new(
                sentinel::NOT_FOUND,
                PkiError::user("no default key currently configured"),
            ));
        }
        return Ok(config.default_key_id);
    }

    let keys = list_keys(storage)
        .await
        .map_err(|e| ResolveError::new(sentinel::LIST_ERROR, e))?;

    if let Some(key_id) = keys.iter().find(|id| id.as_str() == reference) {
        return Ok(key_id.clone());
    }

    for key_id in &keys {
        let key = fetch_key_by_id(storage, key_id)
            .await
            .map_err(|e| ResolveError::new(sentinel::KEY_READ, e))?;
        if key.name == reference {
            return Ok(key.id);
        }
    }

    debug!("No PKI key matches reference {reference}");
    Err(ResolveError::new(
        sentinel::NOT_FOUND,
        PkiError::user(format!(
            "unable to find PKI key for reference: {reference}"
        )),
    ))
}
