use ::redis::RedisError;
use async_trait::async_trait;
use color_eyre::Report;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt;

mod memory;
mod redis;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage backend operations.
#[derive(Debug)]
pub struct StorageError {
    error: Report,
}

impl StorageError {
    pub fn new<T>(error: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self {
            error: Report::new(error),
        }
    }

    pub fn msg<T>(message: T) -> Self
    where
        T: fmt::Debug + fmt::Display + Send + Sync + 'static,
    {
        Self {
            error: Report::msg(message),
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl From<RedisError> for StorageError {
    fn from(error: RedisError) -> Self {
        Self::new(error)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error)
    }
}

/// Abstract interface for the key-value store backing the PKI engine.
///
/// Keys are `/`-separated paths. There are no multi-key transactions; callers
/// serialize compound updates themselves.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Loads the raw value stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` at `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists the direct children of `prefix`, sorted.
    ///
    /// Children with further path segments are returned once, as `name/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reads and decodes a JSON record, returning `None` when the key is absent or empty.
pub async fn get_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_slice(&raw)?)),
        _ => Ok(None),
    }
}

/// Encodes `value` as JSON and stores it at `key`.
pub async fn put_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_vec(value)?;
    storage.put(key, &raw).await
}

// Shared by the backends: reduces full keys to the direct children of `prefix`.
fn collect_children<'a, I>(prefix: &str, keys: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let children: BTreeSet<String> = keys
        .into_iter()
        .filter_map(|key| key.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
        .map(|rest| match rest.find('/') {
            Some(idx) => rest[..=idx].to_string(),
            None => rest.to_string(),
        })
        .collect();
    children.into_iter().collect()
}
