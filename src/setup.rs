use crate::config::Config;
use crate::pki::{PkiBackend, StaticSystemView};
use crate::storage::{MemoryStorage, RedisStorage, Storage};
use color_eyre::eyre::Context;
use std::sync::Arc;

/// Builds the PKI backend described by `config`.
///
/// Redis backs the mount when a URI is configured, otherwise state lives in memory.
pub async fn setup(config: &Config) -> color_eyre::Result<PkiBackend> {
    let storage: Arc<dyn Storage> = if let Some(redis_config) = &config.redis {
        tracing::info!("Redis URI provided, using Redis for PKI storage.");
        let redis_conn = redis_config
            .start()
            .await
            .wrap_err("Failed to start Redis")?;
        Arc::new(RedisStorage::new(redis_conn).with_prefix(redis_config.key_prefix.clone()))
    } else {
        tracing::info!("No Redis URI, using in-memory PKI storage.");
        Arc::new(MemoryStorage::new())
    };

    if !config.cluster.active {
        tracing::info!("Running as standby node, deferred CRL rebuilds are disabled.");
    }
    let system = Arc::new(StaticSystemView::new(config.cluster.active));

    let backend = PkiBackend::new(storage, system, config.pki.crl_lifetime());

    // Heal CRLs left stale by writes that happened while this node was down
    backend
        .rotate_crls()
        .await
        .wrap_err("Failed to build CRLs on startup")?;

    Ok(backend)
}
