use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::pki::errors::PkiResult;
use crate::pki::system::SystemView;
use crate::storage::Storage;

use super::build::build_crls;

/// Schedules and serializes CRL rebuilds.
///
/// At most one rebuild runs at a time. Rebuilds requested through
/// [`CrlBuilder::request_rebuild_if_active_node`] are deferred until the next
/// call to [`CrlBuilder::rebuild_if_forced`] or [`CrlBuilder::rebuild`].
#[derive(Debug)]
pub struct CrlBuilder {
    lock: Mutex<()>,
    force_rebuild: AtomicBool,
    default_lifetime: Duration,
}

impl CrlBuilder {
    pub fn new(default_lifetime: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            force_rebuild: AtomicBool::new(false),
            default_lifetime,
        }
    }

    pub fn default_lifetime(&self) -> Duration {
        self.default_lifetime
    }

    /// Lock-free check for a deferred rebuild.
    pub fn is_rebuild_pending(&self) -> bool {
        self.force_rebuild.load(Ordering::Acquire)
    }

    /// Marks a forced rebuild as pending. Standby nodes ignore the request.
    pub async fn request_rebuild_if_active_node(&self, system: &dyn SystemView) {
        if !system.is_active_node() {
            debug!("Ignoring request to schedule a CRL rebuild, not on active node.");
            return;
        }

        info!("Scheduling PKI CRL rebuild.");
        let _guard = self.lock.lock().await;
        self.force_rebuild.store(true, Ordering::Release);
    }

    /// Runs the pending rebuild, if any.
    pub async fn rebuild_if_forced(&self, storage: &dyn Storage) -> PkiResult<()> {
        if self.is_rebuild_pending() {
            return self.do_rebuild(storage, true, false).await;
        }
        Ok(())
    }

    /// Rebuilds every CRL now, clearing any pending request.
    pub async fn rebuild(&self, storage: &dyn Storage, force_new: bool) -> PkiResult<()> {
        self.do_rebuild(storage, force_new, true).await
    }

    async fn do_rebuild(
        &self,
        storage: &dyn Storage,
        force_new: bool,
        ignore_force_flag: bool,
    ) -> PkiResult<()> {
        let _guard = self.lock.lock().await;

        // Another caller may have run the rebuild while we waited for the lock.
        let pending = self.force_rebuild.swap(false, Ordering::AcqRel);
        if pending || ignore_force_flag {
            return build_crls(storage, self.default_lifetime, force_new || pending).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::crl_config::{LOCAL_CRL_CONFIG_PATH, get_local_crl_config};
    use crate::pki::import::write_ca_bundle;
    use crate::pki::system::MockSystemView;
    use crate::pki::test_fixtures::generate_ca;
    use crate::storage::MemoryStorage;

    fn builder() -> CrlBuilder {
        CrlBuilder::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_standby_node_ignores_requests() {
        let crl_builder = builder();
        let mut system = MockSystemView::new();
        system.expect_is_active_node().times(1).return_const(false);

        crl_builder.request_rebuild_if_active_node(&system).await;
        assert!(!crl_builder.is_rebuild_pending());
    }

    #[tokio::test]
    async fn test_pending_rebuild_runs_once() {
        let storage = MemoryStorage::new();
        let crl_builder = builder();
        let mut system = MockSystemView::new();
        system.expect_is_active_node().return_const(true);

        // Nothing pending: no build happens
        crl_builder.rebuild_if_forced(&storage).await.unwrap();
        assert_eq!(storage.get(LOCAL_CRL_CONFIG_PATH).await.unwrap(), None);

        crl_builder.request_rebuild_if_active_node(&system).await;
        assert!(crl_builder.is_rebuild_pending());

        crl_builder.rebuild_if_forced(&storage).await.unwrap();
        assert!(!crl_builder.is_rebuild_pending());
        assert!(storage.get(LOCAL_CRL_CONFIG_PATH).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_explicit_rebuild_clears_pending_flag() {
        let storage = MemoryStorage::new();
        let ca = generate_ca("Root");
        let (issuer, _) = write_ca_bundle(&storage, &ca.key_pem, &ca.cert_pem, &[], "", "")
            .await
            .unwrap();

        let crl_builder = builder();
        let mut system = MockSystemView::new();
        system.expect_is_active_node().return_const(true);
        crl_builder.request_rebuild_if_active_node(&system).await;

        crl_builder.rebuild(&storage, false).await.unwrap();
        assert!(!crl_builder.is_rebuild_pending());

        // The pending request was folded into the explicit rebuild
        crl_builder.rebuild_if_forced(&storage).await.unwrap();
        let config = get_local_crl_config(&storage).await.unwrap();
        let crl_id = &config.issuer_id_crl_map[&issuer.id];
        assert_eq!(config.crl_number_map[crl_id], 2);
    }
}
