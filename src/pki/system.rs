use std::sync::atomic::{AtomicBool, Ordering};

/// View of the surrounding cluster and mount.
#[cfg_attr(test, mockall::automock)]
pub trait SystemView: Send + Sync {
    /// Whether this node is the active node of its cluster, with up-to-date state.
    fn is_active_node(&self) -> bool;

    /// Whether the owning mount is being torn down.
    fn is_tainted(&self) -> bool;
}

/// A [`SystemView`] driven by flags, for single-node deployments and tests.
#[derive(Debug)]
pub struct StaticSystemView {
    active: AtomicBool,
    tainted: AtomicBool,
}

impl StaticSystemView {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
            tainted: AtomicBool::new(false),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn set_tainted(&self, tainted: bool) {
        self.tainted.store(tainted, Ordering::Release);
    }
}

impl Default for StaticSystemView {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SystemView for StaticSystemView {
    fn is_active_node(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::Acquire)
    }
}
