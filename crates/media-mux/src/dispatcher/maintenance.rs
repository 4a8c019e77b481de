//! Periodic registry maintenance
//!
//! The dispatch task calls a [`MaintenanceHook`] on every tick. The default
//! hook does nothing, so associations live as long as the dispatcher.

use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::association::AssociationRegistry;

/// Work run on the dispatch task at every maintenance tick
///
/// Runs between packets, so it must not block.
pub trait MaintenanceHook: Send + Sync {
    fn on_tick(&self, registry: &RwLock<AssociationRegistry>);
}

/// Hook that leaves the registry alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMaintenance;

impl MaintenanceHook for NoopMaintenance {
    fn on_tick(&self, _registry: &RwLock<AssociationRegistry>) {}
}

/// Forgets associations that have been silent for too long
#[derive(Debug, Clone, Copy)]
pub struct IdlePruner {
    max_idle: Duration,
}

impl IdlePruner {
    pub fn new(max_idle: Duration) -> Self {
        Self { max_idle }
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }
}

impl MaintenanceHook for IdlePruner {
    fn on_tick(&self, registry: &RwLock<AssociationRegistry>) {
        let removed = registry.write().prune_idle(self.max_idle);
        if removed > 0 {
            debug!("Pruned {} association(s) idle for over {:?}", removed, self.max_idle);
        }
    }
}
