//! A named collection of adapter instances with one designated primary.
//!
//! The registry is an explicit context object handed to consumers at
//! construction time; there is no ambient static state. Initialization order
//! is register → connect → use; teardown is disconnect-all before exit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::AdapterError;
use crate::health::HealthReport;
use crate::traits::StorageAdapter;

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Mutex<BTreeMap<String, Arc<dyn StorageAdapter>>>,
    primary: Mutex<Option<String>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name. The first adapter registered
    /// becomes primary by default.
    pub fn register(&self, adapter: Arc<dyn StorageAdapter>) {
        let name = adapter.name().to_string();
        let mut adapters = self.adapters.lock().unwrap();
        adapters.insert(name.clone(), adapter);

        let mut primary = self.primary.lock().unwrap();
        if primary.is_none() {
            log::debug!("registry: '{}' becomes primary", name);
            *primary = Some(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageAdapter>> {
        self.adapters.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.lock().unwrap().keys().cloned().collect()
    }

    /// Designate the default read/write target. Only ever mutated here,
    /// never implicitly.
    pub fn set_primary(&self, name: &str) -> Result<(), AdapterError> {
        let adapters = self.adapters.lock().unwrap();
        if !adapters.contains_key(name) {
            return Err(AdapterError::NotFound {
                name: name.to_string(),
            });
        }
        *self.primary.lock().unwrap() = Some(name.to_string());
        Ok(())
    }

    pub fn primary(&self) -> Option<Arc<dyn StorageAdapter>> {
        let name = self.primary.lock().unwrap().clone()?;
        self.get(&name)
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn StorageAdapter>)> {
        self.adapters
            .lock()
            .unwrap()
            .iter()
            .map(|(name, adapter)| (name.clone(), adapter.clone()))
            .collect()
    }

    /// Connect every registered adapter independently. One adapter's
    /// connection failure is logged and does not abort the others.
    pub async fn connect_all(&self) {
        for (name, adapter) in self.snapshot() {
            if let Err(e) = adapter.connect().await {
                log::warn!("registry: adapter '{}' failed to connect: {}", name, e);
            }
        }
    }

    /// Disconnect every registered adapter, logging failures.
    pub async fn disconnect_all(&self) {
        for (name, adapter) in self.snapshot() {
            if let Err(e) = adapter.disconnect().await {
                log::warn!("registry: adapter '{}' failed to disconnect: {}", name, e);
            }
        }
    }

    /// Probe every adapter and aggregate results by name. An unreachable
    /// adapter yields an `Unhealthy` entry; this never returns an error.
    pub async fn health_check(&self) -> BTreeMap<String, HealthReport> {
        let mut reports = BTreeMap::new();
        for (name, adapter) in self.snapshot() {
            reports.insert(name, adapter.health().await);
        }
        reports
    }
}
