//! Top-level wiring: a registry of configured backends plus a workrooms
//! engine running over the primary one.

use agentdeck_adapter::{AdapterError, AdapterRegistry, StorageAdapter};
use agentdeck_workrooms::{EngineConfig, EngineError, UserIdentity, WorkroomsEngine};

use crate::config::{build_adapter, AdapterConfig};

pub struct Deck {
    registry: AdapterRegistry,
    engine: WorkroomsEngine,
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck").finish_non_exhaustive()
    }
}

impl Deck {
    /// Builds and connects every configured adapter, then starts an engine
    /// over the primary (the first config entry). Backends that fail to
    /// connect stay registered and show up as unhealthy in `health_check`;
    /// only a missing primary is fatal.
    pub async fn open(
        configs: &[AdapterConfig],
        identity: UserIdentity,
    ) -> Result<Self, EngineError> {
        Self::open_with(configs, identity, EngineConfig::default()).await
    }

    pub async fn open_with(
        configs: &[AdapterConfig],
        identity: UserIdentity,
        engine_config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let registry = AdapterRegistry::new();
        for config in configs {
            registry.register(build_adapter(config));
        }
        registry.connect_all().await;

        let primary = registry.primary().ok_or_else(|| {
            EngineError::Storage(AdapterError::connection("no adapter configured"))
        })?;
        if !primary.is_connected() {
            return Err(EngineError::Storage(AdapterError::connection(format!(
                "primary adapter '{}' failed to connect",
                primary.name()
            ))));
        }

        let engine = WorkroomsEngine::with_config(primary, identity, engine_config);
        engine.start().await?;
        Ok(Self { registry, engine })
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &WorkroomsEngine {
        &self.engine
    }

    pub fn primary(&self) -> Option<std::sync::Arc<dyn StorageAdapter>> {
        self.registry.primary()
    }

    /// Stops the engine and disconnects every adapter, flushing whatever
    /// each backend still holds.
    pub async fn close(&self) -> Result<(), EngineError> {
        self.engine.stop().await?;
        self.registry.disconnect_all().await;
        Ok(())
    }
}
