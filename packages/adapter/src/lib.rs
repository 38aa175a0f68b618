//! AgentDeck adapter layer: the uniform storage contract and its registry.
//!
//! Everything above this layer treats heterogeneous backends identically:
//! - `PathKey`: validated slash-delimited address into a hierarchical key space
//! - `StorageAdapter`: uniform CRUD + subscribe/publish contract
//! - `AdapterRegistry`: named adapter collection with one designated primary
//!
//! Backends differ in durability (`Durability`) and notification latency
//! (push vs poll), never in operation shape.
//!
//! # Example
//!
//! ```rust,ignore
//! use agentdeck_adapter::{key, StorageAdapter};
//!
//! async fn agent_status(store: &dyn StorageAdapter) -> Option<serde_json::Value> {
//!     store.get(&key!("agents/worker-3")).await.ok().flatten()
//! }
//! ```

mod error;
mod health;
mod key;
pub mod nest;
pub mod registry;
mod traits;

pub use error::AdapterError;
pub use health::{HealthReport, HealthStatus, StorageUsage, DEGRADED_LATENCY_MS, PROBE_TIMEOUT_MS};
pub use key::{KeyError, PathKey};
pub use registry::AdapterRegistry;
pub use traits::{
    BatchOp, ChangeEvent, Durability, QueryFilter, StorageAdapter, Subscriber, SubscriptionId,
    CHANNEL_HISTORY_CAP,
};

/// The stored value type. Adapters persist arbitrary structured values.
pub use serde_json::Value;
