//! AgentDeck: storage and collaboration layer of a monitoring console for
//! distributed agent networks.
//!
//! The console watches a fleet of autonomous agents over whichever backend a
//! deployment has available. This umbrella crate pulls the layers together:
//!
//! - [`agentdeck_adapter`]: the uniform path-keyed storage contract,
//!   registry and health probing
//! - [`agentdeck_snapshot_store`]: single-file JSON snapshot backend
//! - [`agentdeck_tree_store`]: file-per-key document tree backend
//! - [`agentdeck_replicated_store`]: shim onto an external replicated graph
//! - [`agentdeck_workrooms`]: rooms, presence and ordered messaging on top
//!
//! [`Deck`] wires a configured set of backends into a registry and runs a
//! workrooms engine over the primary one.

mod config;
mod deck;

pub use config::{build_adapter, AdapterConfig};
pub use deck::Deck;

pub use agentdeck_adapter::{
    key, AdapterError, AdapterRegistry, BatchOp, ChangeEvent, Durability, HealthReport,
    HealthStatus, KeyError, PathKey, QueryFilter, StorageAdapter, Subscriber, SubscriptionId,
    Value,
};
pub use agentdeck_replicated_store::{GraphAdapter, GraphClient, MemoryGraph};
pub use agentdeck_snapshot_store::{SnapshotConfig, SnapshotStore};
pub use agentdeck_tree_store::{DocFormat, TreeStore, TreeStoreConfig};
pub use agentdeck_workrooms::{
    CommandOutcome, EngineConfig, EngineError, MessageOptions, Presence, RoomEvent,
    RoomEventKind, RoomSettings, RoomType, SenderKind, UserIdentity, WorkroomCommand, Workroom,
    WorkroomMessage, WorkroomsEngine,
};
