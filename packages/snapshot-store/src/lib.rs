//! Single-file snapshot backend for AgentDeck.
//!
//! The whole store is a flat path→value map serialized as one JSON document,
//! written atomically (temp file + rename) so readers never observe a partial
//! snapshot. An autosave task persists when dirty; subscriptions are
//! poll-driven timers. Writes acknowledge before persistence
//! (`Durability::Deferred`).

mod snapshot;

pub use snapshot::{SnapshotConfig, SnapshotStore};
