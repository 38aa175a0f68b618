//! File-tree backend for AgentDeck.
//!
//! One file per path key under a configured root directory, with the
//! extension selecting the serialization format. A filesystem watcher pushes
//! external changes into the in-memory cache and out to subscribers, in
//! contrast to the snapshot store's poll-driven subscriptions. On top of the
//! portable contract the store offers two conveniences: template rendering
//! and multi-document compose.

mod format;
mod tree;

pub use format::DocFormat;
pub use tree::{TreeStore, TreeStoreConfig, SNAPSHOT_FALLBACK};
