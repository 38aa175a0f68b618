//! Declarative backend selection.
//!
//! A deck deployment names its backends in configuration; each entry is one
//! `AdapterConfig` and `build_adapter` turns it into a live (not yet
//! connected) adapter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentdeck_adapter::StorageAdapter;
use agentdeck_replicated_store::{GraphAdapter, MemoryGraph};
use agentdeck_snapshot_store::{SnapshotConfig, SnapshotStore};
use agentdeck_tree_store::{TreeStore, TreeStoreConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdapterConfig {
    /// Single-file JSON snapshot with autosave.
    Snapshot {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        autosave_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poll_secs: Option<u64>,
    },
    /// File-per-key document tree with a filesystem watcher.
    Tree {
        root: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        watch: Option<bool>,
    },
    /// In-process replicated-graph shim; volatile, mostly for local wiring.
    Memory,
}

pub fn build_adapter(config: &AdapterConfig) -> Arc<dyn StorageAdapter> {
    match config {
        AdapterConfig::Snapshot {
            path,
            autosave_secs,
            poll_secs,
        } => {
            let mut snapshot = SnapshotConfig::new(path);
            if let Some(secs) = autosave_secs {
                snapshot = snapshot.with_autosave_interval(Duration::from_secs(*secs));
            }
            if let Some(secs) = poll_secs {
                snapshot = snapshot.with_poll_interval(Duration::from_secs(*secs));
            }
            Arc::new(SnapshotStore::new(snapshot))
        }
        AdapterConfig::Tree { root, watch } => {
            let mut tree = TreeStoreConfig::new(root);
            if *watch == Some(false) {
                tree = tree.without_watch();
            }
            Arc::new(TreeStore::new(tree))
        }
        AdapterConfig::Memory => Arc::new(GraphAdapter::new(Arc::new(MemoryGraph::new()))),
    }
}
