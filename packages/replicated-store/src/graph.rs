//! The boundary to the external peer-to-peer replicated graph store.
//!
//! The dashboard only consumes this interface; replication and consistency
//! live entirely on the other side of it. A node holding `Null` counts as
//! deleted - the convention replicated graphs use instead of tombstone-free
//! removal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use agentdeck_adapter::{AdapterError, Value};

/// Continuous-update callback: fires with the node's new value (or `None`
/// once it reads as deleted).
pub type NodeCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Per-child callback for `map_on`: fires with the child's key suffix and
/// new value.
pub type ChildCallback = Arc<dyn Fn(&str, Option<Value>) + Send + Sync>;

/// Handle for a registered graph watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Key-path interface of the replicated store.
///
/// `get`/`put` address whole nodes; `on` delivers continuous updates for one
/// node, `once` a single current-value read, `map_on` per-child updates
/// under a node.
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, AdapterError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), AdapterError>;

    async fn on(&self, key: &str, callback: NodeCallback) -> Result<WatchId, AdapterError>;

    async fn once(&self, key: &str) -> Result<Option<Value>, AdapterError> {
        self.get(key).await
    }

    async fn map_on(&self, key: &str, callback: ChildCallback) -> Result<WatchId, AdapterError>;

    async fn off(&self, id: WatchId) -> Result<(), AdapterError>;
}

enum Watch {
    Node { key: String, callback: NodeCallback },
    Children { prefix: String, callback: ChildCallback },
}

/// In-process graph used for tests and single-node wiring.
///
/// Implements the same interface and delete convention as the real
/// replicated store, without any networking.
#[derive(Default)]
pub struct MemoryGraph {
    nodes: Mutex<HashMap<String, Value>>,
    watches: Mutex<HashMap<WatchId, Watch>>,
    next_watch: Mutex<u64>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, key: &str, value: &Value) {
        let watches = self.watches.lock().unwrap();
        for watch in watches.values() {
            match watch {
                Watch::Node { key: watched, callback } if watched == key => {
                    let visible = (!value.is_null()).then(|| value.clone());
                    callback(visible);
                }
                Watch::Children { prefix, callback } => {
                    let qualified = format!("{}/", prefix);
                    if let Some(suffix) = key.strip_prefix(&qualified) {
                        let visible = (!value.is_null()).then(|| value.clone());
                        callback(suffix, visible);
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl GraphClient for MemoryGraph {
    async fn get(&self, key: &str) -> Result<Option<Value>, AdapterError> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.get(key).filter(|v| !v.is_null()).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), AdapterError> {
        self.nodes
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        self.notify(key, &value);
        Ok(())
    }

    async fn on(&self, key: &str, callback: NodeCallback) -> Result<WatchId, AdapterError> {
        let mut next = self.next_watch.lock().unwrap();
        let id = WatchId(*next);
        *next += 1;
        self.watches.lock().unwrap().insert(
            id,
            Watch::Node {
                key: key.to_string(),
                callback,
            },
        );
        Ok(id)
    }

    async fn map_on(&self, key: &str, callback: ChildCallback) -> Result<WatchId, AdapterError> {
        let mut next = self.next_watch.lock().unwrap();
        let id = WatchId(*next);
        *next += 1;
        self.watches.lock().unwrap().insert(
            id,
            Watch::Children {
                prefix: key.to_string(),
                callback,
            },
        );
        Ok(id)
    }

    async fn off(&self, id: WatchId) -> Result<(), AdapterError> {
        self.watches.lock().unwrap().remove(&id);
        Ok(())
    }
}
