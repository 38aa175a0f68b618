//! Conformance shim: the adapter contract expressed over a `GraphClient`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use agentdeck_adapter::{
    nest, AdapterError, ChangeEvent, Durability, PathKey, QueryFilter, StorageAdapter, Subscriber,
    SubscriptionId, Value,
};

use crate::graph::{GraphClient, WatchId};

/// Reserved node holding the shim's key index. Graph stores cannot enumerate
/// keys, so `list`/`query` are served from this index; it is updated inside
/// `set`/`delete` but not atomically with them, which is acceptable against
/// an eventually consistent backend.
const INDEX_KEY: &str = "_index";

/// `StorageAdapter` over an external replicated graph store.
///
/// Deletion follows the graph convention of writing `Null`; the shim maps
/// that back to an absent value. Underscore-prefixed keys (the index, health
/// probes) are never indexed and never listed.
pub struct GraphAdapter {
    name: String,
    client: Arc<dyn GraphClient>,
    index: Arc<Mutex<BTreeSet<String>>>,
    connected: AtomicBool,
    watches: Mutex<HashMap<SubscriptionId, Vec<WatchId>>>,
    next_subscription: AtomicU64,
}

impl GraphAdapter {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self {
            name: "replicated".to_string(),
            client,
            index: Arc::new(Mutex::new(BTreeSet::new())),
            connected: AtomicBool::new(false),
            watches: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    fn is_internal(rendered: &str) -> bool {
        rendered.starts_with('_')
    }

    async fn persist_index(&self) -> Result<(), AdapterError> {
        let entries: Vec<Value> = {
            let index = self.index.lock().unwrap();
            index.iter().cloned().map(Value::String).collect()
        };
        self.client.put(INDEX_KEY, Value::Array(entries)).await
    }

    async fn refresh_index(&self) -> Result<(), AdapterError> {
        let stored = self.client.once(INDEX_KEY).await?;
        let mut index = self.index.lock().unwrap();
        index.clear();
        if let Some(Value::Array(entries)) = stored {
            for entry in entries {
                if let Value::String(key) = entry {
                    index.insert(key);
                }
            }
        }
        Ok(())
    }

    fn indexed_descendants(&self, rendered: &str) -> Vec<String> {
        let descendant_prefix = format!("{}/", rendered);
        self.index
            .lock()
            .unwrap()
            .iter()
            .filter(|k| {
                rendered.is_empty() || k.as_str() == rendered || k.starts_with(&descendant_prefix)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StorageAdapter for GraphAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn durability(&self) -> Durability {
        Durability::Deferred
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        self.refresh_index().await?;
        self.connected.store(true, Ordering::SeqCst);
        log::debug!("replicated shim connected; {} indexed keys", {
            self.index.lock().unwrap().len()
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        let watches: Vec<WatchId> = self
            .watches
            .lock()
            .unwrap()
            .drain()
            .flat_map(|(_, ids)| ids)
            .collect();
        for id in watches {
            self.client.off(id).await?;
        }
        self.persist_index().await?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, path: &PathKey) -> Result<Option<Value>, AdapterError> {
        let rendered = path.to_string();
        if let Some(value) = self.client.get(&rendered).await? {
            return Ok(Some(value));
        }

        // Interior prefix: assemble from indexed descendants.
        let mut flat = std::collections::BTreeMap::new();
        for key in self.indexed_descendants(&rendered) {
            if key == rendered {
                continue;
            }
            if let Some(value) = self.client.get(&key).await? {
                flat.insert(key, value);
            }
        }
        Ok(nest::assemble(&flat, path))
    }

    async fn set(&self, path: &PathKey, value: Value) -> Result<(), AdapterError> {
        let rendered = path.to_string();
        self.client.put(&rendered, value).await?;
        if !Self::is_internal(&rendered) {
            self.index.lock().unwrap().insert(rendered);
            self.persist_index().await?;
        }
        Ok(())
    }

    async fn delete(&self, path: &PathKey) -> Result<(), AdapterError> {
        let rendered = path.to_string();
        let mut victims = self.indexed_descendants(&rendered);
        if !Self::is_internal(&rendered) && !victims.contains(&rendered) && !rendered.is_empty() {
            victims.push(rendered.clone());
        } else if Self::is_internal(&rendered) {
            victims = vec![rendered.clone()];
        }

        for key in &victims {
            self.client.put(key, Value::Null).await?;
        }

        {
            let mut index = self.index.lock().unwrap();
            for key in &victims {
                index.remove(key);
            }
        }
        if !Self::is_internal(&rendered) {
            self.persist_index().await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &PathKey) -> Result<Vec<PathKey>, AdapterError> {
        let rendered = prefix.to_string();
        let mut keys = Vec::new();
        for key in self.indexed_descendants(&rendered) {
            keys.push(PathKey::parse(&key)?);
        }
        Ok(keys)
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<(PathKey, Value)>, AdapterError> {
        let keys: Vec<String> = self.index.lock().unwrap().iter().cloned().collect();
        let mut matches = Vec::new();
        for key in keys {
            if let Some(value) = self.client.get(&key).await? {
                if filter.matches(&value) {
                    matches.push((PathKey::parse(&key)?, value));
                }
            }
        }
        Ok(matches)
    }

    async fn subscribe(
        &self,
        path: &PathKey,
        subscriber: Subscriber,
    ) -> Result<SubscriptionId, AdapterError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let rendered = path.to_string();

        // The node itself...
        let node_path = path.clone();
        let node_subscriber = subscriber.clone();
        let node_watch = self
            .client
            .on(
                &rendered,
                Arc::new(move |value| {
                    node_subscriber(ChangeEvent {
                        path: node_path.clone(),
                        value,
                    });
                }),
            )
            .await?;

        // ...and everything under it.
        let child_prefix = path.clone();
        let child_watch = self
            .client
            .map_on(
                &rendered,
                Arc::new(move |child: &str, value| {
                    let Ok(suffix) = PathKey::parse(child) else {
                        return;
                    };
                    subscriber(ChangeEvent {
                        path: child_prefix.join(&suffix),
                        value,
                    });
                }),
            )
            .await?;

        self.watches
            .lock()
            .unwrap()
            .insert(id, vec![node_watch, child_watch]);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AdapterError> {
        let watches = self.watches.lock().unwrap().remove(&id);
        if let Some(watches) = watches {
            for watch in watches {
                self.client.off(watch).await?;
            }
        }
        Ok(())
    }

    async fn save(&self) -> Result<(), AdapterError> {
        self.persist_index().await
    }

    async fn load(&self) -> Result<(), AdapterError> {
        self.refresh_index().await
    }

    async fn clear(&self) -> Result<(), AdapterError> {
        let keys: Vec<String> = self.index.lock().unwrap().iter().cloned().collect();
        for key in &keys {
            self.client.put(key, Value::Null).await?;
        }
        self.index.lock().unwrap().clear();
        self.persist_index().await
    }
}
