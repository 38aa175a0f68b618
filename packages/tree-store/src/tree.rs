//! The file-tree ("composer") adapter: one file per key under a root
//! directory, with watch-driven live updates and a cached in-memory overlay.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lazy_static::lazy_static;
use notify::{RecursiveMode, Watcher};
use regex::Regex;
use tokio::task::JoinHandle;

use agentdeck_adapter::{
    nest, AdapterError, ChangeEvent, Durability, PathKey, QueryFilter, StorageAdapter,
    StorageUsage, Subscriber, SubscriptionId, Value,
};

use crate::format::DocFormat;

/// Flat fallback dump written next to the tree for fast reload.
pub const SNAPSHOT_FALLBACK: &str = ".snapshot.json";

const TEMPLATES_PREFIX: &str = "templates";

#[derive(Debug, Clone)]
pub struct TreeStoreConfig {
    /// Root directory of the tree. Created on connect if missing.
    pub root: PathBuf,
    /// Format for files written at keys with no existing file.
    pub default_format: DocFormat,
    /// Whether to start the filesystem watcher on connect.
    pub watch: bool,
}

impl TreeStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_format: DocFormat::Json,
            watch: true,
        }
    }

    pub fn with_default_format(mut self, format: DocFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn without_watch(mut self) -> Self {
        self.watch = false;
        self
    }
}

struct Inner {
    cache: BTreeMap<String, Value>,
    /// Backing file per cached key, where one exists on disk.
    files: BTreeMap<String, PathBuf>,
    connected: bool,
}

type SubscriberMap = HashMap<SubscriptionId, (PathKey, Subscriber)>;

/// File-tree store.
///
/// Reads hit the in-memory cache first; writes update the cache and then the
/// file (plain write, not atomic-renamed: watch-driven reconciliation, not
/// crash safety, is the priority here). A `notify` watcher on the root pushes
/// external add/change/remove events into the cache and out to subscribers,
/// so notification latency differs from the snapshot store's poll ticks.
pub struct TreeStore {
    config: TreeStoreConfig,
    inner: Arc<Mutex<Inner>>,
    subscribers: Arc<Mutex<SubscriberMap>>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl TreeStore {
    pub fn new(config: TreeStoreConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                cache: BTreeMap::new(),
                files: BTreeMap::new(),
                connected: false,
            })),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            watcher: Mutex::new(None),
            watch_task: Mutex::new(None),
            next_subscription: AtomicU64::new(0),
        }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.config.root.join(SNAPSHOT_FALLBACK)
    }

    /// The file a key maps to for a given extension. The extension is always
    /// appended, never substituted: a key leaf may itself contain dots
    /// (`release/v1.2`), and key identity derives purely from slash-splitting.
    fn file_path_for(&self, key: &PathKey, ext: &str) -> PathBuf {
        let mut path = self.config.root.clone();
        let Some((leaf, parents)) = key.components().split_last() else {
            return path;
        };
        for component in parents {
            path.push(component);
        }
        path.push(format!("{}.{}", leaf, ext));
        path
    }

    /// The key's path with no extension at all (files stored under their
    /// bare name read as plain text).
    fn bare_path_for(&self, key: &PathKey) -> PathBuf {
        let mut path = self.config.root.clone();
        for component in key.components() {
            path.push(component);
        }
        path
    }

    /// Every file this key could be stored under.
    fn candidate_files(&self, key: &PathKey) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = DocFormat::known_extensions()
            .iter()
            .map(|ext| self.file_path_for(key, ext))
            .collect();
        candidates.push(self.bare_path_for(key));
        candidates
    }

    fn resolve_file(&self, key: &PathKey) -> Option<PathBuf> {
        self.candidate_files(key).into_iter().find(|p| p.is_file())
    }

    /// Map an absolute file path back to its key, or `None` for files the
    /// store does not manage (hidden files, the snapshot dump, temp files).
    fn key_for_file(root: &Path, file: &Path) -> Option<(PathKey, DocFormat)> {
        let relative = file.strip_prefix(root).ok()?;

        let mut components: Vec<String> = Vec::new();
        for component in relative.components() {
            let s = component.as_os_str().to_str()?;
            if s.starts_with('.') {
                return None;
            }
            components.push(s.to_string());
        }

        let last = components.pop()?;
        if last.ends_with(".tmp") {
            return None;
        }
        // Only a known extension is stripped; any other trailing dot segment
        // belongs to the key (`release/v1.2.json` is key `release/v1.2`,
        // `app.log` is key `app.log`).
        let (stem, format) = match last.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty() && DocFormat::known_extensions().contains(&ext) =>
            {
                (stem.to_string(), DocFormat::from_extension(ext))
            }
            _ => (last, DocFormat::Text),
        };
        components.push(stem);

        let key = PathKey::try_from_components(components).ok()?;
        Some((key, format))
    }

    fn dispatch(subscribers: &Arc<Mutex<SubscriberMap>>, key: &PathKey, value: Option<Value>) {
        let interested: Vec<Subscriber> = subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, subscriber)| subscriber.clone())
            .collect();

        for subscriber in interested {
            subscriber(ChangeEvent {
                path: key.clone(),
                value: value.clone(),
            });
        }
    }

    /// Recursively walk the root and populate the cache from every parsed
    /// file, skipping hidden entries. Parse failures are logged and skipped
    /// so one corrupt document cannot block the rest of the tree.
    fn scan(&self) -> Result<(), AdapterError> {
        let mut loaded: Vec<(PathKey, PathBuf, Value)> = Vec::new();

        for entry in walkdir::WalkDir::new(&self.config.root)
            .into_iter()
            // Skip hidden entries, but never the root itself (whose own name
            // may legitimately start with a dot).
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry.map_err(|e| AdapterError::connection(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some((key, format)) = Self::key_for_file(&self.config.root, entry.path()) else {
                continue;
            };
            let raw = std::fs::read_to_string(entry.path())?;
            match format.parse(&raw, &entry.path().display().to_string()) {
                Ok(value) => loaded.push((key, entry.path().to_path_buf(), value)),
                Err(e) => log::warn!("tree store: skipping unparseable file: {}", e),
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.cache.clear();
        inner.files.clear();
        for (key, file, value) in loaded {
            let rendered = key.to_string();
            inner.cache.insert(rendered.clone(), value);
            inner.files.insert(rendered, file);
        }
        Ok(())
    }

    fn start_watcher(&self) -> Result<(), AdapterError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| AdapterError::connection(format!("watcher setup failed: {}", e)))?;

        watcher
            .watch(&self.config.root, RecursiveMode::Recursive)
            .map_err(|e| AdapterError::connection(format!("watcher setup failed: {}", e)))?;

        let inner = self.inner.clone();
        let subscribers = self.subscribers.clone();
        let root = self.config.root.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for file in &event.paths {
                    let Some((key, format)) = Self::key_for_file(&root, file) else {
                        continue;
                    };
                    let rendered = key.to_string();

                    match tokio::fs::read_to_string(file).await {
                        Ok(raw) => {
                            let parsed = format.parse(&raw, &file.display().to_string());
                            match parsed {
                                Ok(value) => {
                                    {
                                        let mut inner = inner.lock().unwrap();
                                        inner.cache.insert(rendered.clone(), value.clone());
                                        inner.files.insert(rendered, file.clone());
                                    }
                                    Self::dispatch(&subscribers, &key, Some(value));
                                }
                                Err(e) => {
                                    log::warn!("tree store: watch ignored bad document: {}", e)
                                }
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            let removed = {
                                let mut inner = inner.lock().unwrap();
                                inner.files.remove(&rendered);
                                inner.cache.remove(&rendered).is_some()
                            };
                            if removed {
                                Self::dispatch(&subscribers, &key, None);
                            }
                        }
                        Err(e) => log::debug!("tree store: watch read failed: {}", e),
                    }
                }
            }
        });

        *self.watcher.lock().unwrap() = Some(watcher);
        *self.watch_task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Render a named template with `{{placeholder}}` substitution.
    ///
    /// The template lives at `templates/<name>`; its body is the string value
    /// (or the `content` field of a front-matter document). Placeholders with
    /// no binding are left in place.
    pub async fn render_template(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<Option<String>, AdapterError> {
        lazy_static! {
            static ref PLACEHOLDER: Regex =
                Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").unwrap();
        }

        let key = PathKey::parse(TEMPLATES_PREFIX)?.join(&PathKey::parse(name)?);
        let Some(value) = self.get(&key).await? else {
            return Ok(None);
        };

        let body = match &value {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            other => other.to_string(),
        };

        let rendered = PLACEHOLDER.replace_all(&body, |caps: &regex::Captures| {
            let name = &caps[1];
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(Some(rendered.into_owned()))
    }

    /// Merge several named documents into one object.
    ///
    /// Object values contribute their fields (later keys win on collision);
    /// scalar values land under their leaf component. Missing keys are
    /// skipped.
    pub async fn compose(&self, keys: &[PathKey]) -> Result<Value, AdapterError> {
        let mut merged = serde_json::Map::new();
        for key in keys {
            let Some(value) = self.get(key).await? else {
                continue;
            };
            match value {
                Value::Object(map) => merged.extend(map),
                other => {
                    if let Some(leaf) = key.leaf() {
                        merged.insert(leaf.to_string(), other);
                    }
                }
            }
        }
        Ok(Value::Object(merged))
    }
}

impl Drop for TreeStore {
    fn drop(&mut self) {
        if let Some(task) = self.watch_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl StorageAdapter for TreeStore {
    fn name(&self) -> &str {
        "tree"
    }

    fn durability(&self) -> Durability {
        Durability::Synchronous
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        if self.is_connected() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.root)
            .await
            .map_err(|e| {
                AdapterError::connection(format!(
                    "root '{}' is not usable: {}",
                    self.config.root.display(),
                    e
                ))
            })?;
        let meta = tokio::fs::metadata(&self.config.root)
            .await
            .map_err(|e| AdapterError::connection(e.to_string()))?;
        if !meta.is_dir() {
            return Err(AdapterError::connection(format!(
                "root '{}' is not a directory",
                self.config.root.display()
            )));
        }

        self.load().await?;

        if self.config.watch {
            self.start_watcher()?;
        }

        self.inner.lock().unwrap().connected = true;
        log::debug!("tree store connected at {}", self.config.root.display());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        *self.watcher.lock().unwrap() = None;
        if let Some(task) = self.watch_task.lock().unwrap().take() {
            task.abort();
        }
        self.save().await?;
        self.inner.lock().unwrap().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn get(&self, path: &PathKey) -> Result<Option<Value>, AdapterError> {
        let rendered = path.to_string();
        {
            let inner = self.inner.lock().unwrap();
            if let Some(value) = inner.cache.get(&rendered) {
                return Ok(Some(value.clone()));
            }
        }

        // Cache miss: probe the filesystem across known extensions.
        for ext in DocFormat::known_extensions() {
            let candidate = self.file_path_for(path, ext);
            let raw = match tokio::fs::read_to_string(&candidate).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let value =
                DocFormat::from_extension(ext).parse(&raw, &candidate.display().to_string())?;
            let mut inner = self.inner.lock().unwrap();
            inner.cache.insert(rendered.clone(), value.clone());
            inner.files.insert(rendered, candidate);
            return Ok(Some(value));
        }

        // Then the bare name: an extensionless file reads as plain text,
        // matching what the connect-time scan would have done.
        let bare = self.bare_path_for(path);
        let is_file = tokio::fs::metadata(&bare)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            let raw = tokio::fs::read_to_string(&bare).await?;
            let value = Value::String(raw);
            let mut inner = self.inner.lock().unwrap();
            inner.cache.insert(rendered.clone(), value.clone());
            inner.files.insert(rendered, bare);
            return Ok(Some(value));
        }

        // No file: assemble a nested view from cached descendants.
        let inner = self.inner.lock().unwrap();
        Ok(nest::assemble(&inner.cache, path))
    }

    async fn set(&self, path: &PathKey, value: Value) -> Result<(), AdapterError> {
        let rendered = path.to_string();

        let (file, format) = {
            let inner = self.inner.lock().unwrap();
            match inner.files.get(&rendered) {
                Some(existing) => {
                    // A tracked file without an extension is a bare text file.
                    let format = existing
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(DocFormat::from_extension)
                        .unwrap_or(DocFormat::Text);
                    (existing.clone(), format)
                }
                None => (
                    self.file_path_for(path, self.config.default_format.extension()),
                    self.config.default_format,
                ),
            }
        };

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, format.render(&value)?).await?;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.cache.insert(rendered.clone(), value.clone());
            inner.files.insert(rendered, file);
        }
        Self::dispatch(&self.subscribers, path, Some(value));
        Ok(())
    }

    async fn delete(&self, path: &PathKey) -> Result<(), AdapterError> {
        let rendered = path.to_string();
        let descendant_prefix = format!("{}/", rendered);

        let victims: Vec<(String, Option<PathBuf>)> = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<String> = inner
                .cache
                .keys()
                .filter(|k| {
                    rendered.is_empty() || *k == &rendered || k.starts_with(&descendant_prefix)
                })
                .cloned()
                .collect();
            keys.into_iter()
                .map(|k| {
                    inner.cache.remove(&k);
                    let file = inner.files.remove(&k);
                    (k, file)
                })
                .collect()
        };

        let had_exact_victim = victims.iter().any(|(k, _)| k == &rendered);

        for (key, file) in victims {
            let parsed = PathKey::parse(&key).ok();
            // Cache entries can lose their file mapping across a snapshot
            // reload; fall back to probing the disk for the key's candidates.
            let file = file.or_else(|| parsed.as_ref().and_then(|k| self.resolve_file(k)));
            if let Some(file) = file {
                match tokio::fs::remove_file(&file).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if let Some(key) = parsed {
                Self::dispatch(&self.subscribers, &key, None);
            }
        }

        // A file the cache never tracked (external write the watcher missed)
        // would otherwise resurrect the key on the next cache-miss read.
        if !rendered.is_empty() && !had_exact_victim {
            let mut removed = false;
            for candidate in self.candidate_files(path) {
                match tokio::fs::remove_file(&candidate).await {
                    Ok(()) => removed = true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if removed {
                Self::dispatch(&self.subscribers, path, None);
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &PathKey) -> Result<Vec<PathKey>, AdapterError> {
        let rendered = prefix.to_string();
        let descendant_prefix = format!("{}/", rendered);
        let inner = self.inner.lock().unwrap();

        let mut keys = Vec::new();
        for k in inner.cache.keys() {
            if rendered.is_empty() || k == &rendered || k.starts_with(&descendant_prefix) {
                keys.push(PathKey::parse(k)?);
            }
        }
        Ok(keys)
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<(PathKey, Value)>, AdapterError> {
        let inner = self.inner.lock().unwrap();
        let mut matches = Vec::new();
        for (k, v) in &inner.cache {
            if filter.matches(v) {
                matches.push((PathKey::parse(k)?, v.clone()));
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
        self.subscribers
            .lock()
            .unwrap()
            .insert(id, (path.clone(), subscriber));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AdapterError> {
        self.subscribers.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn save(&self) -> Result<(), AdapterError> {
        let serialized = {
            let inner = self.inner.lock().unwrap();
            serde_json::to_string_pretty(&inner.cache)
                .map_err(|e| AdapterError::serialization(SNAPSHOT_FALLBACK, e))?
        };
        tokio::fs::write(self.snapshot_path(), serialized.as_bytes()).await?;
        Ok(())
    }

    async fn load(&self) -> Result<(), AdapterError> {
        // Fast path: the flat fallback dump. A corrupt dump falls back to a
        // full directory scan instead of failing the connect.
        match tokio::fs::read(self.snapshot_path()).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, Value>>(&bytes) {
                Ok(map) => {
                    // Re-resolve each key's backing file so delete and rewrite
                    // keep targeting what is actually on disk.
                    let mut files = BTreeMap::new();
                    for rendered in map.keys() {
                        let Ok(key) = PathKey::parse(rendered) else {
                            continue;
                        };
                        if let Some(file) = self.resolve_file(&key) {
                            files.insert(rendered.clone(), file);
                        }
                    }
                    let mut inner = self.inner.lock().unwrap();
                    inner.cache = map;
                    inner.files = files;
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("tree store: snapshot fallback unreadable, rescanning: {}", e)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.scan()
    }

    async fn clear(&self) -> Result<(), AdapterError> {
        self.delete(&PathKey::root()).await?;
        match tokio::fs::remove_file(self.snapshot_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn storage_usage(&self) -> StorageUsage {
        let inner = self.inner.lock().unwrap();
        let used_bytes = inner
            .cache
            .values()
            .map(|v| v.to_string().len() as u64)
            .sum();
        StorageUsage {
            used_bytes,
            available_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_adapter::key;
    use serde_json::json;

    fn scratch(dir: &tempfile::TempDir) -> TreeStore {
        TreeStore::new(TreeStoreConfig::new(dir.path()).without_watch())
    }

    #[tokio::test]
    async fn set_writes_one_file_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        store
            .set(&key!("agents/worker-3"), json!({"status": "idle"}))
            .await
            .unwrap();

        let on_disk = dir.path().join("agents/worker-3.json");
        assert!(on_disk.is_file());
        let raw = std::fs::read_to_string(on_disk).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&raw).unwrap(),
            json!({"status": "idle"})
        );
    }

    #[tokio::test]
    async fn scan_populates_cache_from_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(
            dir.path().join("notes/today.md"),
            "---\nauthor: ops\n---\nall quiet\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("motd.txt"), "welcome").unwrap();
        std::fs::write(dir.path().join(".hidden.json"), "{}").unwrap();

        let store = scratch(&dir);
        store.connect().await.unwrap();

        let value = store.get(&key!("notes/today")).await.unwrap().unwrap();
        assert_eq!(value["author"], json!("ops"));
        assert_eq!(store.get(&key!("motd")).await.unwrap(), Some(json!("welcome")));

        let keys = store.list(&PathKey::root()).await.unwrap();
        assert!(!keys.iter().any(|k| k.to_string().contains("hidden")));
    }

    #[tokio::test]
    async fn delete_cascades_and_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        store.set(&key!("rooms/a/info"), json!(1)).await.unwrap();
        store.set(&key!("rooms/a/extra"), json!(2)).await.unwrap();
        store.set(&key!("rooms/b"), json!(3)).await.unwrap();

        store.delete(&key!("rooms/a")).await.unwrap();

        assert!(!store.exists(&key!("rooms/a/info")).await.unwrap());
        assert!(!dir.path().join("rooms/a/info.json").exists());
        assert!(store.exists(&key!("rooms/b")).await.unwrap());
    }

    #[tokio::test]
    async fn get_on_cache_miss_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        // Written behind the store's back, after connect.
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents/late.json"), "{\"x\": 1}").unwrap();

        assert_eq!(
            store.get(&key!("agents/late")).await.unwrap(),
            Some(json!({"x": 1}))
        );
    }

    #[tokio::test]
    async fn snapshot_fallback_reloads_without_scan() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = scratch(&dir);
            store.connect().await.unwrap();
            store.set(&key!("a/b"), json!(7)).await.unwrap();
            store.disconnect().await.unwrap();
        }

        assert!(dir.path().join(SNAPSHOT_FALLBACK).is_file());

        let store = scratch(&dir);
        store.connect().await.unwrap();
        assert_eq!(store.get(&key!("a/b")).await.unwrap(), Some(json!(7)));
    }

    #[tokio::test]
    async fn delete_removes_the_file_after_a_snapshot_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = scratch(&dir);
            store.connect().await.unwrap();
            store.set(&key!("a/b"), json!(1)).await.unwrap();
            store.disconnect().await.unwrap();
        }

        // Fast reload from the fallback dump, then delete.
        let store = scratch(&dir);
        store.connect().await.unwrap();
        store.delete(&key!("a/b")).await.unwrap();

        assert!(!dir.path().join("a/b.json").exists());
        assert!(!store.exists(&key!("a/b")).await.unwrap());
    }

    #[tokio::test]
    async fn delete_reaches_files_the_cache_never_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        // Written behind the store's back, never read through it.
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents/ghost.json"), "{\"x\": 1}").unwrap();

        store.delete(&key!("agents/ghost")).await.unwrap();
        assert!(!dir.path().join("agents/ghost.json").exists());
        assert!(!store.exists(&key!("agents/ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn dotted_key_leaves_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        store.set(&key!("release/v1"), json!("old")).await.unwrap();
        store.set(&key!("release/v1.2"), json!("new")).await.unwrap();

        assert!(dir.path().join("release/v1.json").is_file());
        assert!(dir.path().join("release/v1.2.json").is_file());
        assert_eq!(
            store.get(&key!("release/v1")).await.unwrap(),
            Some(json!("old"))
        );
        assert_eq!(
            store.get(&key!("release/v1.2")).await.unwrap(),
            Some(json!("new"))
        );

        // A fresh instance rebuilding from a directory scan agrees.
        let rescanned = scratch(&dir);
        rescanned.connect().await.unwrap();
        assert_eq!(
            rescanned.get(&key!("release/v1")).await.unwrap(),
            Some(json!("old"))
        );
        assert_eq!(
            rescanned.get(&key!("release/v1.2")).await.unwrap(),
            Some(json!("new"))
        );
    }

    #[tokio::test]
    async fn extensionless_file_reads_as_text_on_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        // Appears after connect, so only a cache-miss get can find it.
        std::fs::write(dir.path().join("motd"), "welcome").unwrap();

        assert_eq!(store.get(&key!("motd")).await.unwrap(), Some(json!("welcome")));

        // And it can be deleted through the store like any other key.
        store.delete(&key!("motd")).await.unwrap();
        assert!(!dir.path().join("motd").exists());
    }

    #[tokio::test]
    async fn render_template_substitutes_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        store
            .set(
                &key!("templates/greeting"),
                json!("Hello {{name}}, {{missing}} remains"),
            )
            .await
            .unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), "worker-3".to_string());
        let rendered = store
            .render_template("greeting", &vars)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rendered, "Hello worker-3, {{missing}} remains");

        assert!(store
            .render_template("nope", &BTreeMap::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn compose_merges_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir);
        store.connect().await.unwrap();

        store
            .set(&key!("fragments/base"), json!({"a": 1, "b": 1}))
            .await
            .unwrap();
        store
            .set(&key!("fragments/override"), json!({"b": 2}))
            .await
            .unwrap();
        store.set(&key!("fragments/motd"), json!("hi")).await.unwrap();

        let merged = store
            .compose(&[
                key!("fragments/base"),
                key!("fragments/override"),
                key!("fragments/motd"),
            ])
            .await
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2, "motd": "hi"}));
    }
}
