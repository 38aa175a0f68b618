//! The collaboration engine.
//!
//! One engine instance serves one caller identity and talks to exactly one
//! `StorageAdapter`. All room, message and presence state is persisted
//! through the adapter; the engine keeps local caches so that read accessors
//! are pure projections with no I/O. A live subscription on the `workrooms`
//! prefix feeds those caches, which is what lets a second engine instance
//! over the same store converge on the same view.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use agentdeck_adapter::{
    AdapterError, ChangeEvent, PathKey, StorageAdapter, SubscriptionId, Value,
};

use crate::error::EngineError;
use crate::types::{
    Presence, RoomEvent, RoomEventKind, RoomSettings, RoomType, UserIdentity, Workroom,
    WorkroomMessage,
};

/// All engine state lives under this key prefix in the backing store.
pub const STORE_PREFIX: &str = "workrooms";

pub type Listener = Arc<dyn Fn(RoomEvent) + Send + Sync>;

fn room_key(id: &str) -> Result<PathKey, AdapterError> {
    Ok(PathKey::parse(&format!("{STORE_PREFIX}/rooms/{id}"))?)
}

fn message_key(room: &str, msg: &str) -> Result<PathKey, AdapterError> {
    Ok(PathKey::parse(&format!("{STORE_PREFIX}/messages/{room}/{msg}"))?)
}

fn presence_key(room: &str, user: &str) -> Result<PathKey, AdapterError> {
    Ok(PathKey::parse(&format!("{STORE_PREFIX}/presence/{room}/{user}"))?)
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a typing flag stays set before the engine clears it.
    pub typing_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_secs(3),
        }
    }
}

impl EngineConfig {
    pub fn typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }
}

/// Optional fields of `send_message`.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub recipient: Option<String>,
    pub thread_parent: Option<String>,
    pub attachments: Vec<String>,
}

#[derive(Default)]
struct State {
    rooms: BTreeMap<String, Workroom>,
    // room -> message id -> message; keyed so duplicate deliveries from the
    // store overwrite in place instead of appending
    messages: BTreeMap<String, BTreeMap<String, WorkroomMessage>>,
    // room -> user -> presence
    presence: BTreeMap<String, BTreeMap<String, Presence>>,
}

pub struct WorkroomsEngine {
    store: Arc<dyn StorageAdapter>,
    identity: UserIdentity,
    config: EngineConfig,
    state: Arc<Mutex<State>>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    // room id -> pending auto-clear task for this caller's typing flag
    typing_clears: Mutex<HashMap<String, JoinHandle<()>>>,
    feed: Mutex<Option<SubscriptionId>>,
}

impl WorkroomsEngine {
    pub fn new(store: Arc<dyn StorageAdapter>, identity: UserIdentity) -> Self {
        Self::with_config(store, identity, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn StorageAdapter>,
        identity: UserIdentity,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            identity,
            config,
            state: Arc::new(Mutex::new(State::default())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            typing_clears: Mutex::new(HashMap::new()),
            feed: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Hydrates the caches from the store and opens the live feed.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.refresh().await?;

        let state = self.state.clone();
        let prefix = PathKey::parse(STORE_PREFIX).map_err(AdapterError::from)?;
        let id = self
            .store
            .subscribe(
                &prefix,
                Arc::new(move |event| Self::absorb(&state, &event)),
            )
            .await?;
        *self.feed.lock().unwrap() = Some(id);
        Ok(())
    }

    /// Drops the live feed and any pending typing clears. The store itself
    /// is left connected; it belongs to the caller.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let feed = self.feed.lock().unwrap().take();
        if let Some(id) = feed {
            self.store.unsubscribe(id).await?;
        }
        let pending: Vec<JoinHandle<()>> = {
            let mut clears = self.typing_clears.lock().unwrap();
            clears.drain().map(|(_, task)| task).collect()
        };
        for task in pending {
            task.abort();
        }
        Ok(())
    }

    /// Re-reads the whole `workrooms` subtree into the caches. `start` does
    /// this once; callers that need a deterministic view before the next
    /// feed delivery can call it directly.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let prefix = PathKey::parse(STORE_PREFIX).map_err(AdapterError::from)?;
        if let Some(tree) = self.store.get(&prefix).await? {
            Self::absorb(
                &self.state,
                &ChangeEvent {
                    path: prefix,
                    value: Some(tree),
                },
            );
        }
        Ok(())
    }

    pub fn add_listener(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    // ---- room lifecycle -------------------------------------------------

    pub async fn create_room(
        &self,
        name: &str,
        room_type: RoomType,
        is_private: bool,
    ) -> Result<Workroom, EngineError> {
        let id = format!("room-{}", Uuid::new_v4());
        self.create_room_with_id(&id, name, room_type, is_private)
            .await
    }

    async fn create_room_with_id(
        &self,
        id: &str,
        name: &str,
        room_type: RoomType,
        is_private: bool,
    ) -> Result<Workroom, EngineError> {
        let room = Workroom {
            id: id.to_string(),
            name: name.to_string(),
            room_type,
            created_by: self.identity.id.clone(),
            members: vec![self.identity.id.clone()],
            moderators: vec![self.identity.id.clone()],
            is_private,
            last_activity: Utc::now(),
            message_count: 0,
            settings: RoomSettings::default(),
        };
        self.persist_room(&room).await?;
        self.write_presence(id, Presence::now()).await?;

        self.emit(
            RoomEventKind::RoomCreated,
            id,
            serde_json::to_value(&room).unwrap_or_default(),
        );
        self.emit(RoomEventKind::Join, id, Value::Null);
        Ok(room)
    }

    pub async fn join_room(&self, id: &str) -> Result<(), EngineError> {
        let mut room = self.room(id)?;
        if !room.is_member(&self.identity.id) {
            room.members.push(self.identity.id.clone());
            room.last_activity = Utc::now();
            self.persist_room(&room).await?;
            self.emit(RoomEventKind::RoomUpdated, id, Value::Null);
        }
        self.write_presence(id, Presence::now()).await?;
        self.emit(RoomEventKind::Join, id, Value::Null);
        Ok(())
    }

    pub async fn leave_room(&self, id: &str) -> Result<(), EngineError> {
        let mut room = self.room(id)?;
        room.members.retain(|m| m != &self.identity.id);
        room.last_activity = Utc::now();
        self.persist_room(&room).await?;

        self.store
            .delete(&presence_key(id, &self.identity.id)?)
            .await?;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(per_room) = state.presence.get_mut(id) {
                per_room.remove(&self.identity.id);
            }
        }
        self.emit(RoomEventKind::Leave, id, Value::Null);
        Ok(())
    }

    // ---- messaging ------------------------------------------------------

    pub async fn send_message(
        &self,
        room_id: &str,
        text: &str,
        opts: MessageOptions,
    ) -> Result<WorkroomMessage, EngineError> {
        let mut room = self.room(room_id)?;
        if !room.is_member(&self.identity.id) {
            return Err(EngineError::not_member(room_id, &self.identity.id));
        }

        let message = WorkroomMessage {
            id: format!("msg-{}", Uuid::new_v4()),
            room_id: room_id.to_string(),
            sender_id: self.identity.id.clone(),
            sender_kind: self.identity.kind,
            recipient: opts.recipient,
            text: text.to_string(),
            created_at: Utc::now(),
            thread_parent: opts.thread_parent,
            attachments: opts.attachments,
        };

        let key = message_key(room_id, &message.id)?;
        let value = serde_json::to_value(&message)
            .map_err(|e| AdapterError::serialization(&key, e))?;
        self.store.set(&key, value).await?;
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(room_id.to_string())
            .or_default()
            .insert(message.id.clone(), message.clone());

        room.message_count += 1;
        room.last_activity = message.created_at;
        self.persist_room(&room).await?;
        self.touch_presence(room_id).await?;

        self.emit(
            RoomEventKind::Message,
            room_id,
            serde_json::to_value(&message).unwrap_or_default(),
        );
        Ok(message)
    }

    // ---- typing & presence ----------------------------------------------

    /// Sets or clears the caller's typing flag. A set flag clears itself
    /// after `EngineConfig::typing_timeout`; an explicit clear before that
    /// is harmless.
    pub async fn set_typing(&self, room_id: &str, typing: bool) -> Result<(), EngineError> {
        self.room(room_id)?;

        let mut presence = self.own_presence(room_id).unwrap_or_else(Presence::now);
        presence.typing = typing;
        presence.last_active = Utc::now();
        self.write_presence(room_id, presence).await?;

        let previous = self.typing_clears.lock().unwrap().remove(room_id);
        if let Some(task) = previous {
            task.abort();
        }

        if typing {
            let store = self.store.clone();
            let state = self.state.clone();
            let room = room_id.to_string();
            let user = self.identity.id.clone();
            let delay = self.config.typing_timeout;
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                clear_typing(store, state, &room, &user).await;
            });
            self.typing_clears
                .lock()
                .unwrap()
                .insert(room_id.to_string(), task);
        }

        self.emit(RoomEventKind::Typing, room_id, Value::Bool(typing));
        Ok(())
    }

    // ---- read accessors (no I/O) ----------------------------------------

    pub fn rooms(&self) -> Vec<Workroom> {
        self.state.lock().unwrap().rooms.values().cloned().collect()
    }

    pub fn room_by_id(&self, id: &str) -> Option<Workroom> {
        self.state.lock().unwrap().rooms.get(id).cloned()
    }

    /// Messages of a room, ascending by creation timestamp with ties broken
    /// by id, at most one entry per message id.
    pub fn room_messages(&self, room_id: &str) -> Vec<WorkroomMessage> {
        let mut messages: Vec<WorkroomMessage> = {
            let state = self.state.lock().unwrap();
            state
                .messages
                .get(room_id)
                .map(|per_room| per_room.values().cloned().collect())
                .unwrap_or_default()
        };
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        messages
    }

    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn user_rooms(&self, user: &str) -> Vec<Workroom> {
        self.state
            .lock()
            .unwrap()
            .rooms
            .values()
            .filter(|room| room.is_member(user))
            .cloned()
            .collect()
    }

    pub fn online_users(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .presence
            .get(room_id)
            .map(|per_room| per_room.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn typing_users(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .presence
            .get(room_id)
            .map(|per_room| {
                per_room
                    .iter()
                    .filter(|(_, p)| p.typing)
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- seeding --------------------------------------------------------

    /// Creates the default room set: one global room, one per project, one
    /// per team. Ids are derived from the names, and rooms that already
    /// exist in the store are left alone, so repeated calls are idempotent.
    /// Returns the number of rooms actually created.
    pub async fn seed_default_rooms(
        &self,
        projects: &[&str],
        teams: &[&str],
    ) -> Result<usize, EngineError> {
        let mut created = 0;
        if self.seed_room("room-global", "global", RoomType::Global).await? {
            created += 1;
        }
        for project in projects {
            let id = format!("room-project-{}", slug(project));
            if self.seed_room(&id, project, RoomType::Project).await? {
                created += 1;
            }
        }
        for team in teams {
            let id = format!("room-team-{}", slug(team));
            if self.seed_room(&id, team, RoomType::Team).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn seed_room(
        &self,
        id: &str,
        name: &str,
        room_type: RoomType,
    ) -> Result<bool, EngineError> {
        if self.store.exists(&room_key(id)?).await? {
            return Ok(false);
        }
        self.create_room_with_id(id, name, room_type, false).await?;
        Ok(true)
    }

    // ---- internals ------------------------------------------------------

    fn room(&self, id: &str) -> Result<Workroom, EngineError> {
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::room_not_found(id))
    }

    fn own_presence(&self, room_id: &str) -> Option<Presence> {
        self.state
            .lock()
            .unwrap()
            .presence
            .get(room_id)
            .and_then(|per_room| per_room.get(&self.identity.id))
            .cloned()
    }

    async fn persist_room(&self, room: &Workroom) -> Result<(), EngineError> {
        let key = room_key(&room.id)?;
        let value =
            serde_json::to_value(room).map_err(|e| AdapterError::serialization(&key, e))?;
        self.store.set(&key, value).await?;
        self.state
            .lock()
            .unwrap()
            .rooms
            .insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn write_presence(&self, room_id: &str, presence: Presence) -> Result<(), EngineError> {
        let key = presence_key(room_id, &self.identity.id)?;
        let value =
            serde_json::to_value(&presence).map_err(|e| AdapterError::serialization(&key, e))?;
        self.store.set(&key, value).await?;
        self.state
            .lock()
            .unwrap()
            .presence
            .entry(room_id.to_string())
            .or_default()
            .insert(self.identity.id.clone(), presence);
        Ok(())
    }

    async fn touch_presence(&self, room_id: &str) -> Result<(), EngineError> {
        let mut presence = self.own_presence(room_id).unwrap_or_else(Presence::now);
        presence.last_active = Utc::now();
        self.write_presence(room_id, presence).await
    }

    fn emit(&self, kind: RoomEventKind, room_id: &str, data: Value) {
        let event = RoomEvent {
            kind,
            room_id: room_id.to_string(),
            user_id: self.identity.id.clone(),
            data,
            timestamp: Utc::now(),
        };
        let listeners: Vec<Listener> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(event.clone());
        }
    }

    /// Applies a store change to the caches. Handles both granular
    /// per-key deliveries (tree watcher, graph watches) and whole-subtree
    /// deliveries (snapshot polling, `refresh`).
    fn absorb(state: &Mutex<State>, event: &ChangeEvent) {
        let components: Vec<&str> = event
            .path
            .components()
            .iter()
            .map(String::as_str)
            .collect();
        if components.first() != Some(&STORE_PREFIX) {
            return;
        }

        let mut state = state.lock().unwrap();
        match components.as_slice() {
            [_] => {
                if let Some(tree) = &event.value {
                    absorb_tree(&mut state, tree);
                }
            }
            [_, "rooms", id] => match &event.value {
                Some(value) => {
                    if let Ok(room) = serde_json::from_value::<Workroom>(value.clone()) {
                        state.rooms.insert((*id).to_string(), room);
                    }
                }
                None => {
                    state.rooms.remove(*id);
                }
            },
            [_, "messages", room, msg] => match &event.value {
                Some(value) => {
                    if let Ok(message) = serde_json::from_value::<WorkroomMessage>(value.clone()) {
                        state
                            .messages
                            .entry((*room).to_string())
                            .or_default()
                            .insert((*msg).to_string(), message);
                    }
                }
                None => {
                    if let Some(per_room) = state.messages.get_mut(*room) {
                        per_room.remove(*msg);
                    }
                }
            },
            [_, "presence", room, user] => match &event.value {
                Some(value) => {
                    if let Ok(presence) = serde_json::from_value::<Presence>(value.clone()) {
                        state
                            .presence
                            .entry((*room).to_string())
                            .or_default()
                            .insert((*user).to_string(), presence);
                    }
                }
                None => {
                    if let Some(per_room) = state.presence.get_mut(*room) {
                        per_room.remove(*user);
                    }
                }
            },
            _ => {}
        }
    }
}

impl Drop for WorkroomsEngine {
    fn drop(&mut self) {
        for (_, task) in self.typing_clears.lock().unwrap().drain() {
            task.abort();
        }
    }
}

/// Replaces the caches from an assembled `workrooms` subtree. Entries that
/// fail to deserialize are skipped so one corrupt record cannot hide the
/// rest.
fn absorb_tree(state: &mut State, tree: &Value) {
    if let Some(rooms) = tree.get("rooms").and_then(Value::as_object) {
        state.rooms = rooms
            .iter()
            .filter_map(|(id, value)| {
                match serde_json::from_value::<Workroom>(value.clone()) {
                    Ok(room) => Some((id.clone(), room)),
                    Err(err) => {
                        log::warn!("skipping unreadable room {id}: {err}");
                        None
                    }
                }
            })
            .collect();
    }
    if let Some(messages) = tree.get("messages").and_then(Value::as_object) {
        state.messages = messages
            .iter()
            .map(|(room, per_room)| {
                let parsed = per_room
                    .as_object()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|(id, value)| {
                                serde_json::from_value::<WorkroomMessage>(value.clone())
                                    .ok()
                                    .map(|msg| (id.clone(), msg))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (room.clone(), parsed)
            })
            .collect();
    }
    if let Some(presence) = tree.get("presence").and_then(Value::as_object) {
        state.presence = presence
            .iter()
            .map(|(room, per_room)| {
                let parsed = per_room
                    .as_object()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|(user, value)| {
                                serde_json::from_value::<Presence>(value.clone())
                                    .ok()
                                    .map(|p| (user.clone(), p))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (room.clone(), parsed)
            })
            .collect();
    }
}

async fn clear_typing(
    store: Arc<dyn StorageAdapter>,
    state: Arc<Mutex<State>>,
    room: &str,
    user: &str,
) {
    let presence = {
        let mut state = state.lock().unwrap();
        let Some(presence) = state
            .presence
            .get_mut(room)
            .and_then(|per_room| per_room.get_mut(user))
        else {
            return;
        };
        if !presence.typing {
            return;
        }
        presence.typing = false;
        presence.clone()
    };

    let persisted = async {
        let key = presence_key(room, user)?;
        let value =
            serde_json::to_value(&presence).map_err(|e| AdapterError::serialization(&key, e))?;
        store.set(&key, value).await
    }
    .await;
    if let Err(err) = persisted {
        log::warn!("typing auto-clear failed for {room}/{user}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_and_hyphenated() {
        assert_eq!(slug("Mesh Relay"), "mesh-relay");
        assert_eq!(slug("ops//Core"), "ops-core");
        assert_eq!(slug("  edge  "), "edge");
    }

    #[test]
    fn absorb_applies_granular_room_delivery() {
        let state = Mutex::new(State::default());
        let room = Workroom {
            id: "room-1".into(),
            name: "demo".into(),
            room_type: RoomType::Task,
            created_by: "alice".into(),
            members: vec!["alice".into()],
            moderators: vec!["alice".into()],
            is_private: false,
            last_activity: Utc::now(),
            message_count: 0,
            settings: RoomSettings::default(),
        };

        WorkroomsEngine::absorb(
            &state,
            &ChangeEvent {
                path: PathKey::parse("workrooms/rooms/room-1").unwrap(),
                value: Some(serde_json::to_value(&room).unwrap()),
            },
        );
        assert_eq!(state.lock().unwrap().rooms.get("room-1"), Some(&room));

        WorkroomsEngine::absorb(
            &state,
            &ChangeEvent {
                path: PathKey::parse("workrooms/rooms/room-1").unwrap(),
                value: None,
            },
        );
        assert!(state.lock().unwrap().rooms.is_empty());
    }

    #[test]
    fn absorb_skips_corrupt_entries_in_subtree() {
        let state = Mutex::new(State::default());
        let tree = serde_json::json!({
            "rooms": {
                "bad": {"not": "a room"},
                "room-ok": {
                    "id": "room-ok",
                    "name": "ok",
                    "roomType": "global",
                    "createdBy": "alice",
                    "members": ["alice"],
                    "moderators": ["alice"],
                    "isPrivate": false,
                    "lastActivity": "2026-01-01T00:00:00Z",
                    "messageCount": 0
                }
            }
        });

        WorkroomsEngine::absorb(
            &state,
            &ChangeEvent {
                path: PathKey::parse("workrooms").unwrap(),
                value: Some(tree),
            },
        );

        let state = state.lock().unwrap();
        assert_eq!(state.rooms.len(), 1);
        assert!(state.rooms.contains_key("room-ok"));
    }

    #[test]
    fn foreign_paths_are_ignored() {
        let state = Mutex::new(State::default());
        WorkroomsEngine::absorb(
            &state,
            &ChangeEvent {
                path: PathKey::parse("agents/worker-1").unwrap(),
                value: Some(serde_json::json!({"status": "idle"})),
            },
        );
        assert!(state.lock().unwrap().rooms.is_empty());
    }
}
