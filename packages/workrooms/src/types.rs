//! Stored record types for the collaboration layer.
//!
//! Everything here persists through a `StorageAdapter` as JSON, so the serde
//! shapes are the wire format shared between engine instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentdeck_adapter::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Project,
    Team,
    Task,
    Dm,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Agent,
    Human,
}

/// Who is driving this engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub kind: SenderKind,
}

impl UserIdentity {
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SenderKind::Agent,
        }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SenderKind::Human,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub allow_agents: bool,
    pub allow_humans: bool,
    /// Days of inactivity before the room counts as archived. Soft state
    /// only; nothing is deleted.
    pub auto_archive: u32,
    pub max_messages: u64,
    pub notifications: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_agents: true,
            allow_humans: true,
            auto_archive: 30,
            max_messages: 1000,
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workroom {
    pub id: String,
    pub name: String,
    pub room_type: RoomType,
    pub created_by: String,
    pub members: Vec<String>,
    pub moderators: Vec<String>,
    pub is_private: bool,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    #[serde(default)]
    pub settings: RoomSettings,
}

impl Workroom {
    pub fn is_member(&self, user: &str) -> bool {
        self.members.iter().any(|m| m == user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkroomMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_kind: SenderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// Per (room, user) activity record. Absence means "not present".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub typing: bool,
}

impl Presence {
    pub fn now() -> Self {
        let ts = Utc::now();
        Self {
            joined_at: ts,
            last_active: ts,
            typing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    Message,
    Join,
    Leave,
    Typing,
    Presence,
    RoomCreated,
    RoomUpdated,
}

/// Emitted synchronously to listeners on every state change; this is how
/// UI and transport layers learn of changes without polling the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub kind: RoomEventKind,
    pub room_id: String,
    pub user_id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}
