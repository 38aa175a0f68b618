//! Command surface for transports and UI shells.
//!
//! Maps the small verb set a chat-style frontend needs onto the engine
//! primitives and always hands back a `CommandOutcome`, so a failed command
//! reaches the caller as data instead of tearing down the dispatch loop.

use serde::Serialize;

use agentdeck_adapter::Value;

use crate::engine::{MessageOptions, WorkroomsEngine};
use crate::types::RoomType;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkroomCommand {
    Create {
        name: String,
        room_type: RoomType,
        private: bool,
    },
    Join {
        room: String,
    },
    Leave {
        room: String,
    },
    Message {
        room: String,
        text: String,
    },
    List,
    History {
        room: String,
    },
}

impl WorkroomCommand {
    fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Message { .. } => "message",
            Self::List => "list",
            Self::History { .. } => "history",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub action: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    fn success(action: &'static str, payload: Value) -> Self {
        Self {
            action,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    fn failure(action: &'static str, error: impl std::fmt::Display) -> Self {
        Self {
            action,
            ok: false,
            payload: None,
            error: Some(error.to_string()),
        }
    }
}

impl WorkroomsEngine {
    pub async fn handle_command(&self, command: WorkroomCommand) -> CommandOutcome {
        let action = command.action();
        match command {
            WorkroomCommand::Create {
                name,
                room_type,
                private,
            } => match self.create_room(&name, room_type, private).await {
                Ok(room) => CommandOutcome::success(
                    action,
                    serde_json::to_value(&room).unwrap_or_default(),
                ),
                Err(err) => CommandOutcome::failure(action, err),
            },
            WorkroomCommand::Join { room } => match self.join_room(&room).await {
                Ok(()) => CommandOutcome::success(action, Value::String(room)),
                Err(err) => CommandOutcome::failure(action, err),
            },
            WorkroomCommand::Leave { room } => match self.leave_room(&room).await {
                Ok(()) => CommandOutcome::success(action, Value::String(room)),
                Err(err) => CommandOutcome::failure(action, err),
            },
            WorkroomCommand::Message { room, text } => {
                match self.send_message(&room, &text, MessageOptions::default()).await {
                    Ok(message) => CommandOutcome::success(
                        action,
                        serde_json::to_value(&message).unwrap_or_default(),
                    ),
                    Err(err) => CommandOutcome::failure(action, err),
                }
            }
            WorkroomCommand::List => CommandOutcome::success(
                action,
                serde_json::to_value(self.rooms()).unwrap_or_default(),
            ),
            WorkroomCommand::History { room } => CommandOutcome::success(
                action,
                serde_json::to_value(self.room_messages(&room)).unwrap_or_default(),
            ),
        }
    }
}
