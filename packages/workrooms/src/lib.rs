//! Collaboration engine for AgentDeck.
//!
//! Rooms, membership, presence, typing indicators and ordered message
//! history, built purely against the storage adapter contract. The engine
//! never talks to a concrete backend; anything implementing
//! `StorageAdapter` can carry a workroom deployment.

mod command;
mod engine;
mod error;
mod types;

pub use command::{CommandOutcome, WorkroomCommand};
pub use engine::{
    EngineConfig, Listener, MessageOptions, WorkroomsEngine, STORE_PREFIX,
};
pub use error::EngineError;
pub use types::{
    Presence, RoomEvent, RoomEventKind, RoomSettings, RoomType, SenderKind, UserIdentity,
    Workroom, WorkroomMessage,
};
