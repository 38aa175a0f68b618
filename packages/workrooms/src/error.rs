use agentdeck_adapter::AdapterError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown room: {id}")]
    RoomNotFound { id: String },

    #[error("{user} is not a member of room {room}")]
    NotMember { room: String, user: String },

    #[error(transparent)]
    Storage(#[from] AdapterError),
}

impl EngineError {
    pub fn room_not_found(id: impl Into<String>) -> Self {
        Self::RoomNotFound { id: id.into() }
    }

    pub fn not_member(room: impl Into<String>, user: impl Into<String>) -> Self {
        Self::NotMember {
            room: room.into(),
            user: user.into(),
        }
    }
}
