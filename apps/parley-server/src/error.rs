use serde::Serialize;
use thiserror::Error;

/// Errors a client request can produce. Every variant is reported to the
/// originating connection only, as an `error` event; none of them is fatal
/// to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Room \"{0}\" already exists")]
    RoomExists(String),
    #[error("Room \"{0}\" not found")]
    RoomNotFound(String),
    #[error("{user} is already a member of \"{room}\"")]
    AlreadyMember { room: String, user: String },
    #[error("You are not a member of \"{0}\"")]
    NotInRoom(String),
    #[error("No pending join request from {user} in \"{room}\"")]
    RequestNotFound { room: String, user: String },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidInput(String),
}

impl ChatError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Stable machine-readable code carried alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomExists(_) => "ROOM_EXISTS",
            Self::RoomNotFound(_) => "ROOM_NOT_FOUND",
            Self::AlreadyMember { .. } => "ALREADY_MEMBER",
            Self::NotInRoom(_) => "NOT_IN_ROOM",
            Self::RequestNotFound { .. } => "REQUEST_NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Body of the `error` event sent to the client.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Wire shape of the `error` event.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

pub type ChatResult<T> = Result<T, ChatError>;
