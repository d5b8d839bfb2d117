//! Error hierarchy for chat operations.
//!
//! [`ChatError`] covers every failure a caller of the chat service can see.
//! Each variant maps to a wire [`ErrorCode`] so WebSocket error replies carry
//! a machine-readable code next to the human-readable message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{RoomId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Wire error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Room does not exist.
    RoomNotFound,
    /// User does not exist.
    UserNotFound,
    /// Caller is not an active member of the room.
    #[serde(rename = "NOT_A_MEMBER")]
    NotAMember,
    /// Caller is already an active member.
    AlreadyMember,
    /// Room is at its member limit.
    RoomFull,
    /// Inbound frame was not valid JSON or had the wrong shape.
    InvalidMessageFormat,
    /// Inbound frame had an unrecognised `type`.
    UnknownMessageType,
    /// A sequence number could not be obtained.
    SequenceUnavailable,
    /// Anything else.
    InternalError,
}

impl ErrorCode {
    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::NotAMember => "NOT_A_MEMBER",
            Self::AlreadyMember => "ALREADY_MEMBER",
            Self::RoomFull => "ROOM_FULL",
            Self::InvalidMessageFormat => "INVALID_MESSAGE_FORMAT",
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::SequenceUnavailable => "SEQUENCE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Room does not exist.
    #[error("chat room not found: {0}")]
    RoomNotFound(RoomId),

    /// User does not exist.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// Caller is not an active member of the room.
    #[error("user {user} is not a member of room {room}")]
    NotMember {
        /// Target room.
        room: RoomId,
        /// Caller.
        user: UserId,
    },

    /// Caller is already an active member.
    #[error("user {user} already joined room {room}")]
    AlreadyMember {
        /// Target room.
        room: RoomId,
        /// Caller.
        user: UserId,
    },

    /// Room is at capacity.
    #[error("room {room} is full ({max_members} members)")]
    RoomFull {
        /// Target room.
        room: RoomId,
        /// Configured limit.
        max_members: u32,
    },

    /// Inbound frame could not be parsed.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Inbound frame had an unknown `type`.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The shared sequence counter could not be advanced.
    #[error("failed to obtain sequence for room {room}: {message}")]
    Sequence {
        /// Target room.
        room: RoomId,
        /// Underlying failure.
        message: String,
    },

    /// Store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Distributed bus failure.
    #[error("bus error: {0}")]
    Bus(String),
}

impl ChatError {
    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::UserNotFound(_) => ErrorCode::UserNotFound,
            Self::NotMember { .. } => ErrorCode::NotAMember,
            Self::AlreadyMember { .. } => ErrorCode::AlreadyMember,
            Self::RoomFull { .. } => ErrorCode::RoomFull,
            Self::InvalidFormat(_) => ErrorCode::InvalidMessageFormat,
            Self::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            Self::Sequence { .. } => ErrorCode::SequenceUnavailable,
            Self::Store(_) | Self::Bus(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the caller could reasonably retry the same request.
    ///
    /// Membership and capacity errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Sequence { .. } | Self::Store(_) | Self::Bus(_))
    }
}

/// Result type for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
