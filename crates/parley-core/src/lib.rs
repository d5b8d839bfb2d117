//! # parley-core
//!
//! Foundation types shared by every Parley crate.
//!
//! - **IDs**: string-branded `ProcessId`, `EnvelopeId`, `ConnectionId` and the
//!   numeric `RoomId`, `UserId`, `MessageId` newtypes
//! - **Wire messages**: [`messages::ServerMessage`] (outbound) and
//!   [`messages::ClientMessage`] (inbound) tagged by `type`
//! - **Envelope**: [`envelope::DistributedEnvelope`], the unit carried between processes
//! - **Paging**: cursor request/response types for message history
//! - **Errors**: [`errors::ChatError`] with machine-readable [`errors::ErrorCode`]s
//! - **Keys**: deterministic pub/sub channel and shared-state key names

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod keys;
pub mod messages;
pub mod paging;
pub mod rooms;

pub use errors::{ChatError, ErrorCode, Result};
pub use ids::{ConnectionId, EnvelopeId, MessageId, ProcessId, RoomId, UserId};
