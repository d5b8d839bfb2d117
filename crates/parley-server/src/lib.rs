//! # parley-server
//!
//! Real-time fan-out for chat rooms spread across many server processes.
//!
//! - **Session registry**: which users hold open WebSocket connections on this process
//! - **Room subscriptions**: which room channels this process listens to, recorded in
//!   shared state so redundant joins are no-ops and idle processes release them
//! - **Broadcast bus**: publishes envelopes to other processes, drops self-addressed
//!   and duplicate envelopes, and hands the rest to local fan-out
//! - **Local fan-out**: best-effort delivery to every local connection of a room member
//! - **Sequence generator**: per-room counter in shared state, one increment per send
//! - **History**: stateless cursor paging over persisted messages
//! - Axum gateway with `/ws`, `/health` and `/metrics`, and graceful shutdown via
//!   `CancellationToken`

#![deny(unsafe_code)]

mod blocking;
pub mod bus;
pub mod config;
pub mod errors;
pub mod health;
pub mod history;
pub mod metrics;
pub mod sequence;
pub mod server;
pub mod service;
pub mod shared;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
#[allow(missing_docs)]
mod test_support;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{ParleyServer, ServerHandle};
