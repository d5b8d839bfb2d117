//! WebSocket side of the fan-out: connections, the per-process session
//! registry, room subscriptions, local delivery and the session loop.

pub mod connection;
pub mod fanout;
pub mod handler;
pub mod registry;
pub mod session;
pub mod subscriptions;

pub use connection::ClientConnection;
pub use fanout::LocalFanout;
pub use registry::SessionRegistry;
pub use subscriptions::RoomSubscriptionTracker;
