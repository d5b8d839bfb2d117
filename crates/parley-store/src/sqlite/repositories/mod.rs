//! Stateless per-table repositories. Every method takes `&Connection`.

pub mod member;
pub mod message;
pub mod room;
pub mod user;

pub use member::MemberRepo;
pub use message::MessageRepo;
pub use room::RoomRepo;
pub use user::UserRepo;
