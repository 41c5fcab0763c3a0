//! The internal message bus: every value that moves between the line
//! engine, the bridge and the worker threads is a [`Message`], and the
//! [`Router`] actor delivers them by destination bus id.

mod message;
pub mod payload;
mod router;

pub use message::{Addr, Kind, Message, Signal, MAX_BODY, UNKNOWN_CALL};
pub use router::Router;
