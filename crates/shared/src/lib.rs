//! Shared types for the pulseboard realtime client and relay.

pub mod channel;
pub mod error;
pub mod models;
pub mod protocol;

pub use channel::*;
pub use error::*;
pub use models::*;
pub use protocol::*;
