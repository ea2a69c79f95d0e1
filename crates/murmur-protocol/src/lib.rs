//! Wire types shared between the Murmur server and its clients.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
