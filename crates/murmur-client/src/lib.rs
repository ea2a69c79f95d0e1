//! Murmur client library
//!
//! This crate provides the core functionality of the Murmur chat client:
//! the HTTP and push-channel transport, the stretch-grouped message timeline,
//! history paging, the send queue and session orchestration.

pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use session::ChatSession;
