//! Producers that feed the active timeline: live updates, history pages and
//! the outgoing send queue.

pub mod dispatch;
pub mod pagination;
pub mod send_queue;

pub use dispatch::{DispatchEffect, apply_event};
pub use pagination::{LoadOutcome, PageRequest, PaginationLoader, ScrollTrigger};
pub use send_queue::{MAX_MESSAGE_LEN, SendOutcome, SendQueue, SendRequest, read_attachment};
