//! chat-sync - client-side synchronization for care team chat
//!
//! Keeps unread state, the conversation list and the open conversation in step
//! with the chat service by polling, with a shared invalidation signal so a
//! read acknowledgement refreshes every unread badge at once.

pub mod api;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod list;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod model;
pub mod session;
pub mod store;
pub mod timeline;
pub mod timestamp;
pub mod unread;

pub use error::{Error, Result};
