//! Polling listeners that deliver bus messages to agent handlers

pub mod reactive;
pub mod service;
pub mod types;

pub use reactive::{reactive_handler, Responder};
pub use service::{listen, Listener};
pub use types::{handler_fn, next_backoff, MessageHandler};
