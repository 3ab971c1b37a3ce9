//! Core types for forge-comm
//!
//! A small file-backed message bus shared by forge agents, plus the
//! polling listeners that deliver its messages to per-agent handlers.

pub mod bus;
pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod utils;

pub use bus::{CommHub, Message, MessageStatus};
pub use error::{Error, Result};
pub use listener::Listener;
