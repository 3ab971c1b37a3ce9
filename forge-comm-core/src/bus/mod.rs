//! File-backed message bus
//!
//! Agents post messages addressed to other agents by name; recipients fetch
//! their queued messages and may attach a reply. The whole bus lives in one
//! JSON document that every operation loads, mutates and saves under an
//! exclusive lock.

pub mod hub;
pub mod lock;
pub mod message;
pub mod store;

pub use hub::CommHub;
pub use message::{AgentRecord, BusState, Message, MessageStatus, Reply, DEFAULT_PRIORITY};
pub use store::{BusStore, JsonFileStore, MemoryStore, Mutation};
