//! Message and bus document types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Priority label used when the sender does not give one
pub const DEFAULT_PRIORITY: &str = "normal";

/// Current version of the persisted bus document
pub const BUS_FORMAT_VERSION: i32 = 1;

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Posted, not yet seen by the recipient
    Queued,
    /// Returned by a fetch for the recipient
    Delivered,
    /// A reply has been attached
    Replied,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let status = match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Replied => "replied",
        };
        write!(f, "{}", status)
    }
}

impl FromStr for MessageStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(MessageStatus::Queued),
            "delivered" => Ok(MessageStatus::Delivered),
            "replied" => Ok(MessageStatus::Replied),
            other => Err(crate::Error::Validation(format!(
                "unknown message status '{}' (expected queued, delivered or replied)",
                other
            ))),
        }
    }
}

/// Reply attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Agent that replied
    #[serde(rename = "from")]
    pub responder: String,
    /// Reply text
    pub text: String,
    /// When the reply was recorded
    pub timestamp: DateTime<Utc>,
}

impl Reply {
    /// Create a reply stamped with the current time
    pub fn new(responder: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            responder: responder.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A single message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identity, used for reply matching
    pub id: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Sender name
    #[serde(rename = "from")]
    pub sender: String,
    /// Recipient name, matched case-insensitively
    #[serde(rename = "to")]
    pub recipient: String,
    /// Message text
    #[serde(rename = "text")]
    pub body: String,
    /// Advisory priority label
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Delivery state
    pub status: MessageStatus,
    /// Reply, once the message has been answered
    #[serde(rename = "response", default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
}

fn default_priority() -> String {
    DEFAULT_PRIORITY.to_string()
}

impl Message {
    /// Create a new queued message with normal priority
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            sender: sender.into(),
            recipient: recipient.into(),
            body: body.into(),
            priority: default_priority(),
            status: MessageStatus::Queued,
            reply: None,
        }
    }

    /// Set the priority label
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Check that sender and recipient are usable names
    pub fn validate(&self) -> crate::Result<()> {
        let mut errors = Vec::new();
        if self.sender.trim().is_empty() {
            errors.push("sender must not be empty");
        }
        if self.recipient.trim().is_empty() {
            errors.push("recipient must not be empty");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Validation(errors.join("; ")))
        }
    }

    /// Whether this message is addressed to `name` (case-insensitive)
    pub fn is_addressed_to(&self, name: &str) -> bool {
        names_match(&self.recipient, name)
    }

    /// Whether the message is still waiting for its recipient
    pub fn is_queued(&self) -> bool {
        self.status == MessageStatus::Queued
    }

    /// Mark as delivered. Only queued messages move forward.
    pub fn mark_delivered(&mut self) -> bool {
        if self.status == MessageStatus::Queued {
            self.status = MessageStatus::Delivered;
            true
        } else {
            false
        }
    }

    /// Attach a reply and mark as replied
    ///
    /// A queued message has not reached its recipient yet; answering it would
    /// hide it from every later fetch, so it is refused.
    pub fn attach_reply(&mut self, reply: Reply) -> crate::Result<()> {
        if self.status == MessageStatus::Queued {
            return Err(crate::Error::Validation(format!(
                "message {} has not been delivered yet",
                self.id
            )));
        }
        self.status = MessageStatus::Replied;
        self.reply = Some(reply);
        Ok(())
    }
}

/// Case-insensitive agent name comparison
pub fn names_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Registration record for a listening agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Last time the agent started polling
    pub last_seen: DateTime<Utc>,
}

impl AgentRecord {
    pub fn now() -> Self {
        Self {
            last_seen: Utc::now(),
        }
    }
}

/// The persisted bus document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    #[serde(default = "default_version")]
    pub version: i32,
    /// Agent registrations by name
    #[serde(default)]
    pub agents: BTreeMap<String, AgentRecord>,
    /// Every message ever posted, in insertion order
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_version() -> i32 {
    BUS_FORMAT_VERSION
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            version: BUS_FORMAT_VERSION,
            agents: BTreeMap::new(),
            messages: Vec::new(),
        }
    }
}

impl BusState {
    /// Find a message by id
    pub fn find(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Find a message by id for mutation
    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Messages addressed to `recipient`, in insertion order
    pub fn addressed_to<'a>(&'a self, recipient: &'a str) -> impl Iterator<Item = &'a Message> {
        self.messages
            .iter()
            .filter(move |m| m.is_addressed_to(recipient))
    }

    /// Number of messages in each status
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for status in [
            MessageStatus::Queued,
            MessageStatus::Delivered,
            MessageStatus::Replied,
        ] {
            counts.insert(status.to_string(), 0);
        }
        for msg in &self.messages {
            *counts.entry(msg.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}
