//! Bus operations shared by every agent

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::message::{AgentRecord, BusState, Message, Reply, DEFAULT_PRIORITY};
use super::store::{BusStore, JsonFileStore};
use crate::config::BusConfig;
use crate::{Error, Result};

/// Handle to the shared message bus
///
/// Cloning is cheap; clones share the same store and therefore the same
/// exclusive scope.
#[derive(Clone)]
pub struct CommHub {
    store: Arc<dyn BusStore>,
}

impl CommHub {
    /// Create a hub over any store
    pub fn new(store: Arc<dyn BusStore>) -> Self {
        Self { store }
    }

    /// Create a hub over the JSON bus file described by `config`
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(Arc::new(JsonFileStore::from_config(config)))
    }

    /// Run `f` against the bus inside one load → mutate → save scope
    async fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut BusState) -> Result<T> + Send,
        T: Send,
    {
        let mut output = None;
        self.store
            .mutate(Box::new(|state| {
                output = Some(f(state)?);
                Ok(())
            }))
            .await?;
        output.ok_or_else(|| Error::Internal("bus mutation produced no result".to_string()))
    }

    /// Post a message with the default priority
    pub async fn post(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message> {
        self.post_with_priority(sender, recipient, body, DEFAULT_PRIORITY)
            .await
    }

    /// Post a message with an advisory priority label
    pub async fn post_with_priority(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
        priority: impl Into<String>,
    ) -> Result<Message> {
        let message = Message::new(sender, recipient, body).with_priority(priority);
        message.validate()?;

        let posted = message.clone();
        self.transact(move |state| {
            state.messages.push(message);
            Ok(())
        })
        .await?;

        debug!(
            "Posted {} from {} to {} ({})",
            posted.id, posted.sender, posted.recipient, posted.priority
        );
        Ok(posted)
    }

    /// Take every queued message for `recipient`, marking each delivered
    ///
    /// Returned messages keep insertion order and carry their new status.
    pub async fn fetch(&self, recipient: &str) -> Result<Vec<Message>> {
        let inbox = self
            .transact(|state| {
                let mut inbox = Vec::new();
                for msg in state
                    .messages
                    .iter_mut()
                    .filter(|m| m.is_queued() && m.is_addressed_to(recipient))
                {
                    msg.mark_delivered();
                    inbox.push(msg.clone());
                }
                Ok(inbox)
            })
            .await?;

        if !inbox.is_empty() {
            debug!("Delivered {} messages to {}", inbox.len(), recipient);
        }
        Ok(inbox)
    }

    /// Attach a reply to a message previously returned by [`fetch`](Self::fetch)
    pub async fn reply(
        &self,
        responder: &str,
        original: &Message,
        text: impl Into<String>,
    ) -> Result<Message> {
        self.reply_by_id(responder, original.id, text).await
    }

    /// Attach a reply to the message with `id`
    ///
    /// Fails with [`Error::NotFound`] when no message on the bus has that id,
    /// and with [`Error::Validation`] while the message is still queued.
    pub async fn reply_by_id(
        &self,
        responder: &str,
        id: Uuid,
        text: impl Into<String>,
    ) -> Result<Message> {
        if responder.trim().is_empty() {
            return Err(Error::Validation("responder must not be empty".to_string()));
        }

        let reply = Reply::new(responder, text);
        let updated = self
            .transact(move |state| {
                let msg = state
                    .find_mut(id)
                    .ok_or_else(|| Error::NotFound(format!("message {} is not on the bus", id)))?;
                msg.attach_reply(reply)?;
                Ok(msg.clone())
            })
            .await?;

        debug!("{} replied to {}", responder, id);
        Ok(updated)
    }

    /// Record that `name` is listening
    pub async fn register_agent(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.transact(move |state| {
            state.agents.insert(name, AgentRecord::now());
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Registered agents and when they were last seen
    pub async fn agents(&self) -> Result<BTreeMap<String, AgentRecord>> {
        Ok(self.store.load().await?.agents)
    }

    /// The full bus document, unchanged
    pub async fn snapshot(&self) -> Result<BusState> {
        self.store.load().await
    }

    /// Look up a single message
    pub async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.store.load().await?.find(id).cloned())
    }
}

impl std::fmt::Debug for CommHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommHub").finish_non_exhaustive()
    }
}
