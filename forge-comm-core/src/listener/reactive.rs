//! Agents that answer every message they receive

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::bus::{CommHub, Message};
use crate::listener::types::{handler_fn, MessageHandler};

/// Produces the reply text for an incoming message
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, message: &Message) -> crate::Result<String>;
}

/// Build a handler that replies to each message as `agent`
///
/// A responder error leaves the message delivered without a reply and is
/// reported to the listener like any other handler failure.
pub fn reactive_handler(
    hub: CommHub,
    agent: impl Into<String>,
    responder: Arc<dyn Responder>,
) -> MessageHandler {
    let agent = agent.into();
    handler_fn(move |msg: Message| {
        let hub = hub.clone();
        let agent = agent.clone();
        let responder = Arc::clone(&responder);
        async move {
            info!("[{}] {} says: {}", agent, msg.sender, msg.body);
            let text = responder.respond(&msg).await?;
            hub.reply(&agent, &msg, text.as_str()).await?;
            info!("[{}] Replied: {}", agent, text);
            Ok(())
        }
    })
}
