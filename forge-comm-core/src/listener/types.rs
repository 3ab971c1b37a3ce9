//! Listener handler types

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::Message;

/// Callback invoked for every message delivered to a listener
pub type MessageHandler = Arc<
    dyn Fn(Message) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send>> + Send + Sync,
>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

/// Delay before the next poll after a failed one
///
/// Doubles the current delay, never dropping below `base` nor exceeding `max`.
pub fn next_backoff(current: Duration, base: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).max(base).min(max.max(base))
}
