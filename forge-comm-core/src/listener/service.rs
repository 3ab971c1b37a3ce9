//! Background polling loop for one agent

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{CommHub, Message};
use crate::config::ListenerConfig;
use crate::listener::types::{next_backoff, MessageHandler};
use crate::{Error, Result};

/// Polls the bus for one agent and hands each delivered message to a handler
///
/// The loop runs as a tokio task between [`start`](Self::start) and
/// [`stop`](Self::stop). Handler failures and storage errors are logged and
/// never end the loop; only cancellation does.
pub struct Listener {
    agent: String,
    hub: CommHub,
    handler: MessageHandler,
    interval: Duration,
    max_backoff: Duration,
    shutdown: CancellationToken,
    running: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    /// Create a listener with the default polling configuration
    pub fn new(agent: impl Into<String>, hub: CommHub, handler: MessageHandler) -> Self {
        let defaults = ListenerConfig::default();
        Self {
            agent: agent.into(),
            hub,
            handler,
            interval: Duration::from_millis(defaults.interval_ms),
            max_backoff: Duration::from_millis(defaults.max_backoff_ms),
            shutdown: CancellationToken::new(),
            running: Mutex::new(None),
        }
    }

    /// Apply polling settings from configuration
    pub fn with_config(mut self, config: &ListenerConfig) -> Self {
        self.interval = Duration::from_millis(config.interval_ms);
        self.max_backoff = Duration::from_millis(config.max_backoff_ms);
        self
    }

    /// Set the delay between polls
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the cap for the delay after storage failures
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Tie the listener to an outer shutdown token; cancelling it stops the loop
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Name the listener polls for
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Start polling in the background. Returns immediately.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                debug!("[{}] Listener already running", self.agent);
                return;
            }
        }

        let cancel = self.shutdown.child_token();
        let worker = ListenerLoop {
            agent: self.agent.clone(),
            hub: self.hub.clone(),
            handler: self.handler.clone(),
            interval: self.interval,
            max_backoff: self.max_backoff,
        };
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move { worker.run(loop_cancel).await });

        *running = Some(RunningLoop { cancel, task });
        info!(
            "[{}] Listener started (every {}ms)",
            self.agent,
            self.interval.as_millis()
        );
    }

    /// Signal the loop to stop and wait for it to finish
    pub async fn stop(&self) {
        let current = self.running.lock().await.take();
        let Some(current) = current else {
            return;
        };

        current.cancel.cancel();
        if let Err(e) = current.task.await {
            error!("[{}] Listener task failed: {}", self.agent, e);
        }
    }

    /// Check if the loop is running
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|current| !current.task.is_finished())
            .unwrap_or(false)
    }

    /// Fetch and handle messages once, inline
    ///
    /// Returns the number of messages whose handler succeeded. Storage errors
    /// from the fetch are returned; handler errors are only logged.
    pub async fn poll_once(&self) -> Result<usize> {
        poll(&self.hub, &self.agent, &self.handler).await
    }

    /// Get listener status
    pub async fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "agent": self.agent,
            "running": self.is_running().await,
            "interval_ms": millis(self.interval),
            "max_backoff_ms": millis(self.max_backoff),
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(current) = self.running.get_mut().take() {
            current.cancel.cancel();
            debug!("[{}] Listener dropped while running, cancelling", self.agent);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Start a listener for `agent` that polls every `interval`
///
/// The returned listener is already running; call [`Listener::stop`] to end it.
pub async fn listen(
    hub: CommHub,
    agent: impl Into<String>,
    handler: MessageHandler,
    interval: Duration,
) -> Listener {
    let listener = Listener::new(agent, hub, handler).with_interval(interval);
    listener.start().await;
    listener
}

/// State moved into the spawned task
struct ListenerLoop {
    agent: String,
    hub: CommHub,
    handler: MessageHandler,
    interval: Duration,
    max_backoff: Duration,
}

impl ListenerLoop {
    async fn run(self, cancel: CancellationToken) {
        if let Err(e) = self.hub.register_agent(&self.agent).await {
            warn!("[{}] Failed to register agent: {}", self.agent, e);
        }
        info!("[{}] Listening for messages", self.agent);

        let mut delay = self.interval;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match poll(&self.hub, &self.agent, &self.handler).await {
                Ok(_) => delay = self.interval,
                Err(e) => {
                    delay = next_backoff(delay, self.interval, self.max_backoff);
                    warn!(
                        "[{}] Poll failed, retrying in {}ms: {}",
                        self.agent,
                        delay.as_millis(),
                        e
                    );
                }
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        info!("[{}] Listener stopped", self.agent);
    }
}

async fn poll(hub: &CommHub, agent: &str, handler: &MessageHandler) -> Result<usize> {
    let inbox = hub.fetch(agent).await?;
    let mut handled = 0;

    // Every fetched message is already delivered, so all of them are handled
    for msg in inbox {
        match dispatch(handler, msg).await {
            Ok(()) => handled += 1,
            Err(e) => error!("[{}] {}", agent, e),
        }
    }
    Ok(handled)
}

async fn dispatch(handler: &MessageHandler, msg: Message) -> Result<()> {
    let id = msg.id;
    let outcome = AssertUnwindSafe(async move { handler(msg).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Handler(format!("message {}: {}", id, e))),
        Err(panic) => Err(Error::Handler(format!(
            "message {} panicked: {}",
            id,
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
