//! CLI entry point for forge-comm

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use clap::{Parser, Subcommand};
use console::style;
use forge_comm_core::bus::{CommHub, Message, MessageStatus, DEFAULT_PRIORITY};
use forge_comm_core::config::{Config, ConfigLoader};
use forge_comm_core::listener::{handler_fn, reactive_handler, Listener, MessageHandler, Responder};
use forge_comm_core::logging::init_logging;
use forge_comm_core::utils::{expand_tilde, truncate};
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "forge-comm")]
#[command(about = "File-backed message bus for cooperating agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Bus file, overriding the configured path
    #[arg(short, long, global = true)]
    bus: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a message to another agent
    Post {
        /// Sending agent
        #[arg(short, long)]
        from: String,
        /// Receiving agent
        #[arg(short, long)]
        to: String,
        /// Priority label
        #[arg(short, long, default_value = DEFAULT_PRIORITY)]
        priority: String,
        /// Message text
        text: String,
    },
    /// Take every queued message for an agent
    Fetch {
        /// Agent name (case-insensitive)
        name: String,
        /// Print messages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer a message by id
    Reply {
        /// Responding agent
        #[arg(short, long)]
        from: String,
        /// Message id
        id: Uuid,
        /// Reply text
        text: String,
    },
    /// Show messages on the bus without delivering them
    List {
        /// Only messages addressed to this agent
        #[arg(short, long)]
        to: Option<String>,
        /// Only messages in this status (queued, delivered, replied)
        #[arg(short, long)]
        status: Option<MessageStatus>,
        /// Print messages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show registered agents
    Agents,
    /// Poll the bus as an agent until Ctrl+C
    Listen {
        /// Agent name
        name: String,
        /// Delay between polls in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
        /// Answer every message with this text
        #[arg(short, long)]
        reply: Option<String>,
    },
    /// Show status information
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    let mut config = config_loader.load()?;
    if let Some(bus) = cli.bus {
        config.bus.path = bus.to_string_lossy().into_owned();
    }

    let log_dir = config_loader.log_dir(&config);
    std::fs::create_dir_all(&log_dir)?;
    let _log_guard = init_logging(&config.logging, &log_dir)?;

    let hub = CommHub::from_config(&config.bus);

    match cli.command {
        Commands::Post {
            from,
            to,
            priority,
            text,
        } => {
            info!("Posting message from {} to {}", from, to);
            run_post(&hub, &from, &to, &priority, &text).await?;
        }
        Commands::Fetch { name, json } => {
            info!("Fetching messages for {}", name);
            run_fetch(&hub, &name, json).await?;
        }
        Commands::Reply { from, id, text } => {
            info!("Replying to {} as {}", id, from);
            run_reply(&hub, &from, id, &text).await?;
        }
        Commands::List { to, status, json } => {
            run_list(&hub, to, status, json).await?;
        }
        Commands::Agents => {
            run_agents(&hub).await?;
        }
        Commands::Listen {
            name,
            interval_ms,
            reply,
        } => {
            info!("Starting listener for {}", name);
            run_listen(&config, hub, &name, interval_ms, reply).await?;
        }
        Commands::Status => {
            run_status(&config_loader, &config, &hub).await?;
        }
    }

    Ok(())
}

async fn run_post(hub: &CommHub, from: &str, to: &str, priority: &str, text: &str) -> Result<()> {
    let message = hub.post_with_priority(from, to, text, priority).await?;
    println!(
        "{} {} -> {}",
        style("Posted").green().bold(),
        message.sender,
        message.recipient
    );
    println!("  ID: {}", message.id);
    Ok(())
}

async fn run_fetch(hub: &CommHub, name: &str, json: bool) -> Result<()> {
    let messages = hub.fetch(name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!("No new messages for {}.", name);
        return Ok(());
    }

    println!(
        "{}",
        style(format!("{} new message(s) for {}", messages.len(), name))
            .bold()
            .cyan()
    );
    for message in &messages {
        print_message(message);
    }
    Ok(())
}

async fn run_reply(hub: &CommHub, from: &str, id: Uuid, text: &str) -> Result<()> {
    let message = hub.reply_by_id(from, id, text).await?;
    println!(
        "{} {} ({} -> {})",
        style("Replied to").green().bold(),
        message.id,
        message.sender,
        message.recipient
    );
    Ok(())
}

async fn run_list(
    hub: &CommHub,
    to: Option<String>,
    status: Option<MessageStatus>,
    json: bool,
) -> Result<()> {
    let state = hub.snapshot().await?;
    let messages: Vec<&Message> = state
        .messages
        .iter()
        .filter(|m| to.as_deref().map_or(true, |name| m.is_addressed_to(name)))
        .filter(|m| status.map_or(true, |s| m.status == s))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    for message in messages {
        print_message(message);
    }
    Ok(())
}

async fn run_agents(hub: &CommHub) -> Result<()> {
    let agents = hub.agents().await?;
    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(());
    }

    println!("{}", style("Registered agents").bold().cyan());
    for (name, record) in &agents {
        println!(
            "  {}: last seen {}",
            style(name).bold(),
            record.last_seen.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Replies with the same text to every message
struct FixedReply(String);

#[async_trait]
impl Responder for FixedReply {
    async fn respond(&self, _message: &Message) -> forge_comm_core::Result<String> {
        Ok(self.0.clone())
    }
}

async fn run_listen(
    config: &Config,
    hub: CommHub,
    name: &str,
    interval_ms: Option<u64>,
    reply: Option<String>,
) -> Result<()> {
    let handler: MessageHandler = match reply {
        Some(text) => reactive_handler(hub.clone(), name, Arc::new(FixedReply(text))),
        None => handler_fn(|message: Message| async move {
            print_message(&message);
            Ok(())
        }),
    };

    let mut listener = Listener::new(name, hub, handler).with_config(&config.listener);
    if let Some(ms) = interval_ms {
        listener = listener.with_interval(Duration::from_millis(ms));
    }

    listener.start().await;
    println!(
        "{}",
        style(format!("Listening as {}. Press Ctrl+C to stop.", name)).green()
    );

    tokio::signal::ctrl_c().await?;
    println!("\n{}", style("Shutting down...").yellow());
    listener.stop().await;

    println!("{}", style("Listener stopped.").green());
    Ok(())
}

async fn run_status(loader: &ConfigLoader, config: &Config, hub: &CommHub) -> Result<()> {
    let bus_path = expand_tilde(&config.bus.path);

    println!("{}", style("Forge Comm Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config directory: {}", loader.config_dir().display());
    println!("  Bus file: {}", bus_path.display());
    println!("  Poll interval: {}ms", config.listener.interval_ms);
    println!("  Log directory: {}", loader.log_dir(config).display());
    println!();

    println!("{}", style("Bus:").bold());
    if !bus_path.exists() {
        println!("  {}", style("not created yet").dim());
        return Ok(());
    }

    let state = hub.snapshot().await?;
    println!("  Messages: {}", state.messages.len());
    for (status, count) in state.status_counts() {
        println!("    {}: {}", status, count);
    }
    println!("  Agents: {}", state.agents.len());
    Ok(())
}

fn print_message(message: &Message) {
    let status = match message.status {
        MessageStatus::Queued => style(message.status.to_string()).yellow(),
        MessageStatus::Delivered => style(message.status.to_string()).cyan(),
        MessageStatus::Replied => style(message.status.to_string()).green(),
    };
    println!(
        "{} [{}] {} -> {} ({}, {})",
        style(message.id).dim(),
        status,
        style(&message.sender).bold(),
        style(&message.recipient).bold(),
        message.priority,
        message
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!("  {}", truncate(&message.body, 200));
    if let Some(reply) = &message.reply {
        println!("  {} {}: {}", style("reply").green(), reply.responder, reply.text);
    }
}
