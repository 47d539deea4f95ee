//! Chat Console - Operator Console for the Chat Service
//!
//! Talks to the chat service's widget channel (or the main app routes) to
//! chat, inspect conversations and take them over manually.
//!
//! # Usage
//!
//! ```bash
//! # Chat with the bot (new conversation)
//! chat-console chat "hello"
//!
//! # Continue a conversation, grounded in the knowledge base
//! chat-console chat -c sdk_20240601100000 --knowledge "and the price?"
//!
//! # Operator takeover
//! chat-console --prefix /sdk list
//! chat-console --prefix /sdk mode sdk_20240601100000 on
//! chat-console --prefix /sdk reply sdk_20240601100000 "Hi, a human here."
//! chat-console --prefix /sdk watch sdk_20240601100000
//!
//! # Verbose logging
//! RUST_LOG=debug chat-console list
//! ```
//!
//! Replies and transcripts go to stdout; logs go to stderr.

mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use chat_core::{
    load_config, load_config_from_path, ChatBackend, ChatError, ChatSession, ClientConfig,
    ConfigOverrides, ConversationId, HttpChatBackend, ReplyOutcome, ReplyProgress, SendStatus,
};

/// Chat Console - chat, supervise and take over conversations
#[derive(Parser, Debug)]
#[command(name = "chat-console")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Chat service base URL
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    /// Route family prefix ("" for the main app, "/sdk" for the widget channel)
    #[arg(long, global = true, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Configuration file path
    #[arg(long, global = true, env = "CHAT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Refresh period for `watch`, in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, env = "CHAT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List conversations
    List,
    /// Print a conversation transcript
    Show {
        /// Conversation id
        id: String,
    },
    /// Delete a conversation
    Delete {
        /// Conversation id
        id: String,
    },
    /// Send a message and stream the reply
    Chat {
        /// Continue this conversation instead of starting a new one
        #[arg(short = 'c', long, value_name = "ID")]
        conversation: Option<String>,
        /// Ground the reply in the knowledge base
        #[arg(long)]
        knowledge: bool,
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Switch a conversation between automatic and manual replies
    Mode {
        /// Conversation id
        id: String,
        /// `on` hands the conversation to an operator
        state: Toggle,
    },
    /// Post an operator reply
    Reply {
        /// Conversation id
        id: String,
        /// Reply text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Follow a conversation live until Ctrl-C
    Watch {
        /// Conversation id
        id: String,
    },
    /// Check that the chat service is reachable
    Health,
    /// List available models
    Models,
    /// Select the model for later replies
    UseModel {
        /// Model name
        name: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

/// Initialize logging with the specified level, writing to stderr
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("chat_console={level},chat_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file and environment, then command-line overrides
fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.api_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if let Some(ref prefix) = args.prefix {
        overrides = overrides.with_route_prefix(prefix.clone());
    }
    if let Some(ms) = args.poll_interval_ms {
        overrides = overrides.with_poll_interval_ms(ms);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line option")?;

    Ok(config)
}

async fn chat(
    session: &mut ChatSession<HttpChatBackend>,
    conversation: Option<String>,
    knowledge: bool,
    text: &str,
) -> Result<()> {
    if let Some(id) = conversation {
        session
            .open_conversation(&ConversationId::new(id))
            .await
            .context("Failed to load conversation")?;
    }
    if knowledge {
        session.set_use_knowledge(true);
    }

    let mut out = std::io::stdout();
    match session.send_message(text).await {
        SendStatus::Ignored => anyhow::bail!("Nothing to send"),
        SendStatus::Suppressed {
            conversation_id,
            undelivered,
        } => {
            writeln!(
                out,
                "Conversation {conversation_id} is handled by an operator; not sent: {undelivered}"
            )?;
            return Ok(());
        }
        SendStatus::Failed(e) => {
            if let Some(last) = session.conversation().last() {
                writeln!(out, "{}", last.content)?;
            }
            return Err(e).context("Failed to reach the chat service");
        }
        SendStatus::Streaming => {}
    }

    while let Some(progress) = session.next_reply_progress().await {
        match progress {
            ReplyProgress::Assigned(id) => info!(conversation_id = %id, "New conversation"),
            ReplyProgress::Appended { fragment, .. } => {
                write!(out, "{fragment}")?;
                out.flush()?;
            }
            ReplyProgress::Finished(ReplyOutcome::Completed { conversation_id }) => {
                writeln!(out)?;
                if let Some(id) = conversation_id {
                    eprintln!("conversation: {id}");
                }
            }
            ReplyProgress::Finished(ReplyOutcome::Failed { error }) => {
                warn!(error = %error, "Reply interrupted");
                writeln!(out)?;
                if let Some(last) = session.conversation().last() {
                    writeln!(out, "{}", last.content)?;
                }
            }
            ReplyProgress::Finished(ReplyOutcome::Cancelled) => writeln!(out)?,
        }
    }
    Ok(())
}

async fn watch(session: &mut ChatSession<HttpChatBackend>, id: &ConversationId) -> Result<()> {
    let mut out = std::io::stdout();
    let mut view = render::TranscriptView::new();
    view.render(&mut out, session.conversation())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping watch");
                break;
            }
            applied = session.wait_poll_update() => {
                if applied {
                    view.render(&mut out, session.conversation())?;
                }
            }
        }
    }

    info!(conversation_id = %id, "Watch ended");
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;
    let backend = Arc::new(
        HttpChatBackend::from_config(&config).context("Failed to create chat client")?,
    );
    info!(
        endpoint = backend.endpoint(),
        source = %config.source(),
        "Using chat service"
    );

    let mut session = ChatSession::new(backend, config);
    let mut out = std::io::stdout();

    match args.command {
        Command::List => {
            let conversations = session.refresh_conversations().await?;
            render::conversation_list(&mut out, conversations)?;
        }
        Command::Show { id } => {
            session.open_conversation(&ConversationId::new(id)).await?;
            render::transcript(&mut out, session.conversation())?;
        }
        Command::Delete { id } => {
            let id = ConversationId::new(id);
            session.delete_conversation(&id).await?;
            writeln!(out, "Deleted {id}")?;
        }
        Command::Chat {
            conversation,
            knowledge,
            text,
        } => chat(&mut session, conversation, knowledge, &text.join(" ")).await?,
        Command::Mode { id, state } => {
            session.open_conversation(&ConversationId::new(id.clone())).await?;
            let manual = matches!(state, Toggle::On);
            session
                .set_manual(manual)
                .await
                .context("The service rejected the mode change")?;
            let mode = if manual { "manual" } else { "automatic" };
            writeln!(out, "Conversation {id} is now in {mode} mode")?;
        }
        Command::Reply { id, text } => {
            session.open_conversation(&ConversationId::new(id.clone())).await?;
            match session.submit_manual_reply(&text.join(" ")).await {
                Ok(()) => render::transcript(&mut out, session.conversation())?,
                Err(e @ ChatError::NotManual(_)) => {
                    return Err(e).context(format!(
                        "Switch the conversation to manual first: chat-console mode {id} on"
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Watch { id } => {
            let id = ConversationId::new(id);
            session.open_conversation(&id).await?;
            watch(&mut session, &id).await?;
        }
        Command::Health => {
            if !session.backend().health_check().await {
                anyhow::bail!("Chat service at {} is not reachable", session.backend().endpoint());
            }
            writeln!(out, "ok")?;
        }
        Command::Models => {
            let catalog = session.list_models().await?;
            render::models(&mut out, &catalog)?;
        }
        Command::UseModel { name } => {
            session.select_model(&name).await?;
            writeln!(out, "Now answering with {name}")?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
