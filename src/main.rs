//! chat-sync - command line client for the care team chat service
//!
//! Lists conversations, watches the unread count, and opens a conversation for
//! live reading and sending.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use chat_sync::api::ChatApi;
use chat_sync::bus::InvalidationBus;
use chat_sync::client::HttpChatApi;
use chat_sync::config::Config;
use chat_sync::list::ConversationListController;
use chat_sync::model::{Conversation, Participant};
use chat_sync::session::{ConversationSession, SessionConfig};
use chat_sync::store::UnreadStore;
use chat_sync::timeline::{build_local_timeline, MessageEntry, TimelineEntry};
use chat_sync::unread::conversation_has_unread;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Care team chat client
#[derive(Parser)]
#[command(name = "chat-sync")]
#[command(about = "Read and send care team chat messages from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, most recent first
    Chats {
        /// Only show conversations matching this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print the number of unread conversations
    Unread,

    /// Print the unread count every time it changes
    WatchUnread,

    /// Re-print the conversation list on every refresh
    WatchList,

    /// Open a conversation: print new messages, send each line typed on stdin
    Open {
        /// Conversation id
        id: i64,
    },

    /// Send one message
    Send {
        /// Conversation id
        id: i64,

        /// Message text
        text: String,
    },

    /// Create a conversation with the given participants
    Create {
        /// Conversation name
        name: String,

        /// Participant user ids
        #[arg(required = true)]
        participants: Vec<i64>,
    },

    /// Add participants to a conversation
    AddParticipants {
        /// Conversation id
        id: i64,

        /// Participant user ids
        #[arg(required = true)]
        participants: Vec<i64>,
    },

    /// Search users by name or email
    SearchUsers {
        /// At least three characters
        query: String,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::load().context("loading configuration")?;

    if let Commands::Config { init } = cli.command {
        return cmd_config(&config, init);
    }

    let api: Arc<dyn ChatApi> = Arc::new(HttpChatApi::new(&config));

    match cli.command {
        Commands::Chats { search } => cmd_chats(api, &config, search).await,
        Commands::Unread => cmd_unread(api, &config).await,
        Commands::WatchUnread => cmd_watch_unread(api, &config).await,
        Commands::WatchList => cmd_watch_list(api, &config).await,
        Commands::Open { id } => cmd_open(api, &config, id).await,
        Commands::Send { id, text } => cmd_send(api, &config, id, &text).await,
        Commands::Create { name, participants } => {
            cmd_create(api, &config, &name, &participants).await
        }
        Commands::AddParticipants { id, participants } => {
            cmd_add_participants(api, &config, id, &participants).await
        }
        Commands::SearchUsers { query } => cmd_search_users(api, &config, &query).await,
        Commands::Config { .. } => Ok(()),
    }
}

// ============================================================================
// CLI Commands
// ============================================================================

async fn cmd_chats(
    api: Arc<dyn ChatApi>,
    config: &Config,
    search: Option<String>,
) -> anyhow::Result<()> {
    let mut list = ConversationListController::from_config(api, config);
    list.refresh().await;
    if let Some(message) = list.error() {
        bail!("{}", message);
    }

    if let Some(term) = search {
        list.set_search_term(term);
    }

    let visible = list.visible();
    if visible.is_empty() {
        println!("No conversations");
        return Ok(());
    }

    for conversation in visible {
        println!("{}", format_conversation(conversation, config.current_user_id));
    }
    Ok(())
}

async fn cmd_unread(api: Arc<dyn ChatApi>, config: &Config) -> anyhow::Result<()> {
    let store = UnreadStore::with_poll_interval(
        api,
        InvalidationBus::new(),
        config.unread_poll_interval(),
    );
    store.refresh(true).await;

    let snapshot = store.snapshot();
    if let Some(message) = &snapshot.error {
        bail!("{}", message);
    }
    println!("{}", snapshot.unread_count);
    Ok(())
}

async fn cmd_watch_unread(api: Arc<dyn ChatApi>, config: &Config) -> anyhow::Result<()> {
    let store = UnreadStore::with_poll_interval(
        api,
        InvalidationBus::new(),
        config.unread_poll_interval(),
    );

    let changed = Arc::new(Notify::new());
    let _subscription = store.subscribe({
        let changed = changed.clone();
        move || changed.notify_one()
    });
    info!(
        "Watching unread count every {}ms, Ctrl-C to stop",
        config.unread_poll_interval_ms
    );

    let mut last_printed: Option<usize> = None;
    loop {
        tokio::select! {
            _ = changed.notified() => {
                let snapshot = store.snapshot();
                if snapshot.is_loading {
                    continue;
                }
                if let Some(message) = &snapshot.error {
                    warn!("{}", message);
                }
                if last_printed != Some(snapshot.unread_count) {
                    println!("{} unread", snapshot.unread_count);
                    last_printed = Some(snapshot.unread_count);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn cmd_watch_list(api: Arc<dyn ChatApi>, config: &Config) -> anyhow::Result<()> {
    let mut list = ConversationListController::from_config(api, config);
    let period = config.list_refresh_interval();
    if period.is_zero() {
        bail!("list_refresh_interval_ms must be greater than zero");
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                list.refresh().await;
                if let Some(message) = list.error() {
                    warn!("{}", message);
                    continue;
                }
                println!("--- {} conversations, {} unread ---", list.conversations().len(), list.unread_count());
                for conversation in list.visible() {
                    println!("{}", format_conversation(conversation, config.current_user_id));
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn cmd_open(api: Arc<dyn ChatApi>, config: &Config, id: i64) -> anyhow::Result<()> {
    let conversation = api
        .get_conversation(id)
        .await
        .with_context(|| format!("opening conversation {}", id))?;
    println!("== {} ==", conversation.display_label(config.current_user_id));

    let session = ConversationSession::open(
        api,
        InvalidationBus::new(),
        &conversation,
        SessionConfig::from(config),
    );
    let mut changes = session.changes();
    let mut printer = TimelinePrinter::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = session.snapshot();
                if let Some(message) = &snapshot.error {
                    warn!("{}", message);
                }
                let timeline = build_local_timeline(&snapshot.messages, config.current_user_id);
                for line in printer.new_lines(&timeline) {
                    println!("{}", line);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = session.send_text(&line).await {
                    warn!("{}", e.user_message("Could not send the message."));
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

async fn cmd_send(
    api: Arc<dyn ChatApi>,
    config: &Config,
    id: i64,
    text: &str,
) -> anyhow::Result<()> {
    let conversation = api.get_conversation(id).await?;
    let session = ConversationSession::new(
        api,
        InvalidationBus::new(),
        &conversation,
        SessionConfig::from(config),
    );

    match session.send_text(text).await {
        Ok(message) => {
            debug!("Sent message {}", message.id);
            println!("Sent message {}", message.id);
            Ok(())
        }
        Err(e) => bail!("{}", e.user_message("Could not send the message.")),
    }
}

async fn cmd_create(
    api: Arc<dyn ChatApi>,
    config: &Config,
    name: &str,
    participants: &[i64],
) -> anyhow::Result<()> {
    let mut list = ConversationListController::from_config(api, config);
    match list.create_conversation(name, participants).await {
        Ok(created) => {
            println!("{}", format_conversation(&created, config.current_user_id));
            Ok(())
        }
        Err(e) => bail!(
            "{}",
            e.user_message("Could not create the conversation right now. Try again.")
        ),
    }
}

async fn cmd_add_participants(
    api: Arc<dyn ChatApi>,
    config: &Config,
    id: i64,
    participants: &[i64],
) -> anyhow::Result<()> {
    let mut list = ConversationListController::from_config(api, config);
    match list.add_participants(id, participants).await {
        Ok(updated) => {
            println!("{}", format_conversation(&updated, config.current_user_id));
            Ok(())
        }
        Err(e) => bail!("{}", e.user_message("Could not add participants.")),
    }
}

async fn cmd_search_users(
    api: Arc<dyn ChatApi>,
    config: &Config,
    query: &str,
) -> anyhow::Result<()> {
    let list = ConversationListController::from_config(api, config);
    let users = match list.search_users(query).await {
        Ok(users) => users,
        Err(e) => bail!("{}", e.user_message("Could not search users.")),
    };

    if users.is_empty() {
        println!("No users found (queries need at least {} characters)", config.min_user_search_length);
    }
    for user in users {
        println!("{}", format_user(&user));
    }
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        let path = Config::default_path().context("no config directory on this system")?;
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            Config::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    let mut shown = config.clone();
    if shown.access_token.is_some() {
        shown.access_token = Some("<set>".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn format_conversation(conversation: &Conversation, current_user_id: Option<i64>) -> String {
    let marker = if conversation_has_unread(conversation) { "*" } else { " " };
    let last = conversation
        .last_message
        .as_ref()
        .map(|m| format!(" - {}", truncate(&m.body, 60)))
        .unwrap_or_default();

    format!(
        "{} {:>6}  {}{}",
        marker,
        conversation.id,
        conversation.display_label(current_user_id),
        last
    )
}

fn format_user(user: &Participant) -> String {
    let mut line = format!("{:>6}  {}", user.id, user.name);
    if let Some(email) = &user.email {
        line.push_str(&format!(" <{}>", email));
    }
    if let Some(role) = &user.role {
        line.push_str(&format!(" [{}]", role));
    }
    line
}

fn format_message(entry: &MessageEntry) -> String {
    let body = &entry.message.body;
    if entry.is_system {
        return format!("[{}] * {}", entry.time_label, body);
    }

    let who = if entry.is_mine {
        "You".to_string()
    } else if entry.show_sender_name {
        entry
            .message
            .sender
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default()
    } else {
        String::new()
    };

    if who.is_empty() {
        format!("[{}]   {}", entry.time_label, body)
    } else {
        format!("[{}] {}: {}", entry.time_label, who, body)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// Prints each message once, with the separator of its day
#[derive(Default)]
struct TimelinePrinter {
    printed: HashSet<i64>,
    last_separator: Option<String>,
}

impl TimelinePrinter {
    fn new_lines(&mut self, timeline: &[TimelineEntry]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut separator: Option<(&str, &str)> = None;

        for entry in timeline {
            match entry {
                TimelineEntry::DateSeparator { key, label } => {
                    separator = Some((key.as_str(), label.as_str()));
                }
                TimelineEntry::Message(message) => {
                    if !self.printed.insert(message.message.id) {
                        continue;
                    }
                    if let Some((key, label)) = separator {
                        if self.last_separator.as_deref() != Some(key) {
                            lines.push(format!("-- {} --", label));
                            self.last_separator = Some(key.to_string());
                        }
                    }
                    lines.push(format_message(message));
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_sync::model::Message;
    use chat_sync::timeline::build_timeline;
    use chrono::{TimeZone, Utc};

    fn person(id: i64, name: &str) -> Participant {
        Participant {
            id,
            name: name.to_string(),
            email: None,
            role: None,
        }
    }

    fn message(id: i64, sender: &Participant, sent_at: &str) -> Message {
        Message {
            id,
            sender: Some(sender.clone()),
            body: format!("message {}", id),
            sent_at: Some(sent_at.to_string()),
            kind: None,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line\nbreak", 20), "line break");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_format_user() {
        let mut user = person(7, "Ana");
        user.email = Some("ana@example.com".to_string());
        user.role = Some("DOCTOR".to_string());
        assert_eq!(format_user(&user), "     7  Ana <ana@example.com> [DOCTOR]");
    }

    #[test]
    fn test_printer_prints_each_message_once() {
        let ana = person(2, "Ana");
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut printer = TimelinePrinter::default();

        let first = vec![message(1, &ana, "2025-03-10T09:00:00")];
        let lines = printer.new_lines(&build_timeline(&first, Some(1), &now));
        assert_eq!(lines, vec!["-- Today --", "[09:00] Ana: message 1"]);

        let second = vec![
            message(1, &ana, "2025-03-10T09:00:00"),
            message(2, &ana, "2025-03-10T09:01:00"),
        ];
        let lines = printer.new_lines(&build_timeline(&second, Some(1), &now));
        assert_eq!(lines, vec!["[09:01]   message 2"]);
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["chat-sync", "create", "Night shift", "2", "3"]).unwrap();
        match cli.command {
            Commands::Create { name, participants } => {
                assert_eq!(name, "Night shift");
                assert_eq!(participants, vec![2, 3]);
            }
            _ => panic!("expected create"),
        }

        assert!(Cli::try_parse_from(["chat-sync", "add-participants", "4"]).is_err());
    }
}
