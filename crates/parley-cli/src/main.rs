use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use parley_db::{Database, StoreConfig};
use parley_types::NewMessage;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about = "Operate a parley message store", long_about = None)]
struct Args {
    /// Database file. Falls back to PARLEY_DB_PATH, then parley.db.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a local user
    AddUser { username: String },
    /// Remove a user and everything they sent or received
    RemoveUser { user_id: Uuid },
    /// Send a message, optionally as a reply
    Send {
        sender: Uuid,
        receiver: Uuid,
        body: String,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// Replace a message body, logging the previous one
    Edit {
        message_id: Uuid,
        body: String,
        #[arg(long)]
        by: Option<Uuid>,
    },
    /// Mark a message as read
    Read { message_id: Uuid },
    /// Delete a message; its replies become thread roots
    Delete { message_id: Uuid },
    /// Print a message and all replies below it
    Thread { message_id: Uuid },
    /// Print the prior bodies of a message
    History { message_id: Uuid },
    /// Print unread notifications for a user
    Notifications { user_id: Uuid },
    /// Print unread messages received by a user
    Unread { user_id: Uuid },
}

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Config
    let db_path = args
        .db
        .or_else(|| std::env::var("PARLEY_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("parley.db"));
    let config = config_from_env()?;

    let db = Database::open(&db_path, config)
        .with_context(|| format!("opening {}", db_path.display()))?;

    match args.command {
        Command::AddUser { username } => print(&db.register_user(&username)?),
        Command::RemoveUser { user_id } => {
            let summary = db.remove_user(user_id)?;
            info!("Removed user {}", user_id);
            print(&serde_json::json!({
                "messages": summary.messages,
                "history_entries": summary.history_entries,
                "notifications": summary.notifications,
                "orphaned_replies": summary.orphaned_replies,
            }))
        }
        Command::Send {
            sender,
            receiver,
            body,
            parent,
        } => {
            let mut new = NewMessage::new(sender, receiver, body);
            new.parent_id = parent;
            print(&db.messages().create(new)?)
        }
        Command::Edit {
            message_id,
            body,
            by,
        } => print(&db.messages().edit(message_id, &body, by)?),
        Command::Read { message_id } => {
            db.messages().mark_read(message_id)?;
            print(&db.messages().get(message_id)?)
        }
        Command::Delete { message_id } => {
            db.messages().delete(message_id)?;
            info!("Deleted message {}", message_id);
            Ok(())
        }
        Command::Thread { message_id } => print(&db.messages().get_thread(message_id)?),
        Command::History { message_id } => print(&db.history().history_for(message_id)?),
        Command::Notifications { user_id } => {
            let unread = db
                .notifications()
                .unread_for(user_id)
                .collect::<Result<Vec<_>, _>>()?;
            print(&unread)
        }
        Command::Unread { user_id } => print(&db.messages().unread_for(user_id)?),
    }
}

/// Store tunables from `PARLEY_*` variables; unset ones keep their defaults.
fn config_from_env() -> anyhow::Result<StoreConfig> {
    let defaults = StoreConfig::default();
    Ok(StoreConfig {
        edit_retries: env_or("PARLEY_EDIT_RETRIES", defaults.edit_retries)?,
        max_body_len: env_or("PARLEY_MAX_BODY_LEN", defaults.max_body_len)?,
        unread_page_size: env_or("PARLEY_UNREAD_PAGE_SIZE", defaults.unread_page_size)?,
        unread_cache_capacity: env_or(
            "PARLEY_UNREAD_CACHE_CAPACITY",
            defaults.unread_cache_capacity,
        )?,
        reader_pool_size: env_or("PARLEY_READER_POOL_SIZE", defaults.reader_pool_size)?,
        busy_timeout_ms: env_or("PARLEY_BUSY_TIMEOUT_MS", defaults.busy_timeout_ms)?,
    })
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn print<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
