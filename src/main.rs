//! parent-feed CLI - inspect and manage a parent's notification feed
//!
//! Reads and writes the same local store the app uses, and can refresh the
//! feed from the hosted backend when one is configured.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;

use parent_feed_lib::backend::{KvStore, LocalChangeFeed, PostgrestClient, SqliteKvStore, StaticIdentity};
use parent_feed_lib::config::{self, FeedConfig};
use parent_feed_lib::engine::{spawn_feed, FeedHandle};
use parent_feed_lib::models::{Identity, NotificationRecord};
use parent_feed_lib::utils::{format_utc, now_utc, relative_time};
use parent_feed_lib::AppState;

const MAIN_HELP: &str = r##"
parent-feed - the merged notification feed of a parent account

Scores, attendance marks and announcements concerning a parent's children
are merged into one feed, newest first. Read flags are kept per parent in
the local store configured in ~/.parent-feed/config.json.

QUICK START:
  1. List the feed:           parent-feed --parent <id> list
  2. Count unread entries:    parent-feed --parent <id> unread
  3. Mark one read:           parent-feed --parent <id> mark-read <notification_id>
  4. Pull from the backend:   parent-feed --parent <id> refresh
"##;

const EXAMPLES_HELP: &str = r##"
EXAMPLES:
  parent-feed --parent p-42 list
  parent-feed --parent p-42 list --unread-only
  parent-feed --parent p-42 mark-read score-17-1718000000000
  parent-feed --parent p-42 mark-all-read
  parent-feed --parent p-42 clear --yes
  parent-feed --parent p-42 --format json refresh
  parent-feed config

LOGGING:
  Set RUST_LOG (e.g. RUST_LOG=parent_feed_lib=debug) to see feed activity.
"##;

/// parent-feed - inspect and manage a parent's notification feed
#[derive(Parser)]
#[command(name = "parent-feed")]
#[command(author, version)]
#[command(about = "Inspect and manage a parent's notification feed")]
#[command(long_about = MAIN_HELP)]
#[command(after_help = EXAMPLES_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Parent account whose feed to use
    #[arg(short, long, global = true)]
    parent: Option<String>,

    /// Output format: json, pretty, plain
    #[arg(short, long, default_value = "pretty", global = true)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    /// JSON output (compact)
    Json,
    /// JSON output (pretty-printed)
    #[default]
    Pretty,
    /// Plain text output
    Plain,
}

#[derive(Subcommand)]
enum Commands {
    /// List the feed, newest first
    List {
        /// Only show unread notifications
        #[arg(long)]
        unread_only: bool,
    },

    /// Show the unread count
    Unread,

    /// Mark one notification read
    MarkRead {
        /// Notification ID (e.g. score-17-1718000000000)
        id: String,
    },

    /// Mark every notification read
    MarkAllRead,

    /// Delete the feed and every read flag for the parent
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Fetch recent rows from the backend and merge them into the feed
    Refresh,

    /// Show the active configuration
    Config,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parent_feed_lib=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = run(cli.command, cli.parent).await;

    match result {
        Ok(output) => {
            print_output(&output, cli.format);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands, parent: Option<String>) -> Result<Value> {
    let config = config::load_config().context("Failed to load configuration")?;

    if let Commands::Config = command {
        return Ok(config_summary(&config));
    }

    let parent_id = parent.ok_or_else(|| anyhow::anyhow!("--parent <id> is required"))?;
    let kv: Arc<dyn KvStore> = Arc::new(
        SqliteKvStore::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.database_path))?,
    );

    match command {
        Commands::List { unread_only } => {
            let feed = open_feed(&parent_id, kv).await;
            let records = feed.feed().await;
            let now = now_utc();
            let items: Vec<Value> = records
                .iter()
                .filter(|r| !unread_only || !r.read)
                .map(|r| record_view(r, now))
                .collect();
            Ok(json!({
                "parent_id": parent_id,
                "notifications": items,
                "count": items.len(),
                "unread_count": feed.unread_count().await,
            }))
        }
        Commands::Unread => {
            let feed = open_feed(&parent_id, kv).await;
            Ok(json!({
                "parent_id": parent_id,
                "unread_count": feed.unread_count().await,
            }))
        }
        Commands::MarkRead { id } => {
            let feed = open_feed(&parent_id, kv).await;
            let found = feed.mark_read(id.clone()).await?;
            Ok(json!({
                "id": id,
                "in_feed": found,
                "unread_count": feed.unread_count().await,
            }))
        }
        Commands::MarkAllRead => {
            let feed = open_feed(&parent_id, kv).await;
            feed.mark_all_read().await?;
            Ok(json!({
                "parent_id": parent_id,
                "unread_count": feed.unread_count().await,
            }))
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to clear without --yes");
            }
            let feed = open_feed(&parent_id, kv).await;
            feed.clear()
                .await
                .context("Failed to clear notification data")?;
            Ok(json!({ "parent_id": parent_id, "status": "cleared" }))
        }
        Commands::Refresh => refresh(&parent_id, config, kv).await,
        Commands::Config => Ok(config_summary(&config)),
    }
}

async fn open_feed(parent_id: &str, kv: Arc<dyn KvStore>) -> FeedHandle {
    spawn_feed(parent_id.to_string(), kv, None).await
}

/// Run one session against the backend: resolve scope, refresh, tear down.
async fn refresh(parent_id: &str, config: FeedConfig, kv: Arc<dyn KvStore>) -> Result<Value> {
    let backend_url = config
        .backend_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("backend_url is not set in the configuration"))?;
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("api_key is not set in the configuration"))?;

    let rows = Arc::new(PostgrestClient::new(
        &backend_url,
        api_key,
        config.access_token.clone(),
    )?);
    let change_feed = Arc::new(LocalChangeFeed::new(config.event_buffer));
    let identity = Arc::new(StaticIdentity::new(Some(Identity::parent(parent_id))));

    let state = AppState::new(config, kv, rows, change_feed, identity);
    let feed = state
        .start_session()
        .await
        .ok_or_else(|| anyhow::anyhow!("Could not start a feed for {}", parent_id))?;

    let added = state.refresh().await;
    let unread_count = feed.unread_count().await;
    let len = feed.feed().await.len();
    state.end_session().await;

    Ok(json!({
        "parent_id": parent_id,
        "added": added?,
        "count": len,
        "unread_count": unread_count,
    }))
}

fn record_view(record: &NotificationRecord, now: chrono::DateTime<chrono::Utc>) -> Value {
    json!({
        "id": record.id,
        "kind": record.kind,
        "content": record.content,
        "occurred_at": format_utc(record.occurred_at),
        "when": relative_time(record.occurred_at, now),
        "read": record.read,
        "route": record.route(),
    })
}

fn config_summary(config: &FeedConfig) -> Value {
    let redact = |value: &Option<String>| value.as_ref().map(|_| "********");
    json!({
        "database_path": config.database_path,
        "backend_url": config.backend_url,
        "api_key": redact(&config.api_key),
        "access_token": redact(&config.access_token),
        "scope_timeout_secs": config.scope_timeout_secs,
        "refresh_limit": config.refresh_limit,
        "event_buffer": config.event_buffer,
    })
}

// ============================================================================
// Output Formatting
// ============================================================================

fn print_output(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value).unwrap_or_default());
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
        }
        OutputFormat::Plain => {
            print_plain(value, 0);
        }
    }
}

fn print_plain(value: &Value, indent: usize) {
    let prefix = "  ".repeat(indent);
    match value {
        Value::Null => println!("{prefix}-"),
        Value::Bool(b) => println!("{prefix}{b}"),
        Value::Number(n) => println!("{prefix}{n}"),
        Value::String(s) => println!("{prefix}{s}"),
        Value::Array(arr) => {
            for item in arr {
                print_plain(item, indent);
                if item.is_object() {
                    println!();
                }
            }
        }
        Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{prefix}{key}:");
                        print_plain(val, indent + 1);
                    }
                    _ => {
                        print!("{prefix}{key}: ");
                        print_plain(val, 0);
                    }
                }
            }
        }
    }
}
