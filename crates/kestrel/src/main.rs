//! # kestrel
//!
//! Terminal client binary — session management commands plus an interactive
//! chat backed by the live-sync store.

#![deny(unsafe_code)]

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use kestrel_api::ApiClient;
use kestrel_core::{Message, MessageRole, Todo, TodoDraft, TodoStatus, logging};
use kestrel_settings::KestrelSettings;
use kestrel_settings::loader;
use kestrel_sync::protocol::{ToolResultFrame, event};
use kestrel_sync::{ConnectionManager, ConnectionOptions, EventDispatcher, SessionStore};

/// Kestrel terminal client.
#[derive(Parser, Debug)]
#[command(name = "kestrel", about = "Terminal client for the assistant backend", version)]
struct Cli {
    /// Backend host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Backend port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions.
    Sessions,
    /// Create a session.
    Create {
        /// Display name.
        #[arg(long)]
        name: Option<String>,
        /// Workspace directory on the backend host.
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Delete a session.
    Delete {
        /// Session ID.
        session_id: String,
    },
    /// Open an interactive chat with a session.
    Chat {
        /// Session ID.
        session_id: String,
    },
    /// Print a session's conversation history.
    Messages {
        /// Session ID.
        session_id: String,
    },
    /// Show or replace a session's todo list.
    Todos {
        /// Session ID.
        session_id: String,
        /// Replace the whole list; repeatable. Format: `content` or
        /// `content:status` (pending, in_progress, completed).
        #[arg(long = "set", value_name = "CONTENT[:STATUS]")]
        set: Vec<String>,
    },
    /// Execute a tool against a session.
    Tool {
        /// Session ID.
        session_id: String,
        /// Tool name.
        tool_name: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Check backend health.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        loader::load_settings_from_path(&loader::settings_path()).unwrap_or_default();
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    logging::init_subscriber(&settings.logging.level);

    let api = ApiClient::new(settings.server.http_base_url());

    match cli.command {
        Command::Sessions => {
            let sessions = api.list_sessions().await?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for session in sessions {
                println!(
                    "{}  {}  ({} messages, {} todos)",
                    session.id, session.name, session.message_count, session.todo_count
                );
            }
        }
        Command::Create { name, workspace } => {
            let session = api
                .create_session(name.as_deref(), workspace.as_deref())
                .await?;
            println!("{}  {}", session.id, session.name);
        }
        Command::Delete { session_id } => {
            api.delete_session(&session_id).await?;
            println!("deleted {session_id}");
        }
        Command::Chat { session_id } => run_chat(api, &settings, &session_id).await?,
        Command::Messages { session_id } => {
            for message in api.get_messages(&session_id).await? {
                print_message(&message);
            }
        }
        Command::Todos { session_id, set } => {
            let todos = if set.is_empty() {
                api.get_todos(&session_id).await?
            } else {
                let drafts = set
                    .iter()
                    .map(|entry| parse_draft(entry))
                    .collect::<Result<Vec<_>>>()?;
                api.put_todos(&session_id, &drafts).await?
            };
            for todo in &todos {
                println!("{} {}", status_marker(todo), todo.content);
            }
        }
        Command::Tool {
            session_id,
            tool_name,
            args,
        } => {
            let args: Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let result = api.execute_tool(&session_id, &tool_name, &args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Health => {
            let health = api.health().await?;
            println!("{} ({})", health.status, health.service);
        }
    }

    Ok(())
}

/// Interactive chat loop. The store keeps the projection consistent; this
/// loop only reads stdin and prints messages as they land, whether they
/// came from the command round-trip or from a push event.
async fn run_chat(api: ApiClient, settings: &KestrelSettings, session_id: &str) -> Result<()> {
    let dispatcher = Arc::new(EventDispatcher::new());
    // Tool results pushed by the backend bypass the message projection
    let _ = dispatcher.on(event::TOOL_RESULT, |payload| {
        if let Ok(frame) = serde_json::from_value::<ToolResultFrame>(payload.clone()) {
            println!("[tool:{}] {}", frame.tool, frame.data);
        }
    });
    let connection = ConnectionManager::with_options(
        settings.server.ws_base_url(),
        Arc::clone(&dispatcher),
        ConnectionOptions {
            backoff_unit: Duration::from_millis(settings.connection.backoff_unit_ms),
            max_attempts: settings.connection.max_reconnect_attempts,
        },
    );
    let store = SessionStore::new(api, connection);

    store.select(session_id).await;
    let projection = store.projection();
    if let Some(error) = &projection.error {
        bail!("failed to load session: {error}");
    }
    for message in &projection.messages {
        print_message(message);
    }

    // Print whatever lands in the projection while the prompt is waiting.
    // Printed messages are tracked by id, not by list position: the store
    // inserts in (created_at, seq) order, so a late push event can land
    // before the tail rather than at it.
    let printer = {
        let store = Arc::clone(&store);
        let mut changes = store.subscribe();
        let mut printed: HashSet<String> = projection
            .messages
            .iter()
            .map(|message| message.id.clone())
            .collect();
        let mut last_error = projection.error.clone();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let projection = store.projection();
                for message in collect_unprinted(&projection.messages, &mut printed) {
                    print_message(message);
                }
                if projection.error != last_error {
                    if let Some(error) = &projection.error {
                        eprintln!("! {error}");
                    }
                    last_error = projection.error.clone();
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/todos" {
            for todo in &store.projection().todos {
                println!("{} {}", status_marker(todo), todo.content);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("/tool ") {
            let (name, raw_args) = rest.split_once(' ').unwrap_or((rest, "{}"));
            let Ok(args) = serde_json::from_str::<Value>(raw_args) else {
                eprintln!("usage: /tool <name> [json-args]");
                continue;
            };
            match store.execute_tool(name, &args).await {
                // Socket path: the result arrives as a tool_result push event
                Ok(None) => {}
                Ok(Some(result)) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(error) => eprintln!("error: {error}"),
            }
            continue;
        }
        // Failures are already surfaced through the projection
        let _ = store.send_message(line).await;
    }

    printer.abort();
    store.clear();
    Ok(())
}

/// Messages not yet printed, in projection order. Marks them printed.
fn collect_unprinted<'a>(
    messages: &'a [Message],
    printed: &mut HashSet<String>,
) -> Vec<&'a Message> {
    messages
        .iter()
        .filter(|message| printed.insert(message.id.clone()))
        .collect()
}

fn print_message(message: &Message) {
    let role = match message.role {
        MessageRole::User => "you",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Tool => "tool",
    };
    println!("[{role}] {}", message.content);
}

fn status_marker(todo: &Todo) -> &'static str {
    match todo.status {
        TodoStatus::Pending => "[ ]",
        TodoStatus::InProgress => "[~]",
        TodoStatus::Completed => "[x]",
    }
}

/// Parse a `content` or `content:status` todo entry.
fn parse_draft(entry: &str) -> Result<TodoDraft> {
    let (content, status) = match entry.rsplit_once(':') {
        Some((content, status)) => {
            let status = match status {
                "pending" => TodoStatus::Pending,
                "in_progress" => TodoStatus::InProgress,
                "completed" => TodoStatus::Completed,
                other => bail!("unknown todo status: {other}"),
            };
            (content, status)
        }
        None => (entry, TodoStatus::Pending),
    };
    if content.is_empty() {
        bail!("todo content must not be empty");
    }
    Ok(TodoDraft {
        content: content.to_string(),
        status,
    })
}
