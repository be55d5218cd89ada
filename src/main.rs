//! Chat relay - terminal chat client
//!
//! Reads lines from stdin and sends them as chat messages. Lines starting
//! with `/` are commands; `/help` lists them.

use chat_relay::config::{ClientConfig, PreferencesPatch};
use chat_relay::model::MessageId;
use chat_relay::persistence::FileStore;
use chat_relay::realtime::TungsteniteConnector;
use chat_relay::runtime::ChatHandle;
use chat_relay::state_machine::ChatState;
use chat_relay::transport::{ChatApi, FileCredentialStore, HttpChatApi, MessageContext, RequestOptions};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
/history <session>  load a session's history
/clear              clear the current session's history
/sessions           refresh the session list
/end                end the current session
/connect            open the realtime channel
/disconnect         close the realtime channel
/read               mark all messages read
/theme <name>       change the theme preference
/health             check the backend
/quit               exit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Configuration
    let config = ClientConfig::from_env()?;
    let state_dir = std::env::var("CHAT_STATE_DIR").map_or_else(
        |_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".chat-relay")
        },
        PathBuf::from,
    );
    std::fs::create_dir_all(&state_dir)?;
    tracing::info!(path = %state_dir.display(), "Using state directory");

    let credentials = Arc::new(FileCredentialStore::new(state_dir.join("auth_token")));
    let api = Arc::new(HttpChatApi::new(&config, credentials)?);

    let mut api_events = api.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = api_events.recv().await {
            tracing::warn!(event = event.name(), "API notification");
        }
    });

    let (chat, runtime) = ChatHandle::start(
        config,
        api.clone(),
        Arc::new(TungsteniteConnector),
        FileStore::new(&state_dir),
    )
    .await?;

    let printer = tokio::spawn(print_messages(chat.watch_state()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&chat, &api, line).await {
            eprintln!("! {e}");
        }
    }

    drop(chat);
    runtime.await?;
    printer.await?;
    Ok(())
}

async fn handle_line(
    chat: &ChatHandle,
    api: &HttpChatApi,
    line: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();
    match command {
        "/help" => println!("{HELP}"),
        "/history" if !arg.is_empty() => chat.load_history(arg).await?,
        "/clear" => chat.clear_history().await?,
        "/sessions" => chat.refresh_sessions().await?,
        "/end" => chat.end_session().await?,
        "/connect" => chat.connect().await?,
        "/disconnect" => chat.disconnect().await?,
        "/read" => chat.mark_all_read().await?,
        "/theme" if !arg.is_empty() => {
            chat.update_preferences(PreferencesPatch {
                theme: Some(arg.to_string()),
                ..Default::default()
            })
            .await?;
        }
        "/health" => {
            let health = api.health_check(&RequestOptions::default()).await?;
            println!("* backend {}", health.status);
        }
        _ if command.starts_with('/') => println!("{HELP}"),
        _ => {
            if chat.state().is_connected() {
                chat.send_frame(&json!({"type": "typing", "isTyping": true}))
                    .await?;
            }
            chat.send_message(line, MessageContext::page("terminal"))
                .await?;
        }
    }
    Ok(())
}

/// Print assistant messages and errors as they land in the state
async fn print_messages(mut rx: watch::Receiver<ChatState>) {
    let mut last_seen = MessageId(0);
    let mut last_error: Option<String> = None;
    let mut typing = false;

    while rx.changed().await.is_ok() {
        let state: ChatState = rx.borrow_and_update().clone();
        for message in state.messages() {
            if message.id <= last_seen {
                continue;
            }
            last_seen = message.id;
            if message.is_user {
                continue;
            }
            match message.text() {
                Some(text) => println!("< {text}"),
                None => println!("< [{:?}] {}", message.format, message.content),
            }
        }
        if state.is_typing() != typing {
            typing = state.is_typing();
            if typing {
                println!("* assistant is typing");
            }
        }
        let error = state.last_error().map(str::to_string);
        if error != last_error {
            if let Some(e) = &error {
                println!("! {e}");
            }
            last_error = error;
        }
    }
}
