//! `SenseChat` terminal client
//!
//! Usage: `sensechat-sync <recipient_id>` with `SENSECHAT_USER_ID` set.
//! Lines typed on stdin are sent. Commands: `/sync` refetches history,
//! `/users` reloads the directory, `/read <id>` sends a read receipt,
//! `/reconnect` reopens the realtime channel, `/dismiss` hides the current
//! error and `/quit` exits.

use sensechat_sync::engine::SyncEngine;
use sensechat_sync::persist::{SnapshotStore, SqliteSnapshotStore};
use sensechat_sync::realtime::socket::{self, ChannelHandle};
use sensechat_sync::realtime::Dispatcher;
use sensechat_sync::remote::{HttpChatApi, LoggingApi};
use sensechat_sync::{ClientConfig, ViewSnapshot};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Engine = SyncEngine<LoggingApi<HttpChatApi>>;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("SENSECHAT_LOG")
        .unwrap_or_else(|_| "sensechat_sync=info".into());
    let json = std::env::var_os("SENSECHAT_LOG_JSON").is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = ClientConfig::from_env();
    let user_id = config
        .user_id
        .clone()
        .ok_or("SENSECHAT_USER_ID is not set")?;
    let recipient_id = std::env::args()
        .nth(1)
        .ok_or("usage: sensechat-sync <recipient_id>")?;

    tracing::info!(path = %config.db_path.display(), "Opening snapshot store");
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::open(&config.db_path)?);

    let api = LoggingApi::new(HttpChatApi::new(&config.api_url, config.timeout)?);
    let engine = SyncEngine::new(api, &config, Some(store));
    engine.restore();

    if let Ok(users) = engine.load_users().await {
        for user in &users {
            println!("  {} ({}, {})", user.name, user.id, user.language);
        }
    }

    engine.set_current_user(&user_id);
    engine.select_recipient(&recipient_id);
    if let Err(e) = engine.sync_from_server(&user_id, Some(recipient_id.as_str())).await {
        tracing::warn!(error = %e, "Starting with local history only");
    }

    let mut dispatcher = Dispatcher::new();
    engine.register_handlers(&mut dispatcher);
    let dispatcher = Arc::new(dispatcher);
    let mut channel = open_channel(&engine, &config.ws_url, &user_id, &dispatcher).await;

    tokio::spawn(render_loop(engine.clone()));
    tokio::spawn(prune_loop(engine.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Quit => break,
            Command::Sync => {
                let _ = engine.sync_from_server(&user_id, Some(recipient_id.as_str())).await;
            }
            Command::Users => {
                let _ = engine.load_users().await;
            }
            Command::Read(id) => {
                engine.mark_read(id);
            }
            Command::Dismiss => {
                engine.clear_error();
            }
            Command::Reconnect => {
                if let Some(old) = channel.take() {
                    old.close().await;
                }
                channel = open_channel(&engine, &config.ws_url, &user_id, &dispatcher).await;
            }
            Command::Empty => {}
            Command::Send(text) => {
                engine.notify_typing(false);
                if let Ok(outcome) = engine.send_message(text).await {
                    if let Some(rendered) = outcome.rendered {
                        tracing::debug!(
                            message_id = %rendered.message_id,
                            confidence = rendered.confidence,
                            "Recipient will see: {}",
                            rendered.text
                        );
                    }
                }
            }
        }
    }

    if let Some(handle) = channel {
        handle.close().await;
    }
    engine.persist()?;
    Ok(())
}

/// One line of stdin
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Sync,
    Users,
    Read(&'a str),
    /// Hide the current error
    Dismiss,
    Reconnect,
    Empty,
    Send(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => Command::Quit,
            ("/sync", _) => Command::Sync,
            ("/users", _) => Command::Users,
            ("/read", id) => Command::Read(id.trim()),
            ("/dismiss", _) => Command::Dismiss,
            ("/reconnect", _) => Command::Reconnect,
            _ if line.is_empty() => Command::Empty,
            _ => Command::Send(line),
        }
    }
}

async fn open_channel(
    engine: &Engine,
    url: &str,
    user_id: &str,
    dispatcher: &Arc<Dispatcher>,
) -> Option<ChannelHandle> {
    match socket::connect(url, user_id, dispatcher.clone()).await {
        Ok(handle) => {
            engine.attach_channel(handle.sender());
            engine.request_online_users();
            Some(handle)
        }
        Err(e) => {
            tracing::error!(url, error = %e, "Realtime channel unavailable; use /reconnect");
            engine.detach_channel();
            engine.handle_disconnect(&e.to_string());
            None
        }
    }
}

/// Print new messages, status changes and errors as snapshots arrive
async fn render_loop(engine: Engine) {
    let mut updates = engine.watch();
    let mut printed: HashSet<(String, String)> = HashSet::new();
    let mut last_error: Option<String> = None;
    loop {
        let snapshot = updates.borrow_and_update().clone();
        print_snapshot(&snapshot, &mut printed, &mut last_error);
        if updates.changed().await.is_err() {
            break;
        }
    }
}

fn print_snapshot(
    snapshot: &ViewSnapshot,
    printed: &mut HashSet<(String, String)>,
    last_error: &mut Option<String>,
) {
    for message in &snapshot.messages {
        let seen = (message.id.clone(), message.status.to_string());
        if printed.insert(seen) {
            let who = if message.is_sent() { "you" } else { message.sender_id.as_str() };
            println!(
                "[{}] {who}: {} ({})",
                message.created_at.format("%H:%M:%S"),
                message.text,
                message.status
            );
        }
    }
    if !snapshot.typing_users.is_empty() {
        println!("  ... {} typing", snapshot.typing_users.join(", "));
    }
    if snapshot.error != *last_error {
        if let Some(error) = &snapshot.error {
            println!("! {error} (/dismiss to hide)");
        }
        last_error.clone_from(&snapshot.error);
    }
}

async fn prune_loop(engine: Engine) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        engine.prune_presence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/dismiss"), Command::Dismiss);
        assert_eq!(Command::parse("/read  m1 "), Command::Read("m1"));
        assert_eq!(Command::parse("  "), Command::Empty);
        assert_eq!(Command::parse("/quit"), Command::Quit);
    }

    #[test]
    fn test_unknown_commands_are_sent_as_text() {
        assert_eq!(Command::parse("/clear"), Command::Send("/clear"));
        assert_eq!(Command::parse(" hello there "), Command::Send("hello there"));
    }
}
