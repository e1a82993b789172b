//! Line-oriented chat client for the assistant endpoint.
//!
//! Run with: cargo run -p chat-cli [-- path/to/config.json]
//!
//! Every line typed is sent as a chat message. Lines starting with `/` are
//! commands; `/help` lists them.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use futures::StreamExt;
use ghl_chat_core::{ChatConfig, ConversationEntry, Role};
use ghl_chat_session::{ConversationController, SubmitError};
use ghl_chat_transport::{ChatClient, ClientOptions, WsTransport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Commands:
  /connect      open the connection
  /disconnect   close the connection
  /reconnect    close, reset retries and connect again
  /status       show connection state
  /suggestions  show suggested prompts
  /quit         exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ChatConfig::load(config_path.as_deref()).context("loading chat config")?;

    let (client, events) = ChatClient::new(
        Arc::new(WsTransport::default()),
        ClientOptions::from(&config),
    );
    let controller = Arc::new(ConversationController::new(
        client.clone(),
        config.conversation_id.clone(),
    ));
    let pump = Arc::clone(&controller).spawn_pump(events);

    let printer = tokio::spawn(print_entries(Arc::clone(&controller)));
    let typing = tokio::spawn(print_typing(Arc::clone(&controller)));

    println!("Connecting to {} (conversation {})", config.url, config.conversation_id);
    println!("Type /help for commands.");
    client.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/connect" => client.connect(),
            "/disconnect" => client.disconnect(),
            "/reconnect" => client.reconnect(),
            "/status" => println!("[{}]", controller.connection_state()),
            "/suggestions" => {
                for suggestion in controller.suggestions() {
                    println!("  - {suggestion}");
                }
            }
            cmd if cmd.starts_with('/') => println!("Unknown command {cmd}. Type /help."),
            text => match controller.submit(text) {
                Ok(_) | Err(SubmitError::Empty) => {}
                Err(e) => println!("[{e}; message not sent]"),
            },
        }
    }

    client.shutdown();
    drop(client);
    let _ = pump.await;
    printer.abort();
    typing.abort();
    Ok(())
}

async fn print_entries(controller: Arc<ConversationController>) {
    let mut entries = controller.subscribe();
    while let Some(entry) = entries.next().await {
        println!("{}", render(&entry));
    }
}

async fn print_typing(controller: Arc<ConversationController>) {
    let mut composing = controller.composing_changes();
    while composing.changed().await.is_ok() {
        if *composing.borrow_and_update() {
            println!("  (assistant is typing...)");
        }
    }
}

fn render(entry: &ConversationEntry) -> String {
    let who = match entry.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    match &entry.intent {
        Some(intent) => format!("{who} [{intent}]: {}", entry.text),
        None => format!("{who}: {}", entry.text),
    }
}
