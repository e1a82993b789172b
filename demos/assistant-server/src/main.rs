//! Mock assistant endpoint speaking the chat wire protocol.
//!
//! Run with: cargo run -p assistant-server
//!
//! Listens on ws://localhost:8000/ws/chat. Greets every connection, shows a
//! typing indicator while "thinking" and answers from a few canned intents.

use std::{net::SocketAddr, time::Duration};

use axum::{
    Router,
    extract::{
        WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use ghl_chat_core::entry::now_timestamp;
use ghl_chat_transport::{InboundEnvelope, OutboundRequest};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const THINKING_TIME: Duration = Duration::from_millis(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let app = Router::new()
        .route("/ws/chat", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], 8000));
    tracing::info!("Assistant listening on ws://{addr}/ws/chat");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = Uuid::new_v4();
    tracing::info!("WebSocket {connection_id} connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<InboundEnvelope>();

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match envelope.encode() {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize envelope: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(InboundEnvelope::System {
        text: "Connected to GoHighLevel AI Assistant. How can I help you today?".into(),
        timestamp: Some(now_timestamp()),
        suggestions: vec![
            "Show me today's appointments".into(),
            "What's my pipeline looking like?".into(),
            "Create a new contact".into(),
            "Show recent conversations".into(),
        ],
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let request: OutboundRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Invalid chat request: {e}");
                let _ = tx.send(InboundEnvelope::Error {
                    text: "Sorry, I encountered an error processing your message. Please try again."
                        .into(),
                    timestamp: Some(now_timestamp()),
                });
                continue;
            }
        };

        answer(&tx, request).await;
    }

    send_task.abort();
    tracing::info!("WebSocket {connection_id} disconnected");
}

async fn answer(tx: &mpsc::UnboundedSender<InboundEnvelope>, request: OutboundRequest) {
    let OutboundRequest::Chat {
        text,
        conversation_id,
        attachments,
    } = request;
    tracing::info!(
        %conversation_id,
        attachments = attachments.len(),
        "Processing chat message: {text}"
    );

    let _ = tx.send(InboundEnvelope::typing(true));
    tokio::time::sleep(THINKING_TIME).await;

    let (intent, reply, data) = classify(&text).map_or_else(
        || {
            (
                None,
                format!("You said: \"{text}\". Try asking about contacts, appointments or your pipeline."),
                None,
            )
        },
        |(intent, reply, data)| (Some(intent.to_string()), reply.to_string(), Some(data)),
    );

    let _ = tx.send(InboundEnvelope::typing(false));
    let _ = tx.send(InboundEnvelope::Message {
        text: reply,
        timestamp: Some(now_timestamp()),
        intent,
        payload: data,
        conversation_id: Some(conversation_id),
        suggestions: Vec::new(),
    });
}

/// Keyword intent matching with canned results.
fn classify(text: &str) -> Option<(&'static str, &'static str, Value)> {
    let lower = text.to_lowercase();
    if lower.contains("contact") {
        Some((
            "show_contacts",
            "Here are your most recent contacts.",
            json!({
                "success": true,
                "data": {
                    "contacts": [
                        { "id": "1", "name": "John Smith", "email": "john@example.com" },
                        { "id": "2", "name": "Sarah Johnson", "email": "sarah@example.com" },
                    ],
                    "count": 2,
                },
            }),
        ))
    } else if lower.contains("appointment") || lower.contains("calendar") {
        Some((
            "show_appointments",
            "You have one appointment today.",
            json!({
                "success": true,
                "data": {
                    "appointments": [
                        { "id": "1", "title": "Sales Call with ABC Corp", "time": "10:00 AM" },
                    ],
                },
            }),
        ))
    } else if lower.contains("pipeline") || lower.contains("opportunit") {
        Some((
            "show_opportunities",
            "Here is your pipeline.",
            json!({
                "success": true,
                "data": { "stages": 4, "open_value": 45_000 },
            }),
        ))
    } else {
        None
    }
}
