//! In-memory transport for tests.
//!
//! [`ScriptedTransport`] hands out sessions backed by channels. Each
//! successful open yields a [`RemotePeer`] that plays the endpoint's side:
//! push frames at the client, read what it sent, observe how it closed.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use ghl_chat_core::{Frame, Transport, TransportError, TransportSession};
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct Script {
    failures: VecDeque<TransportError>,
    urls: Vec<String>,
}

/// Transport whose sessions are driven by the test.
pub struct ScriptedTransport {
    script: Mutex<Script>,
    peers_tx: mpsc::UnboundedSender<RemotePeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemotePeer>>,
}

impl ScriptedTransport {
    /// Create a transport that opens successfully unless told otherwise.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        })
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next open fail with `err`. Failures queue up in order.
    pub fn fail_next(&self, err: TransportError) {
        self.script().failures.push_back(err);
    }

    /// Number of opens attempted so far, failed ones included.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.script().urls.len()
    }

    /// URLs of every open attempt.
    #[must_use]
    pub fn opened_urls(&self) -> Vec<String> {
        self.script().urls.clone()
    }

    /// Wait for the next successfully opened session.
    ///
    /// # Panics
    /// Panics if the transport was dropped.
    pub async fn next_peer(&self) -> RemotePeer {
        self.peers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("transport dropped")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportSession>, TransportError> {
        let failure = {
            let mut script = self.script();
            script.urls.push(url.to_string());
            script.failures.pop_front()
        };
        if let Some(err) = failure {
            return Err(err);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        let _ = self.peers_tx.send(RemotePeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            close: close_rx,
        });
        Ok(Box::new(ScriptedSession {
            inbound: inbound_rx,
            outbound: outbound_tx,
            close: Some(close_tx),
        }))
    }
}

struct ScriptedSession {
    inbound: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    outbound: mpsc::UnboundedSender<String>,
    close: Option<oneshot::Sender<(u16, String)>>,
}

#[async_trait]
impl TransportSession for ScriptedSession {
    async fn recv(&mut self) -> Result<Frame, TransportError> {
        match self.inbound.recv().await {
            Some(frame) => frame,
            None => Ok(Frame::abnormal("peer dropped")),
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("peer dropped".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let tx = self.close.take().ok_or(TransportError::Closed)?;
        let _ = tx.send((code, reason.to_string()));
        Ok(())
    }
}

/// Endpoint side of one scripted session.
///
/// Dropping it ends the session abnormally.
pub struct RemotePeer {
    inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    outbound: mpsc::UnboundedReceiver<String>,
    close: oneshot::Receiver<(u16, String)>,
}

impl RemotePeer {
    /// Deliver a text frame.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Ok(Frame::Text(text.into())));
    }

    /// Deliver a JSON value as a text frame.
    pub fn push_json(&self, value: &serde_json::Value) {
        self.push_text(value.to_string());
    }

    /// Deliver a binary frame.
    pub fn push_binary(&self, data: Vec<u8>) {
        let _ = self.inbound.send(Ok(Frame::Binary(data)));
    }

    /// Fail the session's next receive.
    pub fn fail(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }

    /// Close the session from the endpoint side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(Ok(Frame::Closed {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Next text the client sent, or `None` once the session is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Code and reason the client closed with, or `None` if it dropped the
    /// session without closing.
    pub async fn closed(&mut self) -> Option<(u16, String)> {
        (&mut self.close).await.ok()
    }
}
