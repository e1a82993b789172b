//! Reconnecting duplex messaging client.
//!
//! [`ChatClient`] is a handle to a background task that exclusively owns the
//! transport session, the pending open and the backoff timer. Handles post
//! commands; the task serializes them with transport and timer events, runs
//! them through [`ConnectionMachine`] and reports outcomes on the event
//! channel returned by [`ChatClient::new`].

use std::{pin::Pin, sync::Arc};

use futures::future::BoxFuture;
use ghl_chat_core::{
    ChatConfig, ConnectionState, Frame, ReconnectPolicy, Transport, TransportError,
    TransportSession,
    traits::{CLOSE_ABNORMAL, CLOSE_NORMAL},
};
use tokio::{
    sync::{mpsc, watch},
    time::Sleep,
};

use crate::{
    events::{ClientError, ClientEvent},
    protocol::{self, InboundEnvelope, OutboundRequest},
    reconnect::{Action, ConnectionMachine, Input, USER_CLOSE_REASON},
};

/// Settings fixed for the lifetime of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Endpoint every session is opened against.
    pub url: String,
    pub policy: ReconnectPolicy,
    /// Whether requests with attachments may be sent.
    pub attachments: bool,
}

impl ClientOptions {
    /// Options with the default policy and no attachments.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            attachments: false,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_attachments(mut self, enabled: bool) -> Self {
        self.attachments = enabled;
        self
    }
}

impl From<&ChatConfig> for ClientOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            url: config.url.clone(),
            policy: config.reconnect,
            attachments: config.attachments,
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Send(OutboundRequest),
    Shutdown,
}

/// Handle to a reconnecting client.
///
/// Cheap to clone. Every method returns immediately; results arrive as
/// [`ClientEvent`]s. The background task stops when every handle is dropped
/// or [`ChatClient::shutdown`] is called.
#[derive(Clone)]
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    url: Arc<str>,
    attachments: bool,
}

impl ChatClient {
    /// Spawn a disconnected client.
    ///
    /// Returns the handle and the receiver for its events.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let url: Arc<str> = Arc::from(options.url.as_str());
        let driver = Driver {
            machine: ConnectionMachine::new(options.policy, options.attachments),
            transport,
            url: Arc::clone(&url),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            session: None,
            opening: None,
            timer: None,
        };
        tokio::spawn(driver.run());

        let client = Self {
            commands: command_tx,
            state: state_rx,
            url,
            attachments: options.attachments,
        };
        (client, event_rx)
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("chat client task has stopped, command ignored");
        }
    }

    /// Open a session unless one is open or being opened.
    pub fn connect(&self) {
        self.post(Command::Connect);
    }

    /// Send a request. Dropped with [`ClientError::NotConnected`] unless
    /// connected; there is no outbound queue.
    pub fn send(&self, request: OutboundRequest) {
        self.post(Command::Send(request));
    }

    /// Close the session normally and stop reconnecting.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Disconnect, reset the attempt counter and connect again.
    pub fn reconnect(&self) {
        self.post(Command::Reconnect);
    }

    /// Close the session and stop the background task.
    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub const fn supports_attachments(&self) -> bool {
        self.attachments
    }
}

type Opening = BoxFuture<'static, Result<Box<dyn TransportSession>, TransportError>>;

struct Driver {
    machine: ConnectionMachine,
    transport: Arc<dyn Transport>,
    url: Arc<str>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    session: Option<Box<dyn TransportSession>>,
    opening: Option<Opening>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.apply(Input::Connect).await,
                    Some(Command::Disconnect) => self.apply(Input::Disconnect).await,
                    Some(Command::Reconnect) => self.apply(Input::Reconnect).await,
                    Some(Command::Send(request)) => self.apply(Input::Send(request)).await,
                    Some(Command::Shutdown) | None => break,
                },
                result = pending_open(&mut self.opening), if self.opening.is_some() => {
                    self.opening = None;
                    match result {
                        Ok(session) => {
                            tracing::info!(url = %self.url, "chat connection established");
                            self.session = Some(session);
                            self.apply(Input::Opened).await;
                        }
                        Err(e) => {
                            tracing::warn!(url = %self.url, "chat connection failed: {e}");
                            self.apply(Input::OpenFailed(e)).await;
                        }
                    }
                },
                frame = next_frame(&mut self.session), if self.session.is_some() => {
                    self.on_frame(frame).await;
                },
                () = backoff(&mut self.timer), if self.timer.is_some() => {
                    self.timer = None;
                    tracing::debug!(attempt = self.machine.attempts(), "reconnect timer fired");
                    self.apply(Input::TimerFired).await;
                },
            }
        }

        self.timer = None;
        self.opening = None;
        self.close_session(CLOSE_NORMAL, USER_CLOSE_REASON).await;
        let _ = self.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!(url = %self.url, "chat client stopped");
    }

    async fn on_frame(&mut self, frame: Result<Frame, TransportError>) {
        match frame {
            Ok(Frame::Text(text)) => {
                tracing::debug!(bytes = text.len(), "frame received");
                self.deliver(protocol::decode(&text));
            }
            Ok(Frame::Binary(data)) => {
                tracing::debug!(bytes = data.len(), "binary frame received");
                self.deliver(protocol::decode_binary(&data));
            }
            Ok(Frame::Closed { code, reason }) => {
                self.session = None;
                tracing::info!(code, %reason, "chat connection closed");
                self.apply(Input::Closed { code, reason }).await;
            }
            Err(e) => {
                self.session = None;
                tracing::error!("chat connection error: {e}");
                let reason = e.to_string();
                self.emit(ClientEvent::Error(ClientError::Transport(e)));
                self.apply(Input::Closed {
                    code: CLOSE_ABNORMAL,
                    reason,
                })
                .await;
            }
        }
    }

    fn deliver(&self, decoded: Result<InboundEnvelope, protocol::DecodeError>) {
        match decoded {
            Ok(envelope) => self.emit(ClientEvent::Message(envelope)),
            Err(e) => {
                tracing::warn!("failed to decode inbound frame: {e}");
                let reason = e.reason.clone();
                self.emit(ClientEvent::Message(e.into_raw()));
                self.emit(ClientEvent::Error(ClientError::Decode(reason)));
            }
        }
    }

    async fn apply(&mut self, input: Input) {
        let actions = self.machine.handle(input);
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        for action in actions {
            self.perform(action).await;
        }
    }

    async fn perform(&mut self, action: Action) {
        match action {
            Action::Open => {
                self.session = None;
                let transport = Arc::clone(&self.transport);
                let url = Arc::clone(&self.url);
                tracing::debug!(url = %url, "opening chat connection");
                let opening: Opening = Box::pin(async move { transport.open(&url).await });
                self.opening = Some(opening);
            }
            Action::Close { code, reason } => {
                self.opening = None;
                self.close_session(code, reason).await;
            }
            Action::Schedule { delay } => {
                tracing::info!(
                    attempt = self.machine.attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                self.timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Action::CancelTimer => {
                self.timer = None;
            }
            Action::Transmit(request) => self.transmit(&request).await,
            Action::Emit(event) => {
                if let ClientEvent::Error(ref e) = event {
                    match e {
                        ClientError::NotConnected | ClientError::AttachmentsUnsupported => {
                            tracing::warn!("{e}");
                        }
                        ClientError::ReconnectExhausted { .. } => tracing::error!("{e}"),
                        _ => {}
                    }
                }
                self.emit(event);
            }
        }
    }

    async fn transmit(&mut self, request: &OutboundRequest) {
        let text = match request.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize request: {e}");
                self.emit(ClientEvent::Error(ClientError::Send(e.to_string())));
                return;
            }
        };
        let Some(session) = self.session.as_mut() else {
            self.emit(ClientEvent::Error(ClientError::NotConnected));
            return;
        };
        if let Err(e) = session.send_text(text).await {
            tracing::error!("Failed to send request: {e}");
            self.emit(ClientEvent::Error(ClientError::Send(e.to_string())));
        }
    }

    async fn close_session(&mut self, code: u16, reason: &str) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close(code, reason).await {
                tracing::debug!("close handshake failed: {e}");
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        // The observer may have gone away; the client keeps running regardless.
        let _ = self.events.send(event);
    }
}

async fn pending_open(
    opening: &mut Option<Opening>,
) -> Result<Box<dyn TransportSession>, TransportError> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    session: &mut Option<Box<dyn TransportSession>>,
) -> Result<Frame, TransportError> {
    match session {
        Some(session) => session.recv().await,
        None => std::future::pending().await,
    }
}

async fn backoff(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}
