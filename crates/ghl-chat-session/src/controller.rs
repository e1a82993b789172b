//! Conversation state on top of the reconnecting client.

use std::sync::Arc;

use futures::stream::BoxStream;
use ghl_chat_core::{
    ConnectionState, ConversationEntry, NewEntry, Role, Transcript, entry::now_timestamp,
};
use ghl_chat_transport::{
    Attachment, ChatClient, ClientError, ClientEvent, InboundEnvelope, OutboundRequest,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Why a submission was rejected. The transcript is untouched in every case.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Message is empty")]
    Empty,
    #[error("Not connected")]
    NotConnected,
    #[error("Attachments are not enabled for this client")]
    AttachmentsDisabled,
}

/// Transcript, composing indicator and suggestions for one conversation.
///
/// Local submissions go out through the [`ChatClient`]; client events come
/// back in through [`ConversationController::handle_event`], usually via
/// [`ConversationController::spawn_pump`].
pub struct ConversationController {
    client: ChatClient,
    conversation_id: String,
    transcript: Arc<Transcript>,
    composing: watch::Sender<bool>,
    suggestions: watch::Sender<Vec<String>>,
}

impl ConversationController {
    #[must_use]
    pub fn new(client: ChatClient, conversation_id: impl Into<String>) -> Self {
        Self {
            client,
            conversation_id: conversation_id.into(),
            transcript: Arc::new(Transcript::new()),
            composing: watch::Sender::new(false),
            suggestions: watch::Sender::new(Vec::new()),
        }
    }

    /// Forward client events to [`Self::handle_event`] in the order they
    /// arrive, until the client stops or the controller is dropped.
    ///
    /// The task only holds a weak reference, so dropping the last
    /// controller drops its client and closes the connection.
    pub fn spawn_pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::downgrade(&self);
        let conversation_id = self.conversation_id.clone();
        drop(self);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle_event(event);
            }
            tracing::debug!(%conversation_id, "event pump finished");
        })
    }

    /// Record and send user text.
    ///
    /// # Errors
    /// Returns [`SubmitError::Empty`] for blank text and
    /// [`SubmitError::NotConnected`] unless the client is connected.
    pub fn submit(&self, text: &str) -> Result<ConversationEntry, SubmitError> {
        self.submit_request(text, Vec::new())
    }

    /// Record and send user text with files.
    ///
    /// # Errors
    /// As [`Self::submit`], plus [`SubmitError::AttachmentsDisabled`] when the
    /// client was built without the attachment capability.
    pub fn submit_with_attachments(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<ConversationEntry, SubmitError> {
        if !attachments.is_empty() && !self.client.supports_attachments() {
            return Err(SubmitError::AttachmentsDisabled);
        }
        self.submit_request(text, attachments)
    }

    fn submit_request(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<ConversationEntry, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::Empty);
        }
        if !self.client.is_connected() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "submit while not connected, dropped"
            );
            return Err(SubmitError::NotConnected);
        }

        let entry = self.transcript.push(NewEntry::user(text));
        self.composing.send_replace(true);
        self.client.send(
            OutboundRequest::chat(text, self.conversation_id.as_str()).with_attachments(attachments),
        );
        tracing::debug!(id = %entry.id, "user message submitted");
        Ok(entry)
    }

    /// Apply one client event.
    pub fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Message(envelope) => self.apply_envelope(envelope),
            ClientEvent::Connected => {
                tracing::info!(conversation_id = %self.conversation_id, "connected");
            }
            ClientEvent::Disconnected { code, reason } => {
                tracing::info!(code, %reason, "disconnected");
            }
            ClientEvent::ReconnectScheduled { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnecting"
                );
            }
            ClientEvent::Error(e) => {
                tracing::warn!("chat client error: {e}");
                // A submitted request never went out, so no reply is coming.
                if matches!(
                    e,
                    ClientError::NotConnected
                        | ClientError::AttachmentsUnsupported
                        | ClientError::Send(_)
                ) {
                    self.composing.send_replace(false);
                }
            }
        }
    }

    fn apply_envelope(&self, envelope: InboundEnvelope) {
        self.remember_suggestions(envelope.suggestions());
        match envelope {
            InboundEnvelope::Message {
                text,
                timestamp,
                intent,
                payload,
                ..
            } => {
                let entry = NewEntry::new(
                    Role::Assistant,
                    text,
                    timestamp.unwrap_or_else(now_timestamp),
                )
                .with_intent(intent)
                .with_payload(payload);
                self.transcript.push(entry);
                self.composing.send_replace(false);
            }
            InboundEnvelope::Typing { is_typing } => {
                self.composing.send_replace(is_typing);
            }
            InboundEnvelope::System {
                text, timestamp, ..
            } => {
                self.transcript.push(NewEntry::new(
                    Role::System,
                    text,
                    timestamp.unwrap_or_else(now_timestamp),
                ));
            }
            InboundEnvelope::Error { text, timestamp } => {
                tracing::warn!(%text, "assistant reported an error");
                self.transcript.push(NewEntry::new(
                    Role::System,
                    text,
                    timestamp.unwrap_or_else(now_timestamp),
                ));
                self.composing.send_replace(false);
            }
            InboundEnvelope::Raw { data } => {
                tracing::debug!(bytes = data.len(), "ignoring undecodable frame");
            }
        }
    }

    fn remember_suggestions(&self, suggestions: &[String]) {
        if suggestions.is_empty() {
            return;
        }
        self.suggestions.send_replace(suggestions.to_vec());
    }

    /// Entries so far, in insertion order.
    #[must_use]
    pub fn transcript(&self) -> Vec<ConversationEntry> {
        self.transcript.snapshot()
    }

    /// Existing entries followed by every entry appended later.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, ConversationEntry> {
        self.transcript.history_plus_stream()
    }

    /// Whether the remote is believed to be composing a reply.
    #[must_use]
    pub fn is_composing(&self) -> bool {
        *self.composing.borrow()
    }

    #[must_use]
    pub fn composing_changes(&self) -> watch::Receiver<bool> {
        self.composing.subscribe()
    }

    /// Latest non-empty suggestion list received.
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        self.suggestions.borrow().clone()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The client this controller sends through.
    #[must_use]
    pub const fn client(&self) -> &ChatClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use ghl_chat_core::ReconnectPolicy;
    use ghl_chat_transport::{
        ClientOptions,
        testing::{RemotePeer, ScriptedTransport},
    };
    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::*;

    type Fixture = (
        Arc<ConversationController>,
        mpsc::UnboundedReceiver<ClientEvent>,
        Arc<ScriptedTransport>,
    );

    fn controller(attachments: bool) -> Fixture {
        let transport = ScriptedTransport::new();
        let options = ClientOptions::new("ws://assistant.test/ws/chat")
            .with_policy(ReconnectPolicy::default())
            .with_attachments(attachments);
        let (client, events) = ChatClient::new(Arc::clone(&transport) as _, options);
        let controller = Arc::new(ConversationController::new(client, "conv-1"));
        (controller, events, transport)
    }

    async fn connected(attachments: bool) -> (Arc<ConversationController>, RemotePeer) {
        let (controller, events, transport) = controller(attachments);
        Arc::clone(&controller).spawn_pump(events);
        controller.client().connect();
        let peer = transport.next_peer().await;
        let mut state = controller.client().state_changes();
        state.wait_for(|s| s.is_connected()).await.unwrap();
        (controller, peer)
    }

    async fn sent_json(peer: &mut RemotePeer) -> Value {
        let text = peer.next_sent().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_scenario() {
        let (controller, mut peer) = connected(false).await;
        let mut entries = controller.subscribe();

        let user = controller.submit("Show pipeline").unwrap();
        assert_eq!(user.role, Role::User);
        assert!(controller.is_composing());
        assert_eq!(
            sent_json(&mut peer).await,
            json!({ "type": "chat", "message": "Show pipeline", "conversation_id": "conv-1" })
        );

        peer.push_json(&json!({
            "type": "message",
            "message": "Here is your pipeline",
            "timestamp": "2024-05-01T12:00:00Z",
            "intent": "show_opportunities",
            "data": { "stages": 4 },
        }));

        assert_eq!(entries.next().await.unwrap(), user);
        let reply = entries.next().await.unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.text, "Here is your pipeline");
        assert_eq!(reply.intent.as_deref(), Some("show_opportunities"));
        assert_eq!(reply.payload, Some(json!({ "stages": 4 })));
        assert_eq!(reply.timestamp, "2024-05-01T12:00:00Z");
        assert!(reply.id > user.id);

        assert_eq!(controller.transcript(), vec![user, reply]);
        assert!(!controller.is_composing());
    }

    #[tokio::test]
    async fn test_blank_submissions_are_ignored() {
        let (controller, _peer) = connected(false).await;

        assert_eq!(controller.submit(""), Err(SubmitError::Empty));
        assert_eq!(controller.submit("   \n\t"), Err(SubmitError::Empty));
        assert!(controller.transcript().is_empty());
        assert!(!controller.is_composing());
    }

    #[tokio::test]
    async fn test_submit_while_disconnected() {
        let (controller, _events, transport) = controller(false);

        assert_eq!(controller.submit("hello"), Err(SubmitError::NotConnected));
        assert!(controller.transcript().is_empty());
        assert!(!controller.is_composing());
        assert_eq!(transport.open_count(), 0);
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_typing_then_message() {
        let (controller, _events, _transport) = controller(false);
        let mut composing = controller.composing_changes();

        controller.handle_event(ClientEvent::Message(InboundEnvelope::typing(true)));
        assert!(controller.is_composing());
        assert!(*composing.borrow_and_update());
        assert!(controller.transcript().is_empty());

        controller.handle_event(ClientEvent::Message(InboundEnvelope::message(
            "hi",
            "2024-05-01T12:00:00Z",
        )));
        assert!(!controller.is_composing());
        assert!(composing.has_changed().unwrap());
        assert!(!*composing.borrow());

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::Assistant);
        assert_eq!(transcript[0].text, "hi");
    }

    #[tokio::test]
    async fn test_system_keeps_composing() {
        let (controller, _events, _transport) = controller(false);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::typing(true)));
        controller.handle_event(ClientEvent::Message(InboundEnvelope::system(
            "Welcome",
            "2024-05-01T12:00:00Z",
        )));

        assert!(controller.is_composing());
        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(transcript[0].text, "Welcome");
    }

    #[tokio::test]
    async fn test_error_envelope_clears_composing() {
        let (controller, _events, _transport) = controller(false);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::typing(true)));
        controller.handle_event(ClientEvent::Message(InboundEnvelope::Error {
            text: "Something went wrong".into(),
            timestamp: None,
        }));

        assert!(!controller.is_composing());
        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::System);
        assert!(!transcript[0].timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_controller_closes_connection() {
        let (controller, mut peer) = connected(false).await;

        drop(controller);
        let closed = tokio::time::timeout(Duration::from_secs(5), peer.closed())
            .await
            .unwrap();
        assert_eq!(closed, Some((1000, "User disconnected".to_string())));
    }

    #[tokio::test]
    async fn test_pump_stops_when_controller_dropped() {
        let (controller, events, _transport) = controller(false);
        let pump = Arc::clone(&controller).spawn_pump(events);

        drop(controller);
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_request_clears_composing() {
        let (controller, _events, _transport) = controller(false);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::typing(true)));
        controller.handle_event(ClientEvent::Error(ClientError::NotConnected));
        assert!(!controller.is_composing());

        controller.handle_event(ClientEvent::Message(InboundEnvelope::typing(true)));
        controller.handle_event(ClientEvent::Error(ClientError::Decode("bad".into())));
        assert!(controller.is_composing());
    }

    #[tokio::test]
    async fn test_submit_racing_a_drop_does_not_leave_composing() {
        let (controller, peer) = connected(false).await;
        let mut state = controller.client().state_changes();

        // Drop the connection, then submit before the state change is seen.
        drop(peer);
        let _ = controller.submit("hello");
        state.wait_for(|s| !s.is_connected()).await.unwrap();

        let mut composing = controller.composing_changes();
        tokio::time::timeout(Duration::from_secs(5), composing.wait_for(|c| !*c))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_raw_and_lifecycle_events_add_nothing() {
        let (controller, _events, _transport) = controller(false);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::Raw {
            data: "not json".into(),
        }));
        controller.handle_event(ClientEvent::Connected);
        controller.handle_event(ClientEvent::Disconnected {
            code: 1006,
            reason: "stream ended".into(),
        });

        assert!(controller.transcript().is_empty());
        assert!(!controller.is_composing());
    }

    #[tokio::test]
    async fn test_latest_suggestions_are_kept() {
        let (controller, _events, _transport) = controller(false);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::System {
            text: "Welcome".into(),
            timestamp: None,
            suggestions: vec!["Show pipeline".into(), "List contacts".into()],
        }));
        assert_eq!(controller.suggestions(), ["Show pipeline", "List contacts"]);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::message("ok", "t")));
        assert_eq!(controller.suggestions().len(), 2);

        controller.handle_event(ClientEvent::Message(InboundEnvelope::Message {
            text: "Here are your contacts".into(),
            timestamp: None,
            intent: Some("list_contacts".into()),
            payload: None,
            conversation_id: None,
            suggestions: vec!["Add contact".into()],
        }));
        assert_eq!(controller.suggestions(), ["Add contact"]);
    }

    #[tokio::test]
    async fn test_attachments_need_capability() {
        let (controller, _peer) = connected(false).await;
        let file = Attachment::from_bytes("leads.csv", "text/csv", b"name\nAda\n");

        assert_eq!(
            controller.submit_with_attachments("import these", vec![file]),
            Err(SubmitError::AttachmentsDisabled)
        );
        assert!(controller.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_attachments_are_sent() {
        let (controller, mut peer) = connected(true).await;
        let file = Attachment::from_bytes("leads.csv", "text/csv", b"name\nAda\n");

        controller
            .submit_with_attachments("import these", vec![file.clone()])
            .unwrap();

        let sent = sent_json(&mut peer).await;
        assert_eq!(sent["message"], "import these");
        assert_eq!(sent["attachments"][0]["name"], "leads.csv");
        assert_eq!(sent["attachments"][0]["data"], file.data);
    }

    proptest! {
        #[test]
        fn prop_submissions_append_in_order(texts in prop::collection::vec("[a-z ]{0,8}", 0..20)) {
            let transcript = tokio_test::block_on(async {
                let (controller, _peer) = connected(false).await;
                for text in &texts {
                    let _ = controller.submit(text);
                }
                controller.transcript()
            });

            let expected: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
            prop_assert_eq!(transcript.len(), expected.len());
            for (entry, text) in transcript.iter().zip(&expected) {
                prop_assert_eq!(entry.role, Role::User);
                prop_assert_eq!(&entry.text, *text);
            }
            for pair in transcript.windows(2) {
                prop_assert!(pair[0].id < pair[1].id);
            }
        }
    }
}
