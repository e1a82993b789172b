//! Wire protocol for the assistant chat endpoint.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from the assistant endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// Assistant reply.
    Message {
        #[serde(rename = "message")]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
        #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
    /// Remote started or stopped composing.
    Typing { is_typing: bool },
    /// Notice from the endpoint, such as the welcome line.
    System {
        #[serde(rename = "message")]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
    /// The endpoint failed to process a request.
    Error {
        #[serde(rename = "message")]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Frame that did not decode; passed through as received.
    #[serde(skip)]
    Raw { data: String },
}

impl InboundEnvelope {
    /// Plain assistant reply.
    #[must_use]
    pub fn message(text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::Message {
            text: text.into(),
            timestamp: Some(timestamp.into()),
            intent: None,
            payload: None,
            conversation_id: None,
            suggestions: Vec::new(),
        }
    }

    /// System notice.
    #[must_use]
    pub fn system(text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::System {
            text: text.into(),
            timestamp: Some(timestamp.into()),
            suggestions: Vec::new(),
        }
    }

    /// Composing indicator.
    #[must_use]
    pub const fn typing(is_typing: bool) -> Self {
        Self::Typing { is_typing }
    }

    /// Follow-up prompts offered with this envelope.
    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::Message { suggestions, .. } | Self::System { suggestions, .. } => suggestions,
            _ => &[],
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error for [`InboundEnvelope::Raw`], which has no wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame that could not be decoded into an envelope.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct DecodeError {
    /// Decoder message.
    pub reason: String,
    /// Frame contents as received (binary is converted lossily).
    pub raw: String,
}

impl DecodeError {
    /// Opaque envelope carrying the undecodable frame.
    #[must_use]
    pub fn into_raw(self) -> InboundEnvelope {
        InboundEnvelope::Raw { data: self.raw }
    }
}

/// Decode a text frame.
///
/// # Errors
/// Returns error if the frame is not JSON or has an unknown `type`.
pub fn decode(text: &str) -> Result<InboundEnvelope, DecodeError> {
    serde_json::from_str(text).map_err(|e| DecodeError {
        reason: e.to_string(),
        raw: text.to_string(),
    })
}

/// Decode a binary frame carrying UTF-8 JSON.
///
/// # Errors
/// Returns error if the bytes are not UTF-8 or fail [`decode`].
pub fn decode_binary(data: &[u8]) -> Result<InboundEnvelope, DecodeError> {
    match std::str::from_utf8(data) {
        Ok(text) => decode(text),
        Err(e) => Err(DecodeError {
            reason: format!("binary frame is not UTF-8: {e}"),
            raw: String::from_utf8_lossy(data).into_owned(),
        }),
    }
}

/// File sent alongside a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// File contents (base64 encoded).
    pub data: String,
}

impl Attachment {
    /// Create an attachment from raw bytes.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: BASE64.encode(data),
        }
    }

    /// Decode the file contents from base64.
    #[must_use]
    pub fn decode_data(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.data).ok()
    }
}

/// Request to the assistant endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundRequest {
    /// User chat input.
    Chat {
        #[serde(rename = "message")]
        text: String,
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
}

impl OutboundRequest {
    /// Plain chat request.
    #[must_use]
    pub fn chat(text: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::Chat {
            text: text.into(),
            conversation_id: conversation_id.into(),
            attachments: Vec::new(),
        }
    }

    /// Replace the attachments of a chat request.
    #[must_use]
    pub fn with_attachments(self, files: Vec<Attachment>) -> Self {
        match self {
            Self::Chat {
                text,
                conversation_id,
                ..
            } => Self::Chat {
                text,
                conversation_id,
                attachments: files,
            },
        }
    }

    /// Whether the request needs the attachment capability.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        match self {
            Self::Chat { attachments, .. } => !attachments.is_empty(),
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_backend_message() {
        let frame = json!({
            "type": "message",
            "message": "Here is your pipeline",
            "intent": "show_opportunities",
            "data": {"success": true, "data": {"count": 3}},
            "conversation_id": "default",
            "timestamp": "2024-05-01T10:00:00"
        })
        .to_string();

        match decode(&frame).unwrap() {
            InboundEnvelope::Message {
                text,
                timestamp,
                intent,
                payload,
                ..
            } => {
                assert_eq!(text, "Here is your pipeline");
                assert_eq!(timestamp.as_deref(), Some("2024-05-01T10:00:00"));
                assert_eq!(intent.as_deref(), Some("show_opportunities"));
                assert_eq!(payload.unwrap()["data"]["count"], 3);
            }
            other => panic!("Wrong envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decode_null_intent_and_extra_fields() {
        let frame = r#"{"type":"message","message":"hi","intent":null,"data":null,"extra":1}"#;
        let env = decode(frame).unwrap();
        assert_eq!(
            env,
            InboundEnvelope::Message {
                text: "hi".into(),
                timestamp: None,
                intent: None,
                payload: None,
                conversation_id: None,
                suggestions: Vec::new(),
            }
        );
    }

    #[test]
    fn test_decode_typing_and_system() {
        let typing = decode(r#"{"type":"typing","is_typing":true,"timestamp":"t"}"#).unwrap();
        assert_eq!(typing, InboundEnvelope::typing(true));

        let system = decode(
            r#"{"type":"system","message":"Connected","timestamp":"t","suggestions":["Show recent contacts"]}"#,
        )
        .unwrap();
        assert_eq!(system.suggestions(), ["Show recent contacts".to_string()]);
    }

    #[test]
    fn test_malformed_frames_keep_their_contents() {
        let err = decode("not json").unwrap_err();
        assert_eq!(err.clone().into_raw(), InboundEnvelope::Raw { data: "not json".into() });

        let unknown = decode(r#"{"type":"presence","user":"x"}"#).unwrap_err();
        assert!(unknown.raw.contains("presence"));

        let binary = decode_binary(&[0xff, 0xfe]).unwrap_err();
        assert!(binary.reason.contains("UTF-8"));

        tokio_test::assert_err!(decode(r#"{"type":"message"}"#));
        tokio_test::assert_ok!(decode_binary(br#"{"type":"typing","is_typing":false}"#));
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let json: Value =
            serde_json::from_str(&OutboundRequest::chat("Show pipeline", "default").encode().unwrap())
                .unwrap();
        assert_eq!(
            json,
            json!({"type": "chat", "message": "Show pipeline", "conversation_id": "default"})
        );
    }

    #[test]
    fn test_attachment_roundtrip() {
        let file = Attachment::from_bytes("notes.txt", "text/plain", b"call back Friday");
        let request = OutboundRequest::chat("see file", "default").with_attachments(vec![file]);
        assert!(request.has_attachments());

        let parsed: OutboundRequest = serde_json::from_str(&request.encode().unwrap()).unwrap();
        let OutboundRequest::Chat { attachments, .. } = parsed;
        assert_eq!(attachments[0].decode_data().unwrap(), b"call back Friday");
    }

    #[test]
    fn test_raw_has_no_wire_form() {
        tokio_test::assert_err!(InboundEnvelope::Raw { data: "x".into() }.encode());
    }
}
