//! Connection state machine.
//!
//! Pure transition logic for the reconnecting client: every input yields the
//! actions the driver must perform, in order. No I/O and no timers live here,
//! which keeps the backoff and cancellation rules testable without a runtime.

use std::time::Duration;

use ghl_chat_core::{
    ConnectionState, ReconnectPolicy, TransportError,
    traits::{CLOSE_NORMAL, is_normal_closure},
};

use crate::{
    events::{ClientError, ClientEvent},
    protocol::OutboundRequest,
};

/// Reason sent with a user-initiated close.
pub const USER_CLOSE_REASON: &str = "User disconnected";

/// Something that happened to the client.
#[derive(Debug, Clone)]
pub enum Input {
    Connect,
    Disconnect,
    Reconnect,
    Send(OutboundRequest),
    /// The pending open produced a session.
    Opened,
    /// The pending open failed.
    OpenFailed(TransportError),
    /// The open session ended.
    Closed { code: u16, reason: String },
    /// The backoff timer elapsed.
    TimerFired,
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start opening a new session.
    Open,
    /// Drop any pending open and close the current session, if any.
    Close { code: u16, reason: &'static str },
    /// Arm the backoff timer, replacing any armed one.
    Schedule { delay: Duration },
    /// Disarm the backoff timer.
    CancelTimer,
    /// Write a request to the open session.
    Transmit(OutboundRequest),
    /// Notify the observer.
    Emit(ClientEvent),
}

/// Reconnect-with-backoff state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: ReconnectPolicy,
    attachments: bool,
    state: ConnectionState,
    attempts: u32,
}

impl ConnectionMachine {
    /// Create a disconnected machine.
    #[must_use]
    pub const fn new(policy: ReconnectPolicy, attachments: bool) -> Self {
        Self {
            policy,
            attachments,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Automatic attempts made since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Apply an input.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        match input {
            Input::Connect => self.connect(),
            Input::Disconnect => self.disconnect(),
            Input::Reconnect => {
                let mut actions = self.disconnect();
                self.attempts = 0;
                actions.extend(self.connect());
                actions
            }
            Input::Send(request) => self.send(request),
            Input::Opened => self.opened(),
            Input::OpenFailed(err) => {
                if self.state != ConnectionState::Connecting {
                    return Vec::new();
                }
                let mut actions = vec![Action::Emit(ClientEvent::Error(ClientError::Connect(err)))];
                actions.extend(self.dropped());
                actions
            }
            Input::Closed { code, reason } => self.closed(code, reason),
            Input::TimerFired => {
                if self.state == ConnectionState::Connecting {
                    vec![Action::Open]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn connect(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::CancelTimer, Action::Open]
    }

    fn disconnect(&mut self) -> Vec<Action> {
        let was = self.state;
        self.state = ConnectionState::Disconnected;

        let mut actions = vec![
            Action::CancelTimer,
            Action::Close {
                code: CLOSE_NORMAL,
                reason: USER_CLOSE_REASON,
            },
        ];
        if was == ConnectionState::Connected {
            actions.push(Action::Emit(ClientEvent::Disconnected {
                code: CLOSE_NORMAL,
                reason: USER_CLOSE_REASON.to_string(),
            }));
        }
        actions
    }

    fn send(&self, request: OutboundRequest) -> Vec<Action> {
        if !self.state.is_connected() {
            return vec![Action::Emit(ClientEvent::Error(ClientError::NotConnected))];
        }
        if request.has_attachments() && !self.attachments {
            return vec![Action::Emit(ClientEvent::Error(
                ClientError::AttachmentsUnsupported,
            ))];
        }
        vec![Action::Transmit(request)]
    }

    fn opened(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            // Stale session; nobody asked for it any more.
            return vec![Action::Close {
                code: CLOSE_NORMAL,
                reason: USER_CLOSE_REASON,
            }];
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        vec![Action::Emit(ClientEvent::Connected)]
    }

    fn closed(&mut self, code: u16, reason: String) -> Vec<Action> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        let mut actions = vec![Action::Emit(ClientEvent::Disconnected { code, reason })];
        if is_normal_closure(code) {
            self.state = ConnectionState::Disconnected;
        } else {
            actions.extend(self.dropped());
        }
        actions
    }

    /// Schedule the next automatic attempt, or give up.
    fn dropped(&mut self) -> Vec<Action> {
        if !self.policy.allows(self.attempts) {
            self.state = ConnectionState::Disconnected;
            return vec![Action::Emit(ClientEvent::Error(
                ClientError::ReconnectExhausted {
                    attempts: self.attempts,
                },
            ))];
        }

        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::Connecting;
        vec![
            Action::Schedule { delay },
            Action::Emit(ClientEvent::ReconnectScheduled {
                attempt: self.attempts,
                delay,
            }),
        ]
    }
}
