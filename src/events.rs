use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notification pushed to the front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "onConnecting")]
    Connecting,
    #[serde(rename = "onConnectionSuccess")]
    ConnectionSuccess,
    #[serde(rename = "onConnectionFailed")]
    ConnectionFailed,
    #[serde(rename = "onCallEstablished")]
    CallEstablished,
    #[serde(rename = "onCallEnded")]
    CallEnded,
    #[serde(rename = "onIncomingCall")]
    IncomingCall {
        #[serde(rename = "callerId")]
        caller_id: String,
    },
}

impl SessionEvent {
    /// Name of the front-end listener callback this event maps to
    pub fn listener_name(&self) -> &'static str {
        match self {
            SessionEvent::Connecting => "onConnecting",
            SessionEvent::ConnectionSuccess => "onConnectionSuccess",
            SessionEvent::ConnectionFailed => "onConnectionFailed",
            SessionEvent::CallEstablished => "onCallEstablished",
            SessionEvent::CallEnded => "onCallEnded",
            SessionEvent::IncomingCall { .. } => "onIncomingCall",
        }
    }
}

/// Fan-out of session notifications; events without subscribers are dropped
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!("[Session] Notify {}", event.listener_name());
        if self.tx.send(event).is_err() {
            tracing::debug!("[Session] No subscribers, notification dropped");
        }
    }
}
