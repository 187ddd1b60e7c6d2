//! Boundary to the underlying SIP stack.
//!
//! The session never speaks SIP itself. A [`SipTransport`] implementation wraps whatever
//! stack the application ships and posts asynchronous results back through the sink objects
//! it is handed: [`RegistrationSink`], [`IncomingCallSink`] and [`CallSink`]. Sinks are cheap
//! to clone and may be used from any thread; they only push onto the session's event channel.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;
use crate::profile::SipProfile;

pub type TransportResult<T> = Result<T, TransportError>;

/// Sender half of the session's transport event channel
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Locally generated identifier tagging one call's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Which registration listener an event was delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationListener {
    /// Installed by `register` during connect
    Primary,
    /// Installed after the first successful registration to watch refreshes and losses
    PostRegistration,
    /// Installed by `unregister` during disconnect
    Unregister,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    Registering,
    Done { expiry_secs: u64 },
    Failed { code: i32, message: String },
}

/// Which side created the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Ringing { caller: String },
    Established,
    Ended,
    Error { code: i32, message: String },
}

/// Opaque token for an inbound call the transport announced but nobody took yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallRequest {
    pub call_key: String,
}

impl IncomingCallRequest {
    pub fn new(call_key: impl Into<String>) -> Self {
        Self {
            call_key: call_key.into(),
        }
    }
}

/// Everything a transport can report back to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Registration {
        listener: RegistrationListener,
        profile_uri: String,
        event: RegistrationEvent,
    },
    IncomingCall(IncomingCallRequest),
    Call {
        call_id: CallId,
        direction: CallDirection,
        event: CallEvent,
    },
}

fn post(tx: &EventSender, event: TransportEvent) {
    if tx.send(event).is_err() {
        tracing::debug!("[Transport] Session gone, dropping event");
    }
}

/// Registration listener handed to `register`, `set_registration_listener` and `unregister`
#[derive(Clone)]
pub struct RegistrationSink {
    listener: RegistrationListener,
    tx: EventSender,
}

impl RegistrationSink {
    pub fn new(listener: RegistrationListener, tx: EventSender) -> Self {
        Self { listener, tx }
    }

    pub fn listener(&self) -> RegistrationListener {
        self.listener
    }

    pub fn on_registering(&self, profile_uri: &str) {
        self.emit(profile_uri, RegistrationEvent::Registering);
    }

    pub fn on_registration_done(&self, profile_uri: &str, expiry_secs: u64) {
        self.emit(profile_uri, RegistrationEvent::Done { expiry_secs });
    }

    pub fn on_registration_failed(&self, profile_uri: &str, code: i32, message: impl Into<String>) {
        self.emit(
            profile_uri,
            RegistrationEvent::Failed {
                code,
                message: message.into(),
            },
        );
    }

    fn emit(&self, profile_uri: &str, event: RegistrationEvent) {
        post(
            &self.tx,
            TransportEvent::Registration {
                listener: self.listener,
                profile_uri: profile_uri.to_string(),
                event,
            },
        );
    }
}

/// Target for inbound call announcements, handed to `open`
#[derive(Clone)]
pub struct IncomingCallSink {
    tx: EventSender,
}

impl IncomingCallSink {
    pub fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    pub fn on_incoming_call(&self, request: IncomingCallRequest) {
        post(&self.tx, TransportEvent::IncomingCall(request));
    }
}

/// Per-call listener; carries the call id so events can be matched to the right slot
#[derive(Clone)]
pub struct CallSink {
    call_id: CallId,
    direction: CallDirection,
    tx: EventSender,
}

impl CallSink {
    pub fn new(call_id: CallId, direction: CallDirection, tx: EventSender) -> Self {
        Self {
            call_id,
            direction,
            tx,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn on_ringing(&self, caller: impl Into<String>) {
        self.emit(CallEvent::Ringing {
            caller: caller.into(),
        });
    }

    pub fn on_call_established(&self) {
        self.emit(CallEvent::Established);
    }

    pub fn on_call_ended(&self) {
        self.emit(CallEvent::Ended);
    }

    pub fn on_error(&self, code: i32, message: impl Into<String>) {
        self.emit(CallEvent::Error {
            code,
            message: message.into(),
        });
    }

    fn emit(&self, event: CallEvent) {
        post(
            &self.tx,
            TransportEvent::Call {
                call_id: self.call_id,
                direction: self.direction,
                event,
            },
        );
    }
}

/// A live audio call owned by the transport
#[async_trait]
pub trait AudioCall: Send + Sync {
    /// Attach the listener; with `call_now` the transport replays the current call state to it
    fn set_listener(&self, listener: CallSink, call_now: bool) -> TransportResult<()>;

    async fn answer(&self, timeout: Duration) -> TransportResult<()>;

    async fn end(&self) -> TransportResult<()>;

    fn start_audio(&self);

    fn is_muted(&self) -> bool;

    fn toggle_mute(&self);

    fn set_speaker_mode(&self, enabled: bool);

    /// Release local resources; the call object is unusable afterwards
    fn close(&self);
}

/// Primitive operations of the SIP stack the session orchestrates
#[async_trait]
pub trait SipTransport: Send + Sync {
    /// Whether SIP is available at all on this device
    fn is_supported(&self) -> bool;

    async fn open(&self, profile: &SipProfile, incoming: IncomingCallSink) -> TransportResult<()>;

    async fn register(
        &self,
        profile: &SipProfile,
        expiry: Duration,
        listener: RegistrationSink,
    ) -> TransportResult<()>;

    /// Replace the registration listener for an already registered profile
    async fn set_registration_listener(
        &self,
        profile_uri: &str,
        listener: RegistrationSink,
    ) -> TransportResult<()>;

    async fn is_registered(&self, profile_uri: &str) -> TransportResult<bool>;

    async fn close(&self, profile_uri: &str) -> TransportResult<()>;

    async fn unregister(&self, profile: &SipProfile, listener: RegistrationSink) -> TransportResult<()>;

    async fn make_audio_call(
        &self,
        local: &SipProfile,
        peer: &SipProfile,
        listener: CallSink,
        timeout: Duration,
    ) -> TransportResult<Box<dyn AudioCall>>;

    /// Turn an announced inbound call into a call object without answering it
    async fn take_audio_call(&self, request: IncomingCallRequest) -> TransportResult<Box<dyn AudioCall>>;
}
