//! Registration and call session core for a single-user SIP softphone.
//!
//! [`SessionService`] drives a [`SipTransport`] on behalf of one local account: it registers
//! the account, places and answers audio calls, and reports what happens as
//! [`SessionEvent`] notifications. [`CommandBridge`] exposes the same operations as
//! `(action, JSON payload)` commands for a front end.

pub mod call;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod profile;
pub mod registration;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod testing;

pub use call::CallState;
pub use commands::{Command, CommandBridge, CommandReply, FrontEnd, EVENT_CHANNEL};
pub use config::{LogConfig, SessionConfig};
pub use error::{CallError, ConnectError, SettingsError, SipError, SipResult, TransportError};
pub use events::SessionEvent;
pub use host::{ActivityIndicator, HostServices, IndicatorStatus, WakeSource};
pub use logging::init_logging;
pub use profile::{ProfileError, SipProfile};
pub use registration::RegistrationState;
pub use session::{SessionService, SessionSnapshot};
pub use settings::{CredentialStore, SipCredentials};
pub use transport::{
    AudioCall, CallDirection, CallEvent, CallId, CallSink, IncomingCallRequest, IncomingCallSink,
    RegistrationEvent, RegistrationListener, RegistrationSink, SipTransport, TransportEvent,
};
