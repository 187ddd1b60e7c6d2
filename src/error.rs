use thiserror::Error;

use crate::profile::ProfileError;

/// Result type for session operations
pub type SipResult<T> = Result<T, SipError>;

/// Failure reported by the underlying SIP stack
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("SIP error {code}: {message}")]
    Sip { code: i32, message: String },

    #[error("transport closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn sip(code: i32, message: impl Into<String>) -> Self {
        Self::Sip {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Why a `connect` request was refused or failed
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("SIP is not supported on this device")]
    Unsupported,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("invalid local profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Why a call operation failed
#[derive(Debug, Error)]
pub enum CallError {
    #[error("no local profile, connect first")]
    NoProfile,

    #[error("invalid remote profile: {0}")]
    InvalidPeer(#[from] ProfileError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Credential and configuration file failures
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decode stored password: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors surfaced by the session façade and the command bridge
#[derive(Debug, Error)]
pub enum SipError {
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("call failed: {0}")]
    Call(#[from] CallError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl SipError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Stable identifier used in command replies
    pub fn kind(&self) -> &'static str {
        match self {
            SipError::Connect(ConnectError::Unsupported) => "unsupported",
            SipError::Connect(ConnectError::AlreadyRegistered) => "already-registered",
            SipError::Connect(_) => "connect",
            SipError::Call(_) => "call",
            SipError::InvalidArgument(_) => "invalid-argument",
            SipError::Settings(_) => "settings",
        }
    }
}
