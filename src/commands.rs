use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::error::{SipError, SipResult};
use crate::events::SessionEvent;
use crate::session::SessionService;
use crate::settings::CredentialStore;

/// Channel name notifications are emitted on
pub const EVENT_CHANNEL: &str = "sip-event";

/// Whatever renders notifications (web view, plugin bridge, ...)
pub trait FrontEnd: Send + Sync {
    fn emit(&self, channel: &str, payload: Value);
}

/// One front-end request, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init,
    Connect {
        domain: String,
        username: String,
        password: String,
        remember: bool,
    },
    Disconnect,
    MakeCall {
        domain: String,
        username: String,
    },
    EndCall,
    TakeCall,
    RejectCall,
    SpeakerMode(bool),
}

#[derive(Deserialize)]
struct ConnectArgs {
    domain: String,
    username: String,
    password: String,
    #[serde(default)]
    remember: bool,
}

#[derive(Deserialize)]
struct CallArgs {
    domain: String,
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeakerArgs {
    speaker_mode: bool,
}

fn args<T: DeserializeOwned>(action: &str, payload: Option<&Value>) -> SipResult<T> {
    let payload = payload.cloned().unwrap_or(Value::Null);
    serde_json::from_value(payload)
        .map_err(|e| SipError::invalid_argument(format!("{}: {}", action, e)))
}

impl Command {
    pub fn parse(action: &str, payload: Option<&Value>) -> SipResult<Self> {
        let command = match action {
            "init" => Command::Init,
            "connect" => {
                let a: ConnectArgs = args(action, payload)?;
                Command::Connect {
                    domain: a.domain,
                    username: a.username,
                    password: a.password,
                    remember: a.remember,
                }
            }
            "disconnect" => Command::Disconnect,
            "make_call" => {
                let a: CallArgs = args(action, payload)?;
                Command::MakeCall {
                    domain: a.domain,
                    username: a.username,
                }
            }
            "end_call" => Command::EndCall,
            "take_call" => Command::TakeCall,
            "reject_call" => Command::RejectCall,
            "speaker_mode" => {
                let a: SpeakerArgs = args(action, payload)?;
                Command::SpeakerMode(a.speaker_mode)
            }
            other => {
                return Err(SipError::invalid_argument(format!("unknown action '{}'", other)));
            }
        };
        Ok(command)
    }
}

/// Uniform reply to every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandReply {
    Success,
    Error { kind: String, message: String },
}

impl From<SipResult<()>> for CommandReply {
    fn from(result: SipResult<()>) -> Self {
        match result {
            Ok(()) => CommandReply::Success,
            Err(e) => CommandReply::Error {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Runs front-end commands against a session and forwards its notifications after `init`
pub struct CommandBridge {
    session: Arc<SessionService>,
    front_end: Arc<dyn FrontEnd>,
    credentials: Option<CredentialStore>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl CommandBridge {
    pub fn new(
        session: Arc<SessionService>,
        front_end: Arc<dyn FrontEnd>,
        credentials: Option<CredentialStore>,
    ) -> Self {
        Self {
            session,
            front_end,
            credentials,
            forwarder: Mutex::new(None),
        }
    }

    /// Bridge whose `remember` flag writes to the store named by `config.credentials_path`
    pub fn from_config(
        session: Arc<SessionService>,
        front_end: Arc<dyn FrontEnd>,
        config: &SessionConfig,
    ) -> Self {
        Self::new(session, front_end, config.credential_store())
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    /// Parse and run one command; never fails, errors are folded into the reply
    pub async fn dispatch(&self, action: &str, payload: Option<&Value>) -> CommandReply {
        tracing::debug!("[Bridge] Command: {}", action);

        let result = match Command::parse(action, payload) {
            Ok(command) => self.execute(command).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!("[Bridge] {} failed: {}", action, e);
        }
        result.into()
    }

    pub async fn execute(&self, command: Command) -> SipResult<()> {
        match command {
            Command::Init => {
                self.init();
                Ok(())
            }
            Command::Connect {
                domain,
                username,
                password,
                remember,
            } => {
                self.session.connect(&domain, &username, &password).await?;
                if remember {
                    self.remember(&domain, &username, &password);
                }
                Ok(())
            }
            Command::Disconnect => {
                self.session.disconnect().await;
                Ok(())
            }
            Command::MakeCall { domain, username } => self.session.make_call(&domain, &username).await,
            Command::EndCall => self.session.end_call().await,
            Command::TakeCall => self.session.take_call().await,
            Command::RejectCall => self.session.reject_call().await,
            Command::SpeakerMode(enabled) => {
                self.session.set_speaker_mode(enabled).await;
                Ok(())
            }
        }
    }

    /// Start forwarding notifications to the front end. Repeated calls are no-ops.
    pub fn init(&self) {
        let mut forwarder = self.forwarder.lock().unwrap_or_else(PoisonError::into_inner);
        if forwarder.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("[Bridge] Already initialized");
            return;
        }

        let rx = self.session.subscribe();
        *forwarder = Some(tokio::spawn(forward_events(rx, self.front_end.clone())));
        tracing::info!("[Bridge] Forwarding notifications on '{}'", EVENT_CHANNEL);
    }

    fn remember(&self, domain: &str, username: &str, password: &str) {
        let Some(store) = &self.credentials else {
            tracing::debug!("[Bridge] No credential store configured, not remembering");
            return;
        };
        if let Err(e) = store.save(domain, username, password) {
            tracing::warn!("[Bridge] Failed to save credentials: {}", e);
        }
    }
}

impl Drop for CommandBridge {
    fn drop(&mut self) {
        let forwarder = self.forwarder.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = forwarder.take() {
            task.abort();
        }
    }
}

async fn forward_events(mut rx: broadcast::Receiver<SessionEvent>, front_end: Arc<dyn FrontEnd>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_value(&event) {
                Ok(payload) => front_end.emit(EVENT_CHANNEL, payload),
                Err(e) => tracing::error!("[Bridge] Failed to serialize {}: {}", event.listener_name(), e),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("[Bridge] Front end fell behind, {} notifications dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("[Bridge] Notification forwarding stopped");
}
