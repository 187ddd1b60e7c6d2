use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::call::{CallController, CallState};
use crate::config::SessionConfig;
use crate::error::SipResult;
use crate::events::{Notifier, SessionEvent};
use crate::host::{HostServices, IndicatorStatus};
use crate::registration::{RegistrationCoordinator, RegistrationState};
use crate::settings::CredentialStore;
use crate::transport::{SipTransport, TransportEvent};

/// Read-only view of the session for front ends and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub registration: RegistrationState,
    pub call: CallState,
    pub profile_uri: Option<String>,
    pub has_current_call: bool,
    pub has_pending_call: bool,
    pub indicator: Option<IndicatorStatus>,
}

// Everything behind the session lock
struct Session {
    registration: RegistrationCoordinator,
    calls: CallController,
}

impl Session {
    async fn apply(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Registration {
                listener,
                profile_uri,
                event,
            } => {
                self.registration
                    .on_registration_event(listener, &profile_uri, event)
                    .await
            }
            TransportEvent::IncomingCall(request) => {
                let accepting = self.registration.accepts_incoming_calls().await;
                self.calls.on_incoming_call(request, accepting).await;
            }
            TransportEvent::Call {
                call_id,
                direction,
                event,
            } => self.calls.on_call_event(call_id, direction, event).await,
        }
    }
}

/// The single entry point for driving one user's SIP session.
///
/// Commands and transport events are serialized through one lock. Transport operations are
/// awaited while it is held; their final outcome arrives later as events, which a background
/// task applies in delivery order. Must be created inside a tokio runtime.
pub struct SessionService {
    session: Arc<Mutex<Session>>,
    notifier: Notifier,
    dispatcher: JoinHandle<()>,
}

impl SessionService {
    pub fn new(transport: Arc<dyn SipTransport>, host: HostServices, config: SessionConfig) -> Self {
        let notifier = Notifier::new(config.event_capacity);
        let (tx, rx) = mpsc::unbounded_channel();

        let registration = RegistrationCoordinator::new(
            transport.clone(),
            host.indicator,
            notifier.clone(),
            tx.clone(),
            &config,
        );
        let calls = CallController::new(transport, host.wake, notifier.clone(), tx, &config);

        let session = Arc::new(Mutex::new(Session {
            registration,
            calls,
        }));
        let dispatcher = tokio::spawn(dispatch_events(Arc::downgrade(&session), rx));

        tracing::info!("[Session] Session service started");
        Self {
            session,
            notifier,
            dispatcher,
        }
    }

    /// Receive every notification emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub async fn connect(&self, domain: &str, username: &str, password: &str) -> SipResult<()> {
        let mut guard = self.session.lock().await;
        let Session {
            registration,
            calls,
        } = &mut *guard;
        registration.connect(calls, domain, username, password).await?;
        Ok(())
    }

    /// Connect with the credentials in `store`; `false` when nothing is saved
    pub async fn reconnect_saved(&self, store: &CredentialStore) -> SipResult<bool> {
        let Some(credentials) = store.load()? else {
            tracing::info!("[Session] No saved credentials to reconnect with");
            return Ok(false);
        };

        tracing::info!("[Session] Reconnecting with saved credentials for {}", credentials.username);
        self.connect(&credentials.domain, &credentials.username, &credentials.password)
            .await?;
        Ok(true)
    }

    pub async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        let Session {
            registration,
            calls,
        } = &mut *guard;
        registration.disconnect(calls).await;
    }

    pub async fn make_call(&self, domain: &str, username: &str) -> SipResult<()> {
        let mut guard = self.session.lock().await;
        let Session {
            registration,
            calls,
        } = &mut *guard;
        calls.make_call(registration.profile(), username, domain).await?;
        Ok(())
    }

    pub async fn end_call(&self) -> SipResult<()> {
        self.session.lock().await.calls.end_current_call().await?;
        Ok(())
    }

    pub async fn take_call(&self) -> SipResult<()> {
        self.session.lock().await.calls.take_call().await?;
        Ok(())
    }

    pub async fn reject_call(&self) -> SipResult<()> {
        self.session.lock().await.calls.reject_incoming_call().await?;
        Ok(())
    }

    pub async fn set_speaker_mode(&self, enabled: bool) {
        self.session.lock().await.calls.set_speaker_mode(enabled);
    }

    pub async fn is_registered(&self) -> bool {
        self.session.lock().await.registration.is_registered().await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.session.lock().await;
        SessionSnapshot {
            registration: guard.registration.state(),
            call: guard.calls.state().clone(),
            profile_uri: guard.registration.profile().map(|p| p.uri_string()),
            has_current_call: guard.calls.has_current_call(),
            has_pending_call: guard.calls.has_pending_call(),
            indicator: guard.registration.indicator_status(),
        }
    }

    /// Apply one transport event directly, bypassing the event channel
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        self.session.lock().await.apply(event).await;
    }

    /// Disconnect and stop applying transport events
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.dispatcher.abort();
        tracing::info!("[Session] Session service stopped");
    }
}

impl Drop for SessionService {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch_events(session: Weak<Mutex<Session>>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        tracing::trace!("[Session] Applying {:?}", event);
        session.lock().await.apply(event).await;
    }
    tracing::debug!("[Session] Event dispatcher stopped");
}
