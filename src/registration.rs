use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::call::CallController;
use crate::cleanup::Cleanup;
use crate::config::SessionConfig;
use crate::error::ConnectError;
use crate::events::{Notifier, SessionEvent};
use crate::host::{ActivityIndicator, IndicatorGuard, IndicatorStatus};
use crate::profile::SipProfile;
use crate::transport::{
    EventSender, IncomingCallSink, RegistrationEvent, RegistrationListener, RegistrationSink,
    SipTransport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RegistrationState {
    Disconnected,
    Registering,
    Registered,
    RegistrationFailed,
}

/// Owns the local profile and drives register/unregister against the transport
pub struct RegistrationCoordinator {
    transport: Arc<dyn SipTransport>,
    indicator: Arc<dyn ActivityIndicator>,
    notifier: Notifier,
    events: EventSender,
    expiry: Duration,
    auto_register: bool,
    revert_on_loss: bool,
    profile: Option<SipProfile>,
    state: RegistrationState,
    incoming_subscribed: bool,
    indicator_guard: Option<IndicatorGuard>,
}

impl RegistrationCoordinator {
    pub fn new(
        transport: Arc<dyn SipTransport>,
        indicator: Arc<dyn ActivityIndicator>,
        notifier: Notifier,
        events: EventSender,
        config: &SessionConfig,
    ) -> Self {
        Self {
            transport,
            indicator,
            notifier,
            events,
            expiry: config.registration_expiry(),
            auto_register: config.auto_register,
            revert_on_loss: config.revert_on_registration_loss,
            profile: None,
            state: RegistrationState::Disconnected,
            incoming_subscribed: false,
            indicator_guard: None,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn profile(&self) -> Option<&SipProfile> {
        self.profile.as_ref()
    }

    pub fn indicator_status(&self) -> Option<IndicatorStatus> {
        self.indicator_guard.as_ref().map(IndicatorGuard::status)
    }

    /// Open the profile and start registering.
    ///
    /// The outcome of the registration itself arrives later as a transport event. Any failure
    /// here tears the session back down to `Disconnected` before returning.
    pub async fn connect(
        &mut self,
        calls: &mut CallController,
        domain: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ConnectError> {
        if !self.transport.is_supported() {
            tracing::warn!("[Registration] SIP is not supported by the transport");
            return Err(ConnectError::Unsupported);
        }
        if self.state != RegistrationState::Disconnected {
            tracing::warn!("[Registration] Connect refused, state is {:?}", self.state);
            return Err(ConnectError::AlreadyRegistered);
        }

        tracing::info!("[Registration] Connecting {}@{}", username, domain);

        if let Err(e) = self.open_and_register(domain, username, password).await {
            tracing::error!("[Registration] Failed to connect: {}", e);
            self.disconnect(calls).await;
            return Err(e);
        }
        Ok(())
    }

    async fn open_and_register(
        &mut self,
        domain: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ConnectError> {
        let profile = SipProfile::builder(username, domain)
            .password(password)
            .auto_registration(self.auto_register)
            .build()?;
        self.profile = Some(profile.clone());

        self.transport
            .open(&profile, IncomingCallSink::new(self.events.clone()))
            .await?;

        self.state = RegistrationState::Registering;
        self.transport
            .register(
                &profile,
                self.expiry,
                RegistrationSink::new(RegistrationListener::Primary, self.events.clone()),
            )
            .await?;

        Ok(())
    }

    /// Tear everything down. Safe to call any number of times; never fails.
    pub async fn disconnect(&mut self, calls: &mut CallController) {
        let mut cleanup = Cleanup::new("Disconnect");

        cleanup.attempt("end current call", calls.end_current_call().await);
        cleanup.attempt("reject incoming call", calls.reject_incoming_call().await);
        cleanup.attempt("abandon outgoing call", calls.abandon_outgoing().await);

        if let Some(profile) = self.profile.take() {
            let uri = profile.uri_string();
            cleanup.attempt("close local profile", self.transport.close(&uri).await);
            cleanup.attempt(
                "unregister local profile",
                self.transport
                    .unregister(
                        &profile,
                        RegistrationSink::new(RegistrationListener::Unregister, self.events.clone()),
                    )
                    .await,
            );
            tracing::info!("[Registration] Disconnected {}", uri);
        }

        if self.incoming_subscribed {
            self.incoming_subscribed = false;
            tracing::debug!("[Registration] Incoming call subscription dropped");
        }
        self.indicator_guard = None;
        self.state = RegistrationState::Disconnected;

        cleanup.finish();
    }

    /// Profile exists and the transport says it is registered; query errors count as no
    pub async fn is_registered(&self) -> bool {
        let Some(profile) = &self.profile else {
            return false;
        };

        match self.transport.is_registered(&profile.uri_string()).await {
            Ok(registered) => registered,
            Err(e) => {
                tracing::error!("[Registration] Registration query failed: {}", e);
                false
            }
        }
    }

    pub async fn accepts_incoming_calls(&self) -> bool {
        self.incoming_subscribed && self.is_registered().await
    }

    pub async fn on_registration_event(
        &mut self,
        listener: RegistrationListener,
        profile_uri: &str,
        event: RegistrationEvent,
    ) {
        if listener == RegistrationListener::Unregister {
            match event {
                RegistrationEvent::Registering => tracing::info!("[Registration] Disconnecting"),
                RegistrationEvent::Done { .. } => tracing::info!("[Registration] Disconnect succeeded"),
                RegistrationEvent::Failed { code, message } => {
                    tracing::error!("[Registration] Disconnect failed ({}): {}", code, message)
                }
            }
            return;
        }

        let current = self.profile.as_ref().map(SipProfile::uri_string);
        if current.as_deref() != Some(profile_uri) {
            tracing::debug!("[Registration] Ignoring event for stale profile {}", profile_uri);
            return;
        }

        match listener {
            RegistrationListener::Primary => self.on_primary_event(profile_uri, event).await,
            _ => self.on_post_registration_event(event),
        }
    }

    async fn on_primary_event(&mut self, profile_uri: &str, event: RegistrationEvent) {
        match event {
            RegistrationEvent::Registering => {
                tracing::info!("[Registration] Registering with SIP server...");
                self.state = RegistrationState::Registering;
                self.notifier.emit(SessionEvent::Connecting);
            }
            RegistrationEvent::Done { expiry_secs } => {
                tracing::info!("[Registration] ✓ Registered (expires in {}s)", expiry_secs);
                self.state = RegistrationState::Registered;

                if !self.incoming_subscribed {
                    self.incoming_subscribed = true;
                    tracing::debug!("[Registration] Incoming call subscription installed");
                }
                if self.indicator_guard.is_none() {
                    self.indicator_guard = Some(IndicatorGuard::show(
                        self.indicator.clone(),
                        IndicatorStatus::Active,
                    ));
                }

                let post = RegistrationSink::new(RegistrationListener::PostRegistration, self.events.clone());
                if let Err(e) = self.transport.set_registration_listener(profile_uri, post).await {
                    tracing::error!("[Registration] Error setting post registration listener: {}", e);
                }

                self.notifier.emit(SessionEvent::ConnectionSuccess);
            }
            RegistrationEvent::Failed { code, message } => {
                tracing::warn!("[Registration] Registration failed ({}): {}", code, message);
                self.state = RegistrationState::RegistrationFailed;
                self.notifier.emit(SessionEvent::ConnectionFailed);
            }
        }
    }

    fn on_post_registration_event(&mut self, event: RegistrationEvent) {
        match event {
            RegistrationEvent::Registering => {
                tracing::info!("[Registration] Reconnecting to SIP server...");
            }
            RegistrationEvent::Done { .. } => {
                tracing::info!("[Registration] Reconnection succeeded");
                self.show_indicator(IndicatorStatus::Active);
                if self.state == RegistrationState::RegistrationFailed {
                    self.state = RegistrationState::Registered;
                }
            }
            RegistrationEvent::Failed { code, message } => {
                tracing::warn!("[Registration] Reconnection failed ({}): {}", code, message);
                self.show_indicator(IndicatorStatus::ConnectionLost);
                if self.revert_on_loss {
                    self.state = RegistrationState::RegistrationFailed;
                }
            }
        }
    }

    fn show_indicator(&mut self, status: IndicatorStatus) {
        match self.indicator_guard.as_mut() {
            Some(guard) => guard.update(status),
            None => {
                self.indicator_guard = Some(IndicatorGuard::show(self.indicator.clone(), status));
            }
        }
    }
}
