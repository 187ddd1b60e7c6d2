use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cleanup::Cleanup;
use crate::config::SessionConfig;
use crate::error::CallError;
use crate::events::{Notifier, SessionEvent};
use crate::host::{WakeGuard, WakeSource};
use crate::profile::SipProfile;
use crate::transport::{
    AudioCall, CallDirection, CallEvent, CallId, CallSink, EventSender, IncomingCallRequest,
    SipTransport, TransportResult,
};

/// Call side of the session, as seen by the front end
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CallState {
    Idle,
    Ringing(String),
    Active,
    Ending,
}

// One live transport call and what the session knows about it
struct CallHandle {
    id: CallId,
    direction: CallDirection,
    call: Box<dyn AudioCall>,
    peer: Option<String>,
    // Held from the incoming announcement until it rings, ends or fails
    wake: Option<WakeGuard>,
}

impl CallHandle {
    fn new(id: CallId, direction: CallDirection, call: Box<dyn AudioCall>) -> Self {
        Self {
            id,
            direction,
            call,
            peer: None,
            wake: None,
        }
    }

    fn start_audio(&self) {
        self.call.start_audio();
        // Some stacks start calls muted
        if self.call.is_muted() {
            self.call.toggle_mute();
        }
    }

    /// Hang up, then release the handle whatever the outcome
    async fn end(self) -> TransportResult<()> {
        let result = self.call.end().await;
        drop(self);
        result
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        tracing::debug!("[Call] Releasing {:?} call {}", self.direction, self.id);
        self.call.close();
    }
}

/// Owns the current call, the pending incoming call and the outgoing attempt being dialed
pub struct CallController {
    transport: Arc<dyn SipTransport>,
    wake: Arc<dyn WakeSource>,
    notifier: Notifier,
    events: EventSender,
    timeout: Duration,
    clear_on_remote_end: bool,
    state: CallState,
    current: Option<CallHandle>,
    pending: Option<CallHandle>,
    dialing: Option<CallHandle>,
}

impl CallController {
    pub fn new(
        transport: Arc<dyn SipTransport>,
        wake: Arc<dyn WakeSource>,
        notifier: Notifier,
        events: EventSender,
        config: &SessionConfig,
    ) -> Self {
        Self {
            transport,
            wake,
            notifier,
            events,
            timeout: config.call_timeout(),
            clear_on_remote_end: config.clear_call_on_remote_end,
            state: CallState::Idle,
            current: None,
            pending: None,
            dialing: None,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn has_current_call(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_pending_call(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_dialing(&self) -> bool {
        self.dialing.is_some()
    }

    fn refresh_state(&mut self) {
        self.state = if self.current.is_some() {
            CallState::Active
        } else if let Some(caller) = self.pending.as_ref().and_then(|p| p.peer.clone()) {
            CallState::Ringing(caller)
        } else {
            CallState::Idle
        };
    }

    /// Place an outgoing audio call from `local` to `username@domain`.
    ///
    /// Success means the transport accepted the request; `CallEstablished` follows once the
    /// remote side answers.
    pub async fn make_call(
        &mut self,
        local: Option<&SipProfile>,
        username: &str,
        domain: &str,
    ) -> Result<(), CallError> {
        let local = local.ok_or(CallError::NoProfile)?;
        let peer = SipProfile::builder(username, domain).build()?;

        let id = CallId::new();
        let listener = CallSink::new(id, CallDirection::Outgoing, self.events.clone());

        tracing::info!("[Call] Calling {} (call {})", peer, id);
        let call = self
            .transport
            .make_audio_call(local, &peer, listener, self.timeout)
            .await
            .map_err(|e| {
                tracing::error!("[Call] Error making call: {}", e);
                CallError::Transport(e)
            })?;

        let mut handle = CallHandle::new(id, CallDirection::Outgoing, call);
        handle.peer = Some(peer.to_string());

        if let Some(previous) = self.dialing.replace(handle) {
            let mut cleanup = Cleanup::new("Make call");
            cleanup.attempt("abandon previous attempt", previous.end().await);
            cleanup.finish();
        }
        Ok(())
    }

    /// Answer the pending incoming call, hanging up the current one first.
    ///
    /// Nothing pending is not an error.
    pub async fn take_call(&mut self) -> Result<(), CallError> {
        if self.pending.is_none() {
            tracing::debug!("[Call] No incoming call to take");
            return Ok(());
        }

        let mut cleanup = Cleanup::new("Take call");
        cleanup.attempt("end current call", self.end_current_call().await);

        let answered = match self.pending.as_ref() {
            Some(handle) => handle.call.answer(self.timeout).await,
            None => return Ok(()),
        };

        if let Err(e) = answered {
            tracing::error!("[Call] Error taking incoming call: {}", e);
            cleanup.attempt("reject incoming call", self.reject_incoming_call().await);
            cleanup.finish();
            return Err(CallError::Transport(e));
        }
        cleanup.finish();

        if let Some(mut handle) = self.pending.take() {
            handle.wake = None;
            handle.start_audio();
            tracing::info!("[Call] ✓ Answered call {}", handle.id);
            self.current = Some(handle);
        }
        self.refresh_state();
        Ok(())
    }

    /// Hang up the pending incoming call; the slot is cleared even if hanging up fails
    pub async fn reject_incoming_call(&mut self) -> Result<(), CallError> {
        let Some(handle) = self.pending.take() else {
            return Ok(());
        };

        tracing::info!("[Call] Rejecting incoming call {}", handle.id);
        let result = handle.end().await;
        self.refresh_state();

        result.map_err(|e| {
            tracing::error!("[Call] Error ending incoming call: {}", e);
            CallError::Transport(e)
        })
    }

    /// Hang up the current call; the slot is cleared even if hanging up fails
    pub async fn end_current_call(&mut self) -> Result<(), CallError> {
        let Some(handle) = self.current.take() else {
            return Ok(());
        };

        self.state = CallState::Ending;
        tracing::info!("[Call] Ending current call {}", handle.id);
        let result = handle.end().await;
        self.refresh_state();

        result.map_err(|e| {
            tracing::error!("[Call] Error ending current call: {}", e);
            CallError::Transport(e)
        })
    }

    /// Give up on an outgoing call that has not been answered yet
    pub async fn abandon_outgoing(&mut self) -> Result<(), CallError> {
        let Some(handle) = self.dialing.take() else {
            return Ok(());
        };

        tracing::info!("[Call] Abandoning outgoing call {}", handle.id);
        handle.end().await.map_err(CallError::Transport)
    }

    pub fn set_speaker_mode(&self, enabled: bool) {
        match &self.current {
            Some(handle) => handle.call.set_speaker_mode(enabled),
            None => tracing::debug!("[Call] No current call, speaker mode unchanged"),
        }
    }

    /// Inbound call announced by the transport.
    ///
    /// Never fails: anything that goes wrong ends in a best-effort reject.
    pub async fn on_incoming_call(&mut self, request: IncomingCallRequest, accepting: bool) {
        if !accepting {
            tracing::debug!("[Call] Not registered, ignoring incoming call {}", request.call_key);
            return;
        }

        let wake = WakeGuard::acquire(self.wake.clone());
        let id = CallId::new();

        if let Err(e) = self.accept_incoming(request, id, wake).await {
            tracing::warn!("[Call] Failed to accept incoming call: {}", e);
            let mut cleanup = Cleanup::new("Incoming call");
            cleanup.attempt("reject incoming call", self.reject_incoming_call().await);
            cleanup.finish();
        }
    }

    async fn accept_incoming(
        &mut self,
        request: IncomingCallRequest,
        id: CallId,
        wake: WakeGuard,
    ) -> TransportResult<()> {
        let call = self.transport.take_audio_call(request).await?;

        if let Some(previous) = self.pending.take() {
            let mut cleanup = Cleanup::new("Incoming call");
            cleanup.attempt("end unanswered call", previous.end().await);
            cleanup.finish();
        }

        let mut handle = CallHandle::new(id, CallDirection::Incoming, call);
        handle.wake = Some(wake);
        let handle = self.pending.insert(handle);

        let listener = CallSink::new(id, CallDirection::Incoming, self.events.clone());
        handle.call.set_listener(listener, true)?;

        tracing::info!("[Call] Incoming call {} waiting to ring", id);
        Ok(())
    }

    pub async fn on_call_event(&mut self, id: CallId, direction: CallDirection, event: CallEvent) {
        match event {
            CallEvent::Ringing { caller } => self.on_ringing(id, direction, caller),
            CallEvent::Established => self.on_established(id).await,
            CallEvent::Ended => self.on_ended(id),
            CallEvent::Error { code, message } => {
                tracing::warn!("[Call] Call {} reported error {}: {}", id, code, message);
                self.release_pending_wake(id);
            }
        }
    }

    // An unanswered call that ends or fails before ringing no longer needs the device awake
    fn release_pending_wake(&mut self, id: CallId) {
        if let Some(handle) = self.pending.as_mut().filter(|h| h.id == id) {
            if handle.wake.take().is_some() {
                tracing::debug!("[Call] Released wake for call {}", id);
            }
        }
    }

    fn on_ringing(&mut self, id: CallId, direction: CallDirection, caller: String) {
        if direction == CallDirection::Outgoing {
            tracing::debug!("[Call] Remote side ringing for call {}", id);
            return;
        }

        let Some(handle) = self.pending.as_mut().filter(|h| h.id == id) else {
            tracing::debug!("[Call] Ring for unknown call {}", id);
            return;
        };
        if handle.peer.is_some() {
            return;
        }

        handle.peer = Some(caller.clone());
        handle.wake = None;
        self.refresh_state();

        tracing::info!("[Call] Incoming call from {}", caller);
        self.notifier.emit(SessionEvent::IncomingCall { caller_id: caller });
    }

    async fn on_established(&mut self, id: CallId) {
        if !self.dialing.as_ref().is_some_and(|h| h.id == id) {
            tracing::debug!("[Call] Established event for call {} ignored", id);
            return;
        }

        let mut cleanup = Cleanup::new("Call established");
        cleanup.attempt("end previous call", self.end_current_call().await);
        cleanup.finish();

        if let Some(handle) = self.dialing.take() {
            handle.start_audio();
            tracing::info!("[Call] ✓ Call {} established", handle.id);
            self.current = Some(handle);
        }
        self.refresh_state();
        self.notifier.emit(SessionEvent::CallEstablished);
    }

    fn on_ended(&mut self, id: CallId) {
        tracing::info!("[Call] Call {} ended", id);
        self.release_pending_wake(id);

        if self.dialing.as_ref().is_some_and(|h| h.id == id) {
            self.dialing = None;
        } else if self.current.as_ref().is_some_and(|h| h.id == id) {
            if self.clear_on_remote_end {
                self.current = None;
            } else {
                tracing::debug!("[Call] Keeping handle for call {} until end_call", id);
            }
        } else if self.pending.as_ref().is_some_and(|h| h.id == id) {
            if self.clear_on_remote_end {
                self.pending = None;
            } else {
                tracing::debug!("[Call] Keeping handle for call {} until reject_call", id);
            }
        }

        self.refresh_state();
        self.notifier.emit(SessionEvent::CallEnded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallProbe, CountingWake, MockTransport};
    use std::sync::atomic::Ordering;
    use tokio::sync::{broadcast, mpsc};

    struct Fixture {
        calls: CallController,
        transport: Arc<MockTransport>,
        wake: Arc<CountingWake>,
        events: broadcast::Receiver<SessionEvent>,
        local: SipProfile,
    }

    fn fixture(config: SessionConfig) -> Fixture {
        let transport = MockTransport::new();
        let wake = Arc::new(CountingWake::default());
        let notifier = Notifier::new(16);
        let events = notifier.subscribe();
        let (tx, _rx) = mpsc::unbounded_channel();
        let calls = CallController::new(transport.clone(), wake.clone(), notifier, tx, &config);
        let local = SipProfile::builder("alice", "example.com").password("pw").build().unwrap();

        Fixture {
            calls,
            transport,
            wake,
            events,
            local,
        }
    }

    impl Fixture {
        async fn ring(&mut self, caller: &str) -> Arc<CallProbe> {
            self.calls
                .on_incoming_call(IncomingCallRequest::new("invite-1"), true)
                .await;
            let probe = self.transport.last_call();
            let sink = probe.sink();
            self.calls
                .on_call_event(
                    sink.call_id(),
                    CallDirection::Incoming,
                    CallEvent::Ringing {
                        caller: caller.to_string(),
                    },
                )
                .await;
            probe
        }

        async fn establish_outgoing(&mut self) -> Arc<CallProbe> {
            let local = self.local.clone();
            self.calls.make_call(Some(&local), "bob", "example.com").await.unwrap();
            let probe = self.transport.last_call();
            self.calls
                .on_call_event(probe.sink().call_id(), CallDirection::Outgoing, CallEvent::Established)
                .await;
            probe
        }
    }

    #[tokio::test]
    async fn test_make_call_without_profile() {
        let mut f = fixture(SessionConfig::default());

        let result = f.calls.make_call(None, "bob", "example.com").await;

        assert!(matches!(result, Err(CallError::NoProfile)));
        assert_eq!(f.calls.state(), &CallState::Idle);
        assert!(f.transport.ops().is_empty());
    }

    #[tokio::test]
    async fn test_make_call_transport_failure_changes_nothing() {
        let mut f = fixture(SessionConfig::default());
        f.transport.fail("make_audio_call");
        let local = f.local.clone();

        let result = f.calls.make_call(Some(&local), "bob", "example.com").await;

        assert!(matches!(result, Err(CallError::Transport(_))));
        assert!(!f.calls.is_dialing());
        assert_eq!(f.calls.state(), &CallState::Idle);
    }

    #[tokio::test]
    async fn test_outgoing_call_established_unmutes() {
        let mut f = fixture(SessionConfig::default());
        let template = Arc::new(CallProbe::default());
        template.muted.store(true, Ordering::SeqCst);
        f.transport.prepare_call(template);

        let probe = f.establish_outgoing().await;

        assert_eq!(f.calls.state(), &CallState::Active);
        assert!(probe.audio_started.load(Ordering::SeqCst));
        assert!(!probe.muted.load(Ordering::SeqCst));
        assert_eq!(f.events.try_recv().unwrap(), SessionEvent::CallEstablished);
    }

    #[tokio::test]
    async fn test_end_current_call_clears_slot_on_failure() {
        let mut f = fixture(SessionConfig::default());
        let probe = f.establish_outgoing().await;
        probe.fail_end.store(true, Ordering::SeqCst);

        let result = f.calls.end_current_call().await;

        assert!(matches!(result, Err(CallError::Transport(_))));
        assert!(!f.calls.has_current_call());
        assert_eq!(f.calls.state(), &CallState::Idle);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);

        // Second end is a quiet no-op
        assert!(f.calls.end_current_call().await.is_ok());
    }

    #[tokio::test]
    async fn test_incoming_call_rings_once_and_releases_wake() {
        let mut f = fixture(SessionConfig::default());

        let probe = f.ring("bob").await;
        assert_eq!(f.wake.held(), 0);
        assert_eq!(f.wake.acquired(), 1);

        // Repeated ring is not announced again
        f.calls
            .on_call_event(
                probe.sink().call_id(),
                CallDirection::Incoming,
                CallEvent::Ringing { caller: "bob".to_string() },
            )
            .await;

        assert_eq!(
            f.events.try_recv().unwrap(),
            SessionEvent::IncomingCall { caller_id: "bob".to_string() }
        );
        assert!(f.events.try_recv().is_err());
        assert_eq!(f.calls.state(), &CallState::Ringing("bob".to_string()));
    }

    #[tokio::test]
    async fn test_incoming_call_ignored_when_not_accepting() {
        let mut f = fixture(SessionConfig::default());

        f.calls
            .on_incoming_call(IncomingCallRequest::new("invite-1"), false)
            .await;

        assert!(!f.calls.has_pending_call());
        assert_eq!(f.wake.acquired(), 0);
        assert!(f.transport.ops().is_empty());
    }

    #[tokio::test]
    async fn test_incoming_listener_failure_rejects_and_releases_wake() {
        let mut f = fixture(SessionConfig::default());
        let template = Arc::new(CallProbe::default());
        template.fail_set_listener.store(true, Ordering::SeqCst);
        f.transport.prepare_call(template.clone());

        f.calls
            .on_incoming_call(IncomingCallRequest::new("invite-1"), true)
            .await;

        assert!(!f.calls.has_pending_call());
        assert_eq!(template.ended.load(Ordering::SeqCst), 1);
        assert_eq!(f.wake.held(), 0);
    }

    #[tokio::test]
    async fn test_wake_released_when_caller_hangs_up_before_ring() {
        let mut f = fixture(SessionConfig::default());

        f.calls
            .on_incoming_call(IncomingCallRequest::new("invite-1"), true)
            .await;
        assert_eq!(f.wake.held(), 1);
        let call_id = f.transport.last_call().sink().call_id();

        f.calls
            .on_call_event(call_id, CallDirection::Incoming, CallEvent::Ended)
            .await;
        assert_eq!(f.wake.held(), 0);
        assert!(f.calls.has_pending_call());

        f.calls
            .on_call_event(
                call_id,
                CallDirection::Incoming,
                CallEvent::Error { code: 487, message: "Request Terminated".to_string() },
            )
            .await;
        assert_eq!(f.wake.held(), 0);
        assert_eq!(f.wake.acquired(), 1);
    }

    #[tokio::test]
    async fn test_wake_released_on_call_error_before_ring() {
        let mut f = fixture(SessionConfig::default());

        f.calls
            .on_incoming_call(IncomingCallRequest::new("invite-1"), true)
            .await;
        let call_id = f.transport.last_call().sink().call_id();

        f.calls
            .on_call_event(
                call_id,
                CallDirection::Incoming,
                CallEvent::Error { code: 408, message: "Request Timeout".to_string() },
            )
            .await;

        assert_eq!(f.wake.held(), 0);
        assert!(f.calls.has_pending_call());
    }

    #[tokio::test]
    async fn test_reject_before_ring_releases_wake() {
        let mut f = fixture(SessionConfig::default());

        f.calls
            .on_incoming_call(IncomingCallRequest::new("invite-1"), true)
            .await;
        let probe = f.transport.last_call();
        assert_eq!(f.wake.held(), 1);

        f.calls.reject_incoming_call().await.unwrap();

        assert_eq!(f.wake.held(), 0);
        assert!(!f.calls.has_pending_call());
        assert_eq!(probe.ended.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_take_call_replaces_current() {
        let mut f = fixture(SessionConfig::default());
        let outgoing = f.establish_outgoing().await;
        let incoming = f.ring("carol").await;

        f.calls.take_call().await.unwrap();

        assert_eq!(outgoing.ended.load(Ordering::SeqCst), 1);
        assert_eq!(incoming.answered.load(Ordering::SeqCst), 1);
        assert!(incoming.audio_started.load(Ordering::SeqCst));
        assert!(f.calls.has_current_call());
        assert!(!f.calls.has_pending_call());
        assert_eq!(f.calls.state(), &CallState::Active);
    }

    #[tokio::test]
    async fn test_take_call_answer_failure_rejects() {
        let mut f = fixture(SessionConfig::default());
        let incoming = f.ring("bob").await;
        incoming.fail_answer.store(true, Ordering::SeqCst);

        let result = f.calls.take_call().await;

        assert!(matches!(result, Err(CallError::Transport(_))));
        assert_eq!(incoming.ended.load(Ordering::SeqCst), 1);
        assert!(!f.calls.has_pending_call());
        assert!(!f.calls.has_current_call());
    }

    #[tokio::test]
    async fn test_take_call_without_pending_is_noop() {
        let mut f = fixture(SessionConfig::default());
        assert!(f.calls.take_call().await.is_ok());
        assert!(f.transport.ops().is_empty());
    }

    #[tokio::test]
    async fn test_reject_clears_slot_on_failure() {
        let mut f = fixture(SessionConfig::default());
        let incoming = f.ring("bob").await;
        incoming.fail_end.store(true, Ordering::SeqCst);

        let result = f.calls.reject_incoming_call().await;

        assert!(matches!(result, Err(CallError::Transport(_))));
        assert!(!f.calls.has_pending_call());
        assert_eq!(incoming.closed.load(Ordering::SeqCst), 1);
        assert_eq!(f.calls.state(), &CallState::Idle);
    }

    #[tokio::test]
    async fn test_remote_end_keeps_handle_by_default() {
        let mut f = fixture(SessionConfig::default());
        let probe = f.establish_outgoing().await;
        let _ = f.events.try_recv();

        f.calls
            .on_call_event(probe.sink().call_id(), CallDirection::Outgoing, CallEvent::Ended)
            .await;

        assert_eq!(f.events.try_recv().unwrap(), SessionEvent::CallEnded);
        assert!(f.calls.has_current_call());
    }

    #[tokio::test]
    async fn test_remote_end_clears_handle_when_configured() {
        let config = SessionConfig {
            clear_call_on_remote_end: true,
            ..SessionConfig::default()
        };
        let mut f = fixture(config);
        let probe = f.establish_outgoing().await;

        f.calls
            .on_call_event(probe.sink().call_id(), CallDirection::Outgoing, CallEvent::Ended)
            .await;

        assert!(!f.calls.has_current_call());
        assert_eq!(f.calls.state(), &CallState::Idle);
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_speaker_mode_only_with_current_call() {
        let mut f = fixture(SessionConfig::default());
        f.calls.set_speaker_mode(true);

        let probe = f.establish_outgoing().await;
        f.calls.set_speaker_mode(true);
        assert!(probe.speaker.load(Ordering::SeqCst));
    }
}
