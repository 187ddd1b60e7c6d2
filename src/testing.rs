//! In-process stand-ins for the transport and host hooks, used by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::host::{ActivityIndicator, IndicatorStatus, WakeSource};
use crate::profile::SipProfile;
use crate::transport::{
    AudioCall, CallSink, IncomingCallRequest, IncomingCallSink, RegistrationListener,
    RegistrationSink, SipTransport, TransportResult,
};

/// Observable state of one mock call
#[derive(Default)]
pub struct CallProbe {
    pub muted: AtomicBool,
    pub audio_started: AtomicBool,
    pub speaker: AtomicBool,
    pub fail_end: AtomicBool,
    pub fail_answer: AtomicBool,
    pub fail_set_listener: AtomicBool,
    pub answered: AtomicUsize,
    pub ended: AtomicUsize,
    pub closed: AtomicUsize,
    listener: Mutex<Option<CallSink>>,
}

impl CallProbe {
    /// Listener the session attached to this call
    pub fn sink(&self) -> CallSink {
        self.listener
            .lock()
            .unwrap()
            .clone()
            .expect("no listener attached to call")
    }

    fn attach(&self, sink: CallSink) {
        *self.listener.lock().unwrap() = Some(sink);
    }
}

struct MockCall {
    probe: Arc<CallProbe>,
}

#[async_trait]
impl AudioCall for MockCall {
    fn set_listener(&self, listener: CallSink, _call_now: bool) -> TransportResult<()> {
        if self.probe.fail_set_listener.load(Ordering::SeqCst) {
            return Err(TransportError::other("set_listener failed"));
        }
        self.probe.attach(listener);
        Ok(())
    }

    async fn answer(&self, _timeout: Duration) -> TransportResult<()> {
        if self.probe.fail_answer.load(Ordering::SeqCst) {
            return Err(TransportError::sip(486, "Busy Here"));
        }
        self.probe.answered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) -> TransportResult<()> {
        self.probe.ended.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_end.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn start_audio(&self) {
        self.probe.audio_started.store(true, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.probe.muted.load(Ordering::SeqCst)
    }

    fn toggle_mute(&self) {
        self.probe.muted.fetch_xor(true, Ordering::SeqCst);
    }

    fn set_speaker_mode(&self, enabled: bool) {
        self.probe.speaker.store(enabled, Ordering::SeqCst);
    }

    fn close(&self) {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scriptable transport: records every operation, any of which can be told to fail
pub struct MockTransport {
    supported: AtomicBool,
    registered: AtomicBool,
    failing: Mutex<HashSet<String>>,
    ops: Mutex<Vec<String>>,
    register_expiry: Mutex<Option<Duration>>,
    incoming: Mutex<Option<IncomingCallSink>>,
    registration_sinks: Mutex<Vec<RegistrationSink>>,
    prepared: Mutex<Option<Arc<CallProbe>>>,
    calls: Mutex<Vec<Arc<CallProbe>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            supported: AtomicBool::new(true),
            registered: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
            ops: Mutex::new(Vec::new()),
            register_expiry: Mutex::new(None),
            incoming: Mutex::new(None),
            registration_sinks: Mutex::new(Vec::new()),
            prepared: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn succeed(&self, op: &str) {
        self.failing.lock().unwrap().remove(op);
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn register_expiry(&self) -> Option<Duration> {
        *self.register_expiry.lock().unwrap()
    }

    /// Use `probe` for the next call the transport creates
    pub fn prepare_call(&self, probe: Arc<CallProbe>) {
        *self.prepared.lock().unwrap() = Some(probe);
    }

    pub fn last_call(&self) -> Arc<CallProbe> {
        self.calls.lock().unwrap().last().cloned().expect("no call created")
    }

    pub fn incoming_sink(&self) -> IncomingCallSink {
        self.incoming.lock().unwrap().clone().expect("profile not opened")
    }

    /// Most recent registration listener of the given kind
    pub fn registration_sink(&self, listener: RegistrationListener) -> RegistrationSink {
        self.registration_sinks
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.listener() == listener)
            .cloned()
            .expect("no such registration listener")
    }

    fn record(&self, op: &str) -> TransportResult<()> {
        self.ops.lock().unwrap().push(op.to_string());
        if self.failing.lock().unwrap().contains(op) {
            return Err(TransportError::other(format!("{} failed", op)));
        }
        Ok(())
    }

    fn new_call(&self) -> (Arc<CallProbe>, Box<dyn AudioCall>) {
        let probe = self.prepared.lock().unwrap().take().unwrap_or_default();
        self.calls.lock().unwrap().push(probe.clone());
        let call = Box::new(MockCall {
            probe: probe.clone(),
        });
        (probe, call)
    }
}

#[async_trait]
impl SipTransport for MockTransport {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    async fn open(&self, _profile: &SipProfile, incoming: IncomingCallSink) -> TransportResult<()> {
        self.record("open")?;
        *self.incoming.lock().unwrap() = Some(incoming);
        Ok(())
    }

    async fn register(
        &self,
        _profile: &SipProfile,
        expiry: Duration,
        listener: RegistrationSink,
    ) -> TransportResult<()> {
        self.record("register")?;
        *self.register_expiry.lock().unwrap() = Some(expiry);
        self.registration_sinks.lock().unwrap().push(listener);
        Ok(())
    }

    async fn set_registration_listener(
        &self,
        _profile_uri: &str,
        listener: RegistrationSink,
    ) -> TransportResult<()> {
        self.record("set_registration_listener")?;
        self.registration_sinks.lock().unwrap().push(listener);
        Ok(())
    }

    async fn is_registered(&self, _profile_uri: &str) -> TransportResult<bool> {
        self.record("is_registered")?;
        Ok(self.registered.load(Ordering::SeqCst))
    }

    async fn close(&self, _profile_uri: &str) -> TransportResult<()> {
        self.record("close")?;
        *self.incoming.lock().unwrap() = None;
        Ok(())
    }

    async fn unregister(&self, _profile: &SipProfile, listener: RegistrationSink) -> TransportResult<()> {
        self.record("unregister")?;
        self.registered.store(false, Ordering::SeqCst);
        self.registration_sinks.lock().unwrap().push(listener);
        Ok(())
    }

    async fn make_audio_call(
        &self,
        _local: &SipProfile,
        _peer: &SipProfile,
        listener: CallSink,
        _timeout: Duration,
    ) -> TransportResult<Box<dyn AudioCall>> {
        self.record("make_audio_call")?;
        let (probe, call) = self.new_call();
        probe.attach(listener);
        Ok(call)
    }

    async fn take_audio_call(&self, _request: IncomingCallRequest) -> TransportResult<Box<dyn AudioCall>> {
        self.record("take_audio_call")?;
        let (_, call) = self.new_call();
        Ok(call)
    }
}

/// Remembers what the indicator currently shows
#[derive(Default)]
pub struct RecordingIndicator {
    current: Mutex<Option<IndicatorStatus>>,
    shown: AtomicUsize,
    cleared: AtomicUsize,
}

impl RecordingIndicator {
    pub fn current(&self) -> Option<IndicatorStatus> {
        *self.current.lock().unwrap()
    }

    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl ActivityIndicator for RecordingIndicator {
    fn show(&self, status: IndicatorStatus) {
        *self.current.lock().unwrap() = Some(status);
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        *self.current.lock().unwrap() = None;
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CountingWake {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingWake {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Acquisitions not yet released
    pub fn held(&self) -> usize {
        self.acquired() - self.released.load(Ordering::SeqCst)
    }
}

impl WakeSource for CountingWake {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
