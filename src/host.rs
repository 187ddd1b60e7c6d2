use std::sync::Arc;

use serde::Serialize;

/// What the persistent "session is live" indicator shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndicatorStatus {
    Active,
    ConnectionLost,
}

/// Platform hook marking the session as live (foreground notification, tray icon, ...)
pub trait ActivityIndicator: Send + Sync {
    fn show(&self, status: IndicatorStatus);
    fn clear(&self);
}

/// Platform hook keeping the device awake while an incoming call is announced
pub trait WakeSource: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Shows the indicator while alive and clears it on drop
pub struct IndicatorGuard {
    indicator: Arc<dyn ActivityIndicator>,
    status: IndicatorStatus,
}

impl IndicatorGuard {
    pub fn show(indicator: Arc<dyn ActivityIndicator>, status: IndicatorStatus) -> Self {
        indicator.show(status);
        Self { indicator, status }
    }

    pub fn status(&self) -> IndicatorStatus {
        self.status
    }

    /// Re-show the indicator, even if the status did not change
    pub fn update(&mut self, status: IndicatorStatus) {
        self.status = status;
        self.indicator.show(status);
    }
}

impl Drop for IndicatorGuard {
    fn drop(&mut self) {
        self.indicator.clear();
    }
}

/// Holds the wake resource; released exactly once, on drop
pub struct WakeGuard {
    source: Arc<dyn WakeSource>,
}

impl WakeGuard {
    pub fn acquire(source: Arc<dyn WakeSource>) -> Self {
        source.acquire();
        Self { source }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.source.release();
    }
}

/// Indicator for hosts without a UI surface; just logs
#[derive(Debug, Default)]
pub struct LogIndicator;

impl ActivityIndicator for LogIndicator {
    fn show(&self, status: IndicatorStatus) {
        tracing::info!("[Host] Session indicator: {:?}", status);
    }

    fn clear(&self) {
        tracing::info!("[Host] Session indicator cleared");
    }
}

#[derive(Debug, Default)]
pub struct NoopWake;

impl WakeSource for NoopWake {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Platform collaborators the session needs besides the transport
#[derive(Clone)]
pub struct HostServices {
    pub indicator: Arc<dyn ActivityIndicator>,
    pub wake: Arc<dyn WakeSource>,
}

impl HostServices {
    pub fn new(indicator: Arc<dyn ActivityIndicator>, wake: Arc<dyn WakeSource>) -> Self {
        Self { indicator, wake }
    }

    /// Logging indicator, no wake handling
    pub fn headless() -> Self {
        Self::new(Arc::new(LogIndicator), Arc::new(NoopWake))
    }
}
