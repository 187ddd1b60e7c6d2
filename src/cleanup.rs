use std::fmt::Display;

/// Runs best-effort steps of a compensating action.
///
/// Each failed step is logged and counted; later steps always run.
pub struct Cleanup {
    operation: &'static str,
    failures: usize,
}

impl Cleanup {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            failures: 0,
        }
    }

    pub fn attempt<E: Display>(&mut self, step: &str, result: Result<(), E>) {
        if let Err(e) = result {
            self.failures += 1;
            tracing::warn!("[{}] {} failed (ignored): {}", self.operation, step, e);
        }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn finish(self) {
        if self.failures > 0 {
            tracing::warn!(
                "[{}] Completed with {} ignored failure(s)",
                self.operation,
                self.failures
            );
        } else {
            tracing::debug!("[{}] Completed cleanly", self.operation);
        }
    }
}
