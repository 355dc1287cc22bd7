//! Observability hooks for engine-internal events.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver for engine-internal error events.
///
/// The engine distinguishes three visibility classes:
///
/// - **internal** - the failure will be reported to the client as a 500-class
///   response carrying the returned correlation id, so an operator can match
///   a user complaint to the log event;
/// - **invisible** - the client can no longer be told (the response is
///   already underway, or the failure happened in a cleanup action);
///   reporting is best-effort;
/// - **generic** - the failure is not tied to any particular request, e.g. an
///   unexpected panic in a worker loop.
///
/// Implementations must be thread-safe; events arrive from worker threads and
/// from I/O callback threads.
pub trait Sensor: Send + Sync {
    /// Records a failure that will surface to the client and returns the
    /// user-visible correlation id to embed in the response.
    fn internal_error(&self, serial: u64, error: &(dyn Error + 'static)) -> String;

    /// Records a failure the client will never see. Defaults to the internal
    /// report with the correlation id discarded.
    fn invisible_error(&self, serial: u64, error: &(dyn Error + 'static)) {
        let _ = self.internal_error(serial, error);
    }

    /// Records a failure not attributable to a single request.
    fn generic_error(&self, error: &(dyn Error + 'static));
}

/// Default [`Sensor`] emitting `tracing` events.
///
/// Correlation ids combine the request serial with a per-sensor event
/// counter, so repeated failures of one request stay distinguishable.
pub struct TracingSensor {
    events: AtomicU64,
}

impl TracingSensor {
    pub fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
        }
    }
}

impl Default for TracingSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for TracingSensor {
    fn internal_error(&self, serial: u64, error: &(dyn Error + 'static)) -> String {
        let event = self.events.fetch_add(1, Ordering::Relaxed);
        let reference = format!("{serial:x}-{event:x}");
        tracing::error!(serial, %reference, %error, "request failed");
        reference
    }

    fn invisible_error(&self, serial: u64, error: &(dyn Error + 'static)) {
        tracing::warn!(serial, %error, "request failed after the response was committed");
    }

    fn generic_error(&self, error: &(dyn Error + 'static)) {
        tracing::error!(%error, "worker failure");
    }
}
