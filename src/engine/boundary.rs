//! Capabilities bridging requests to external subsystems.
//!
//! A handler may hand its request to a subsystem the engine knows nothing
//! about (a database client, a job queue, a remote call) and resume once
//! that subsystem finishes. The engine consumes the two capability shapes
//! below and only ever reacts to their callbacks by re-queueing the request;
//! handler code never runs on a subsystem thread.

use crate::errors::BoxError;
use std::future::Future;
use tokio::runtime::Handle;

/// Completion callback handed to a boundary subsystem.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// A subsystem that runs operations and signals completion.
///
/// # Contract
///
/// Exactly one of the two callbacks is invoked, exactly once. The invocation
/// may happen on any thread, including the calling thread before
/// `on_complete` returns; the engine handles both.
pub trait Completable<Op, T: Send>: Send + Sync {
    fn on_complete(&self, operation: Op, on_success: Callback<T>, on_failure: Callback<BoxError>);
}

/// A subsystem that orders its own work the way the engine orders requests.
///
/// # Contract
///
/// Callbacks behave as for [`Completable`], with one extra rule: the
/// operation must not run on the calling thread (it would hold a worker
/// hostage). The `(qos, ordinal)` pair mirrors the submitting request's
/// position in the engine's queue (within one QoS class, a lower ordinal is
/// more urgent), so the subsystem can drain consistently with the engine.
pub trait Scheduled<Q, Op, T: Send>: Send + Sync {
    fn schedule(
        &self,
        operation: Op,
        qos: Q,
        ordinal: u64,
        on_success: Callback<T>,
        on_failure: Callback<BoxError>,
    );
}

/// [`Completable`] over plain futures, driven by a tokio runtime.
///
/// The natural bridge for async clients: any
/// `Future<Output = Result<T, BoxError>>` becomes a boundary operation. The
/// future is spawned on the captured runtime handle, so completion arrives
/// on a runtime worker, never on the engine's calling thread.
///
/// This type deliberately does not implement [`Scheduled`]: tokio offers no
/// priority ordering, so claiming the `(qos, ordinal)` contract would be
/// false.
///
/// # Examples
///
/// ```no_run
/// use qos_web::{ops, FutureBoundary, Response, Step};
/// use std::sync::Arc;
///
/// fn lookup(db: Arc<FutureBoundary>) -> Step<u8, Response> {
///     ops::run_completable(&db, async { Ok::<_, qos_web::BoxError>(String::from("row")) })
///         .map(|row| Response::status(200).body(row))
/// }
/// ```
pub struct FutureBoundary {
    handle: Handle,
}

impl FutureBoundary {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Captures the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, as
    /// [`Handle::current`] does.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl<F, T> Completable<F, T> for FutureBoundary
where
    F: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    fn on_complete(&self, operation: F, on_success: Callback<T>, on_failure: Callback<BoxError>) {
        self.handle.spawn(async move {
            match operation.await {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn future_boundary_reports_success() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let boundary = FutureBoundary::new(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();
        let failure = tx.clone();

        boundary.on_complete(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(41 + 1)
            },
            Box::new(move |value| tx.send(Ok(value)).unwrap()),
            Box::new(move |error| failure.send(Err(error.to_string())).unwrap()),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Ok(42));
    }

    #[test]
    fn future_boundary_reports_failure() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let boundary = FutureBoundary::new(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();
        let failure = tx.clone();

        boundary.on_complete(
            async { Err::<(), BoxError>("connection reset".into()) },
            Box::new(move |()| tx.send(String::new()).unwrap()),
            Box::new(move |error| failure.send(error.to_string()).unwrap()),
        );

        let reported = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(reported, "connection reset");
    }
}
