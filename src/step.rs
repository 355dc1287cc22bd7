//! Suspendable handler computations.
//!
//! A [`Step`] is either a finished value or a suspension: a description of
//! what the handler wants the engine to do next, paired with the continuation
//! to run once that is done. The interpreter consumes exactly one suspension
//! per iteration, so arbitrarily long chains run in constant stack space.

use crate::{engine::context::RequestContext, errors::BoxError, http::response::Response};
use std::sync::{Arc, Mutex};

pub(crate) type Next<Q, T, V> = Box<dyn FnOnce(V) -> Step<Q, T> + Send + 'static>;
pub(crate) type Launch<Q, T> = Box<dyn FnOnce(Q, u64, Resume<Q, T>) + Send + 'static>;

/// A suspendable computation producing a `T` inside the request engine.
///
/// Handlers are values of `Step<Q, Response>`, assembled from the operations
/// in [`ops`](crate::ops) and chained with [`and_then`](Step::and_then) /
/// [`map`](Step::map). Nothing runs until a worker thread interprets the
/// step against its request context.
///
/// # Examples
///
/// ```
/// use qos_web::{ops, Response, Step};
///
/// fn handler() -> Step<u8, Response> {
///     ops::read_body(1024)
///         .and_then(|bytes| ops::add_headers(vec![("content-type".into(), "text/plain".into())])
///             .map(move |()| Response::status(200).body(bytes)))
/// }
/// ```
pub struct Step<Q, T> {
    pub(crate) inner: Inner<Q, T>,
}

pub(crate) enum Inner<Q, T> {
    /// The computation finished with a value.
    Done(T),
    /// Stop processing and answer with this response immediately.
    Abort(Response),
    /// The handler failed; the engine shapes an internal-error response.
    Fail(BoxError),
    /// The request body exceeded the given byte budget.
    Overflow(usize),
    /// An operation against the request context; runs on the current worker
    /// without yielding.
    Context(Box<dyn FnOnce(&mut RequestContext<Q>) -> Step<Q, T> + Send + 'static>),
    /// Read at most `limit` body bytes, then continue with them.
    ReadBody { limit: usize, next: Next<Q, T, Vec<u8>> },
    /// Change the request priority, yielding the worker before continuing.
    SetQos { qos: Q, next: Next<Q, T, ()> },
    /// Hand the request to an external subsystem; the continuation is woken
    /// through a [`Resume`] sink.
    Boundary { launch: Launch<Q, T> },
}

impl<Q, T> Step<Q, T>
where
    Q: Send + 'static,
    T: Send + 'static,
{
    /// A step that is already finished.
    #[inline]
    pub fn done(value: T) -> Self {
        Self {
            inner: Inner::Done(value),
        }
    }

    /// Aborts the request with the given response. The rest of the handler
    /// chain never runs.
    #[inline]
    pub fn abort(response: Response) -> Self {
        Self {
            inner: Inner::Abort(response),
        }
    }

    /// Fails the request. The engine reports the error through the sensor
    /// and answers with a negotiated internal-error response.
    #[inline]
    pub fn fail(error: impl Into<BoxError>) -> Self {
        Self {
            inner: Inner::Fail(error.into()),
        }
    }

    pub(crate) fn overflow(limit: usize) -> Self {
        Self {
            inner: Inner::Overflow(limit),
        }
    }

    /// An operation over the request context, run in-worker.
    pub(crate) fn from_context(
        op: impl FnOnce(&mut RequestContext<Q>) -> Step<Q, T> + Send + 'static,
    ) -> Self {
        Self {
            inner: Inner::Context(Box::new(op)),
        }
    }

    /// Defers `f` so it is evaluated by the interpreter, not on the thread
    /// that happens to assemble the step.
    pub(crate) fn defer(f: impl FnOnce() -> Step<Q, T> + Send + 'static) -> Self {
        Self::from_context(move |_| f())
    }

    /// Continues with `next` once this step has produced its value.
    pub fn and_then<U, F>(self, next: F) -> Step<Q, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Step<Q, U> + Send + 'static,
    {
        self.bind(Box::new(next))
    }

    /// Transforms the produced value.
    pub fn map<U, F>(self, f: F) -> Step<Q, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(|value| Step::done(f(value)))
    }

    pub(crate) fn bind<U: Send + 'static>(self, next: Next<Q, U, T>) -> Step<Q, U> {
        let inner = match self.inner {
            Inner::Done(value) => return next(value),
            Inner::Abort(response) => Inner::Abort(response),
            Inner::Fail(error) => Inner::Fail(error),
            Inner::Overflow(limit) => Inner::Overflow(limit),
            Inner::Context(op) => Inner::Context(Box::new(move |ctx| op(ctx).bind(next))),
            Inner::ReadBody { limit, next: read } => Inner::ReadBody {
                limit,
                next: Box::new(move |bytes| read(bytes).bind(next)),
            },
            Inner::SetQos { qos, next: cont } => Inner::SetQos {
                qos,
                next: Box::new(move |()| cont(()).bind(next)),
            },
            Inner::Boundary { launch } => Inner::Boundary {
                launch: Box::new(move |qos, serial, resume| {
                    launch(qos, serial, resume.shifted(next));
                }),
            },
        };
        Step { inner }
    }
}

/// One-shot sink waking a suspended request with its follow-up step.
///
/// Clones share the same slot: whichever callback fires first delivers, every
/// later delivery is ignored. Delivery never evaluates handler code: binds
/// are wrapped as deferred context operations so they run on a worker thread
/// once the context has been re-queued.
pub(crate) struct Resume<Q, T> {
    slot: Arc<Mutex<Option<Box<dyn FnOnce(Step<Q, T>) + Send + 'static>>>>,
}

impl<Q, T> Clone for Resume<Q, T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<Q, T> Resume<Q, T>
where
    Q: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(sink: impl FnOnce(Step<Q, T>) + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(sink)))),
        }
    }

    pub(crate) fn succeed(&self, value: T) {
        self.deliver(Step::done(value));
    }

    pub(crate) fn fail(&self, error: BoxError) {
        self.deliver(Step {
            inner: Inner::Fail(error),
        });
    }

    pub(crate) fn deliver(&self, step: Step<Q, T>) {
        let sink = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sink) = sink {
            sink(step);
        }
    }

    /// Rebinds the sink one continuation earlier in the chain: the delivered
    /// step is composed with `next` lazily, on the interpreting worker.
    fn shifted<S: Send + 'static>(self, next: Next<Q, T, S>) -> Resume<Q, S> {
        Resume::new(move |step: Step<Q, S>| self.deliver(Step::defer(move || step.bind(next))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_pure<T: Send + 'static>(step: Step<u8, T>) -> Option<T> {
        // Enough of an interpreter for steps that never leave the value
        // world; context ops are fed a throwaway poison context.
        let mut ctx = RequestContext::<u8>::poison(0, 0);
        let mut step = step;
        loop {
            match step.inner {
                Inner::Done(value) => return Some(value),
                Inner::Context(op) => step = op(&mut ctx),
                _ => return None,
            }
        }
    }

    #[test]
    fn done_chains_eagerly() {
        let step = Step::<u8, _>::done(2).map(|v| v * 21);
        assert_eq!(run_pure(step), Some(42));
    }

    #[test]
    fn defer_postpones_evaluation() {
        let step = Step::<u8, i32>::defer(|| Step::done(5));
        assert!(matches!(step.inner, Inner::Context(_)));
        assert_eq!(run_pure(step), Some(5));
    }

    #[test]
    fn deep_chains_run_in_constant_stack() {
        // One suspension is consumed per interpreter iteration, so a chain
        // of deferred continuations runs without stack growth.
        fn countdown(n: u64, acc: u64) -> Step<u8, u64> {
            if n == 0 {
                Step::done(acc)
            } else {
                Step::defer(move || countdown(n - 1, acc + 1))
            }
        }

        assert_eq!(run_pure(countdown(100_000, 0)), Some(100_000));
    }

    #[test]
    fn repeated_maps_compose() {
        let mut step = Step::<u8, u64>::defer(|| Step::done(0));
        for _ in 0..1_000 {
            step = step.map(|v| v + 1);
        }
        assert_eq!(run_pure(step), Some(1_000));
    }

    #[test]
    fn abort_skips_the_rest() {
        let step = Step::<u8, ()>::abort(Response::status(204)).map(|_| -> u32 { unreachable!() });
        match step.inner {
            Inner::Abort(resp) => assert_eq!(resp.status_code(), 204),
            _ => panic!("expected an abort"),
        }
    }

    #[test]
    fn resume_delivers_once() {
        let delivered = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&delivered);
        let resume: Resume<u8, i32> = Resume::new(move |_| {
            *seen.lock().unwrap() += 1;
        });

        resume.succeed(1);
        resume.clone().succeed(2);
        resume.fail("late".into());

        assert_eq!(*delivered.lock().unwrap(), 1);
    }
}
