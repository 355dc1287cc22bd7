//! Operations available to handler code.
//!
//! Each function returns a [`Step`] describing one request against the
//! engine; handlers chain them with [`Step::and_then`] / [`Step::map`] into a
//! `Step<Q, Response>`. Operations that only touch the request context
//! (accessors, header/cookie mutation, cleanup registration, routing) run on
//! the current worker without yielding; [`set_qos`], [`read_body`],
//! [`run_completable`] and [`run_scheduled`] release the worker and resume
//! once the engine gets the context back.
//!
//! # Examples
//!
//! ```
//! use qos_web::{ops, Response, Step};
//!
//! fn echo() -> Step<u8, Response> {
//!     ops::read_body(64 * 1024)
//!         .and_then(|bytes| {
//!             ops::add_headers(vec![("content-type".into(), "application/octet-stream".into())])
//!                 .map(move |()| Response::status(200).body(bytes))
//!         })
//! }
//! ```

use crate::{
    engine::{
        boundary::{Callback, Completable, Scheduled},
        cleaner::CleanerId,
        context::RequestContext,
    },
    errors::BoxError,
    http::response::{Cookie, Response},
    step::{Inner, Step},
};
use std::sync::Arc;

/// Runs an arbitrary operation against the request context, on the current
/// worker. The named accessors below are usually enough; this is the escape
/// hatch they are built from.
///
/// `op` must complete in bounded time without blocking I/O; it occupies the
/// owning worker for its whole duration.
pub fn with_context<Q, T, F>(op: F) -> Step<Q, T>
where
    Q: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut RequestContext<Q>) -> T + Send + 'static,
{
    Step::from_context(move |ctx| Step::done(op(ctx)))
}

/// Like [`with_context`], for operations that continue with further steps.
pub fn with_context_step<Q, T, F>(op: F) -> Step<Q, T>
where
    Q: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut RequestContext<Q>) -> Step<Q, T> + Send + 'static,
{
    Step::from_context(op)
}

/// Reads the request's current priority.
pub fn get_qos<Q: Clone + Send + 'static>() -> Step<Q, Q> {
    Step::from_context(|ctx: &mut RequestContext<Q>| Step::done(ctx.qos().clone()))
}

/// Changes the request's priority.
///
/// The request yields its worker and re-enters the queue at the new
/// priority, so more urgent peers run first. Consecutive calls collapse:
/// the last value wins.
pub fn set_qos<Q: Send + 'static>(qos: Q) -> Step<Q, ()> {
    Step {
        inner: Inner::SetQos {
            qos,
            next: Box::new(Step::done),
        },
    }
}

/// The request's HTTP method name.
pub fn method<Q: Send + 'static>() -> Step<Q, String> {
    Step::from_context(|ctx| Step::done(ctx.method()))
}

/// First value of the named request header, if any.
pub fn header<Q: Send + 'static>(name: impl Into<String>) -> Step<Q, Option<String>> {
    let name = name.into();
    Step::from_context(move |ctx| Step::done(ctx.header(&name)))
}

/// All values of the named request header, in wire order.
pub fn headers<Q: Send + 'static>(name: impl Into<String>) -> Step<Q, Vec<String>> {
    let name = name.into();
    Step::from_context(move |ctx| Step::done(ctx.headers(&name)))
}

pub fn header_names<Q: Send + 'static>() -> Step<Q, Vec<String>> {
    Step::from_context(|ctx| Step::done(ctx.header_names()))
}

/// First value of the named query/form parameter, if any.
pub fn parameter<Q: Send + 'static>(name: impl Into<String>) -> Step<Q, Option<String>> {
    let name = name.into();
    Step::from_context(move |ctx| Step::done(ctx.parameter(&name)))
}

pub fn parameter_names<Q: Send + 'static>() -> Step<Q, Vec<String>> {
    Step::from_context(|ctx| Step::done(ctx.parameter_names()))
}

/// Cookies presented by the client.
pub fn cookies<Q: Send + 'static>() -> Step<Q, Vec<Cookie>> {
    Step::from_context(|ctx| Step::done(ctx.cookies()))
}

/// Queues headers to append to the outgoing response. Appends across calls:
/// two calls produce both batches, in call order.
pub fn add_headers<Q: Send + 'static>(headers: Vec<(String, String)>) -> Step<Q, ()> {
    Step::from_context(move |ctx| {
        ctx.add_headers(headers);
        Step::done(())
    })
}

/// Queues a cookie to set on the outgoing response.
pub fn add_cookie<Q: Send + 'static>(cookie: Cookie) -> Step<Q, ()> {
    Step::from_context(move |ctx| {
        ctx.add_cookie(cookie);
        Step::done(())
    })
}

/// Registers a cleanup action that runs when the request finishes, whichever
/// way it finishes. Actions run newest-first.
pub fn cleanup<Q, F>(action: F) -> Step<Q, CleanerId>
where
    Q: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    Step::from_context(move |ctx| Step::done(ctx.register_cleanup(action)))
}

/// Binds a resource to the request: it is dropped when the request finishes.
pub fn defer_drop<Q, R>(resource: R) -> Step<Q, CleanerId>
where
    Q: Send + 'static,
    R: Send + 'static,
{
    cleanup(move || drop(resource))
}

/// Drops a registered cleanup action without running it. Stale handles are
/// ignored.
pub fn remove_cleanup<Q: Send + 'static>(id: CleanerId) -> Step<Q, ()> {
    Step::from_context(move |ctx| {
        ctx.remove_cleanup(id);
        Step::done(())
    })
}

/// Stops processing and answers with `response` immediately.
pub fn abort<Q, T>(response: Response) -> Step<Q, T>
where
    Q: Send + 'static,
    T: Send + 'static,
{
    Step::abort(response)
}

/// Reads the whole request body, up to `limit` bytes.
///
/// The worker is released while bytes trickle in. A body of exactly `limit`
/// bytes succeeds; one more byte answers the request with the negotiated
/// byte-length-exceeded response instead, and the continuation never runs.
pub fn read_body<Q: Send + 'static>(limit: usize) -> Step<Q, Vec<u8>> {
    Step {
        inner: Inner::ReadBody {
            limit,
            next: Box::new(Step::done),
        },
    }
}

/// Runs `operation` on an external subsystem and resumes with its result.
///
/// The worker is released; whichever callback the subsystem fires, the
/// continuation runs back on a worker thread, never on the subsystem's.
/// A failure surfaces as an internal-error response shaped on a worker.
pub fn run_completable<Q, C, Op, T>(client: &Arc<C>, operation: Op) -> Step<Q, T>
where
    Q: Send + 'static,
    C: Completable<Op, T> + ?Sized + 'static,
    Op: Send + 'static,
    T: Send + 'static,
{
    let client = Arc::clone(client);
    Step {
        inner: Inner::Boundary {
            launch: Box::new(move |_qos, _serial, resume| {
                let succeed = resume.clone();
                let on_success: Callback<T> = Box::new(move |value| succeed.succeed(value));
                let on_failure: Callback<BoxError> = Box::new(move |error| resume.fail(error));
                client.on_complete(operation, on_success, on_failure);
            }),
        },
    }
}

/// Like [`run_completable`], for subsystems that order their own work.
///
/// The subsystem receives the request's `(qos, serial)` pair so it can drain
/// consistently with the engine: within one QoS class, a lower serial is
/// more urgent.
pub fn run_scheduled<Q, C, Op, T>(client: &Arc<C>, operation: Op) -> Step<Q, T>
where
    Q: Send + 'static,
    C: Scheduled<Q, Op, T> + ?Sized + 'static,
    Op: Send + 'static,
    T: Send + 'static,
{
    let client = Arc::clone(client);
    Step {
        inner: Inner::Boundary {
            launch: Box::new(move |qos, serial, resume| {
                let succeed = resume.clone();
                let on_success: Callback<T> = Box::new(move |value| succeed.succeed(value));
                let on_failure: Callback<BoxError> = Box::new(move |error| resume.fail(error));
                client.schedule(operation, qos, serial, on_success, on_failure);
            }),
        },
    }
}

/// Routes on the request's unconsumed path segments.
///
/// `select` inspects the segments and picks the continuation; returning
/// `None` answers 404 (or 501 when even the request method is outside the
/// engine's known set).
///
/// # Examples
///
/// ```
/// use qos_web::{ops, Response, Step};
///
/// fn root() -> Step<u8, Response> {
///     ops::route(|path| match path {
///         [] => Some(ops::abort(Response::status(200).body("index"))),
///         [first, rest @ ..] if first == "api" => {
///             Some(ops::continue_with(rest.to_vec(), api()))
///         }
///         _ => None,
///     })
/// }
///
/// fn api() -> Step<u8, Response> {
///     ops::route(|path| match path {
///         [name] if name == "health" => Some(ops::abort(Response::status(204))),
///         _ => None,
///     })
/// }
/// ```
pub fn route<Q, F>(select: F) -> Step<Q, Response>
where
    Q: Send + 'static,
    F: FnOnce(&[String]) -> Option<Step<Q, Response>> + Send + 'static,
{
    Step::from_context(move |ctx| match select(ctx.effective_path()) {
        Some(step) => step,
        None => {
            let status = if ctx.known_methods.contains(ctx.method().as_str()) {
                404
            } else {
                501
            };
            Step::abort(Response::status(status))
        }
    })
}

/// Replaces the unconsumed path and resumes with `rest`, typically a
/// sub-handler that routes on the replacement.
pub fn continue_with<Q: Send + 'static>(
    path: Vec<String>,
    rest: Step<Q, Response>,
) -> Step<Q, Response> {
    Step::from_context(move |ctx| {
        ctx.set_effective_path(path);
        rest
    })
}
