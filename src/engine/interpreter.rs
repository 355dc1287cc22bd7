//! The suspension dispatch loop.
//!
//! A worker hands a dequeued context to [`run`], which advances the pending
//! continuation one suspension at a time. Context operations continue on the
//! same worker; everything else releases it: a priority change re-queues the
//! context, a body read parks it on the input adapter, a boundary operation
//! ships it to the external subsystem's callbacks.

use crate::{
    engine::{context::RequestContext, module::Shared, output},
    errors::{BoxError, Fault},
    http::response::Response,
    step::{Inner, Resume, Step},
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

pub(crate) fn run<Q>(shared: &Arc<Shared<Q>>, mut ctx: Box<RequestContext<Q>>)
where
    Q: Clone + Send + Sync + 'static,
{
    let Some(mut step) = ctx.next_steps.take() else {
        raise_internal_error(shared, ctx, Box::new(Fault::MissingContinuation));
        return;
    };

    loop {
        match step.inner {
            Inner::Done(response) | Inner::Abort(response) => {
                output::write(shared, ctx, response);
                return;
            }
            Inner::Fail(error) => {
                raise_internal_error(shared, ctx, error);
                return;
            }
            Inner::Overflow(limit) => {
                raise_size_exceeded(shared, ctx, limit);
                return;
            }
            Inner::Context(op) => {
                match catch_unwind(AssertUnwindSafe(|| op(&mut ctx))) {
                    Ok(next) => step = next,
                    Err(payload) => {
                        let fault = Fault::HandlerPanic(Fault::panic_message(payload));
                        raise_internal_error(shared, ctx, Box::new(fault));
                        return;
                    }
                }
            }
            Inner::ReadBody { limit, next } => {
                crate::engine::input::start(shared, ctx, limit, next);
                return;
            }
            Inner::SetQos { qos, next } => {
                // Yield so more urgent peers get a worker before this
                // request continues at its new priority.
                ctx.qos = qos;
                ctx.next_steps = Some(Step::defer(move || next(())));
                shared.queue.push(ctx);
                return;
            }
            Inner::Boundary { launch } => {
                let qos = ctx.qos.clone();
                let serial = ctx.serial;
                let wake = Arc::clone(shared);
                let resume = Resume::new(move |follow_up: Step<Q, Response>| {
                    let mut ctx = ctx;
                    ctx.next_steps = Some(follow_up);
                    wake.queue.push(ctx);
                });
                launch(qos, serial, resume);
                return;
            }
        }
    }
}

/// Answers the request with a negotiated internal-error response carrying the
/// sensor's correlation id. Shaping itself may fail; that degrades to a bare
/// 500 and a best-effort invisible report.
pub(crate) fn raise_internal_error<Q>(
    shared: &Arc<Shared<Q>>,
    ctx: Box<RequestContext<Q>>,
    error: BoxError,
) where
    Q: Send + Sync + 'static,
{
    let accept = ctx.accept_headers();
    let serial = ctx.serial;

    let shaped = catch_unwind(AssertUnwindSafe(|| {
        let reference = shared.sensor.internal_error(serial, &*error);
        shared.errors.internal_error(&accept, &reference)
    }));
    let response = match shaped {
        Ok(response) => response,
        Err(payload) => fallback_response(shared, serial, payload),
    };

    output::write(shared, ctx, response);
}

/// Answers a request whose body ran over the byte budget the handler set.
pub(crate) fn raise_size_exceeded<Q>(
    shared: &Arc<Shared<Q>>,
    ctx: Box<RequestContext<Q>>,
    limit: usize,
) where
    Q: Send + Sync + 'static,
{
    let accept = ctx.accept_headers();
    let serial = ctx.serial;

    let shaped = catch_unwind(AssertUnwindSafe(|| {
        shared.errors.byte_length_exceeded(&accept, limit)
    }));
    let response = match shaped {
        Ok(response) => response,
        Err(payload) => fallback_response(shared, serial, payload),
    };

    output::write(shared, ctx, response);
}

fn fallback_response<Q>(
    shared: &Arc<Shared<Q>>,
    serial: u64,
    payload: Box<dyn std::any::Any + Send>,
) -> Response {
    let fault = Fault::ShapingFailed(Fault::panic_message(payload));
    let _ = catch_unwind(AssertUnwindSafe(|| {
        shared.sensor.invisible_error(serial, &fault);
    }));
    Response::status(500)
}
