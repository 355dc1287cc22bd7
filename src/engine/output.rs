//! Response delivery and request finishing.

use crate::{
    engine::{context::RequestContext, module::Shared},
    http::{exchange::OutputListener, response::Response},
};
use std::{
    io, mem,
    sync::{Arc, Mutex, MutexGuard},
};

const WRITE_CHUNK: usize = 2_048;

/// Emits `response` on the context's exchange: status first, then the
/// context's pending extra headers, the response's own headers, cookies from
/// both, and finally the body. An empty body finishes the request on the
/// spot; otherwise the context parks on the output channel and finishes from
/// its writability events.
pub(crate) fn write<Q>(shared: &Arc<Shared<Q>>, mut ctx: Box<RequestContext<Q>>, response: Response)
where
    Q: Send + Sync + 'static,
{
    let (status, headers, cookies, body) = response.into_parts();
    let extra_headers = mem::take(&mut ctx.extra_headers);
    let pending_cookies = mem::take(&mut ctx.response_cookies);

    {
        let exchange = ctx.exchange_mut();
        exchange.set_status(status);
        for (name, value) in &extra_headers {
            exchange.add_header(name, value);
        }
        for (name, value) in &headers {
            exchange.add_header(name, value);
        }
        for cookie in &pending_cookies {
            exchange.add_cookie(cookie);
        }
        for cookie in &cookies {
            exchange.add_cookie(cookie);
        }
    }

    if body.is_empty() {
        finish(shared, ctx);
        return;
    }

    let writer: Arc<BodyWriter<Q>> = Arc::new(BodyWriter {
        slot: Mutex::new(None),
    });

    // Lock held across `begin` so a writability event cannot race ahead of
    // the armed state.
    let mut slot = writer.lock();
    ctx.exchange_mut()
        .output()
        .begin(Arc::clone(&writer) as Arc<dyn OutputListener>);
    *slot = Some(Writing {
        shared: Arc::clone(shared),
        ctx,
        body,
        written: 0,
    });
}

/// Completes the exchange, drains the cleanup chain (newest first, failures
/// reported and skipped), and releases the request's in-flight slot.
pub(crate) fn finish<Q>(shared: &Arc<Shared<Q>>, mut ctx: Box<RequestContext<Q>>) {
    ctx.exchange_mut().complete();

    let serial = ctx.serial;
    let sensor = &shared.sensor;
    ctx.cleaners.drain(|fault| sensor.invisible_error(serial, fault));

    shared.control.request_complete();
}

struct Writing<Q> {
    shared: Arc<Shared<Q>>,
    ctx: Box<RequestContext<Q>>,
    body: Vec<u8>,
    written: usize,
}

pub(crate) struct BodyWriter<Q> {
    slot: Mutex<Option<Writing<Q>>>,
}

impl<Q> BodyWriter<Q> {
    fn lock(&self) -> MutexGuard<'_, Option<Writing<Q>>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Flush {
    Stalled,
    Complete,
    Failed(io::Error),
}

impl<Q> OutputListener for BodyWriter<Q>
where
    Q: Send + Sync + 'static,
{
    fn writable(&self) {
        let mut slot = self.lock();
        let outcome = {
            let Some(writing) = slot.as_mut() else {
                return;
            };
            let mut outcome = Flush::Stalled;
            while writing.written < writing.body.len() {
                if !writing.ctx.exchange_mut().output().is_ready() {
                    break;
                }
                let end = (writing.written + WRITE_CHUNK).min(writing.body.len());
                match writing
                    .ctx
                    .exchange_mut()
                    .output()
                    .write(&writing.body[writing.written..end])
                {
                    Ok(()) => writing.written = end,
                    Err(error) => {
                        outcome = Flush::Failed(error);
                        break;
                    }
                }
            }
            if writing.written >= writing.body.len() {
                outcome = Flush::Complete;
            }
            outcome
        };

        match outcome {
            Flush::Stalled => {}
            Flush::Complete => {
                if let Some(writing) = slot.take() {
                    drop(slot);
                    finish(&writing.shared, writing.ctx);
                }
            }
            Flush::Failed(error) => {
                if let Some(writing) = slot.take() {
                    drop(slot);
                    writing
                        .shared
                        .sensor
                        .invisible_error(writing.ctx.serial, &error);
                    finish(&writing.shared, writing.ctx);
                }
            }
        }
    }

    fn failed(&self, error: io::Error) {
        let mut slot = self.lock();
        let Some(writing) = slot.take() else {
            return;
        };
        drop(slot);

        writing
            .shared
            .sensor
            .invisible_error(writing.ctx.serial, &error);
        finish(&writing.shared, writing.ctx);
    }
}
