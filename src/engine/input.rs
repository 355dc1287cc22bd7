//! Bounded non-blocking request body collection.

use crate::{
    engine::{context::RequestContext, module::Shared},
    http::{exchange::InputListener, response::Response},
    step::{Next, Step},
};
use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
};

const READ_CHUNK: usize = 2_048;

/// Parks `ctx` on its input channel until the body has been read (or the
/// byte budget is blown), then re-queues it with the matching follow-up
/// step. The worker is released immediately.
pub(crate) fn start<Q>(
    shared: &Arc<Shared<Q>>,
    mut ctx: Box<RequestContext<Q>>,
    limit: usize,
    next: Next<Q, Response, Vec<u8>>,
) where
    Q: Send + Sync + 'static,
{
    let reader: Arc<BodyReader<Q>> = Arc::new(BodyReader {
        slot: Mutex::new(None),
    });

    // The slot lock is held across `begin` so an event racing in from the
    // adapter thread cannot observe the reader before it is armed.
    let mut slot = reader.lock();
    ctx.exchange_mut().input().begin(Arc::clone(&reader) as Arc<dyn InputListener>);
    *slot = Some(Reading {
        shared: Arc::clone(shared),
        ctx,
        next,
        buffer: Vec::new(),
        remaining: limit as i64,
        limit,
    });
}

struct Reading<Q> {
    shared: Arc<Shared<Q>>,
    ctx: Box<RequestContext<Q>>,
    next: Next<Q, Response, Vec<u8>>,
    buffer: Vec<u8>,
    remaining: i64,
    limit: usize,
}

/// Listener state; `None` once a terminal event has fired, which is what
/// keeps duplicate completion events from the channel harmless.
pub(crate) struct BodyReader<Q> {
    slot: Mutex<Option<Reading<Q>>>,
}

impl<Q> BodyReader<Q> {
    fn lock(&self) -> MutexGuard<'_, Option<Reading<Q>>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Drained {
    Pending,
    Overflow,
    Failed(io::Error),
}

impl<Q> InputListener for BodyReader<Q>
where
    Q: Send + Sync + 'static,
{
    fn data_available(&self) {
        let mut slot = self.lock();
        let outcome = {
            let Some(reading) = slot.as_mut() else {
                return;
            };
            let mut outcome = Drained::Pending;
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                if !reading.ctx.exchange_mut().input().is_ready() {
                    break;
                }
                match reading.ctx.exchange_mut().input().read(&mut chunk) {
                    Ok(0) => break,
                    Ok(count) => {
                        reading.remaining -= count as i64;
                        if reading.remaining < 0 {
                            outcome = Drained::Overflow;
                            break;
                        }
                        reading.buffer.extend_from_slice(&chunk[..count]);
                    }
                    Err(error) => {
                        outcome = Drained::Failed(error);
                        break;
                    }
                }
            }
            outcome
        };

        match outcome {
            Drained::Pending => {}
            Drained::Overflow => {
                if let Some(reading) = slot.take() {
                    drop(slot);
                    let limit = reading.limit;
                    resume(reading, Step::overflow(limit));
                }
            }
            Drained::Failed(error) => {
                if let Some(reading) = slot.take() {
                    drop(slot);
                    resume(reading, Step::fail(error));
                }
            }
        }
    }

    fn all_data_read(&self) {
        let mut slot = self.lock();
        let Some(mut reading) = slot.take() else {
            return;
        };
        drop(slot);

        reading.ctx.exchange_mut().input().close();
        let Reading {
            shared,
            mut ctx,
            next,
            buffer,
            ..
        } = reading;
        ctx.next_steps = Some(Step::defer(move || next(buffer)));
        shared.queue.push(ctx);
    }

    fn failed(&self, error: io::Error) {
        let mut slot = self.lock();
        let Some(reading) = slot.take() else {
            return;
        };
        drop(slot);

        resume(reading, Step::fail(error));
    }
}

fn resume<Q>(reading: Reading<Q>, step: Step<Q, Response>)
where
    Q: Send + 'static,
{
    let Reading {
        shared, mut ctx, ..
    } = reading;
    ctx.next_steps = Some(step);
    shared.queue.push(ctx);
}
