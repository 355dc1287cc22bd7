//! The request execution engine and its builder.

use crate::{
    engine::{
        context::RequestContext,
        control::RequestControl,
        interpreter,
        queue::{PriorityQueue, QosOrder},
    },
    errors::{Fault, NegotiableErrors, PlainTextErrors},
    http::{exchange::HttpExchange, response::Response},
    sensor::{Sensor, TracingSensor},
    step::Step,
};
use std::{
    cmp::Ordering as CmpOrdering,
    collections::HashSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use tracing::{debug, info};

/// State shared between the module handle, its workers, and the I/O and
/// boundary callbacks that re-queue contexts.
pub(crate) struct Shared<Q> {
    pub(crate) queue: PriorityQueue<Q>,
    pub(crate) control: RequestControl,
    pub(crate) live: AtomicUsize,
    pub(crate) serials: AtomicU64,
    pub(crate) default_qos: Q,
    pub(crate) known_methods: Arc<HashSet<String>>,
    pub(crate) sensor: Arc<dyn Sensor>,
    pub(crate) errors: Arc<dyn NegotiableErrors>,
}

/// A QoS-aware request execution engine.
///
/// The module owns a fixed pool of worker threads draining a priority queue
/// of request contexts. Each context runs an application-supplied
/// [`Step`]-valued handler; suspensions hand control back to the engine so it
/// can re-schedule the request by priority, perform the body I/O, or park the
/// request on an external subsystem and resume on completion.
///
/// Requests of a more urgent QoS class always reach a worker before less
/// urgent ones; within one class, admission order wins. The engine never
/// bounds the queue; admission is controlled by [`stop`](Module::stop), not
/// by capacity.
///
/// # Examples
///
/// ```
/// use qos_web::Module;
///
/// let mut module = Module::<u8>::builder()
///     .default_qos(10)
///     .qos_ordering(u8::cmp)
///     .workers(2)
///     .build();
///
/// assert_eq!(module.active_request_count(), 0);
/// module.stop();
/// ```
///
/// Handing requests over from the embedding HTTP server:
///
/// ```ignore
/// // In the server's request callback, with `exchange` adapting its
/// // request/response pair:
/// module.handle(exchange, my_handler());
/// ```
pub struct Module<Q> {
    shared: Arc<Shared<Q>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<Q> Module<Q>
where
    Q: Clone + Send + Sync + 'static,
{
    /// Creates a new builder for configuring the engine.
    #[inline]
    pub fn builder() -> ModuleBuilder<Q> {
        ModuleBuilder {
            default_qos: None,
            order: None,
            workers: 4,
            known_methods: DEFAULT_METHODS.iter().map(|m| (*m).to_owned()).collect(),
            sensor: None,
            errors: None,
            thread_factory: Box::new(|index| {
                thread::Builder::new().name(format!("qos-worker-{index}"))
            }),
        }
    }

    /// Submits one request for execution.
    ///
    /// If the engine is stopping, the exchange is answered with a bare 503
    /// and completed on the spot. Otherwise the request is assigned the next
    /// serial, seeded with `handler` at the default QoS, and queued.
    pub fn handle(&self, mut exchange: Box<dyn HttpExchange>, handler: Step<Q, Response>) {
        if !self.shared.control.should_process_request() {
            exchange.set_status(503);
            exchange.complete();
            return;
        }

        let serial = self.shared.serials.fetch_add(1, Ordering::Relaxed);
        let ctx = Box::new(RequestContext::new(
            exchange,
            serial,
            self.shared.default_qos.clone(),
            Arc::clone(&self.shared.known_methods),
            handler,
        ));
        self.shared.queue.push(ctx);
    }

    /// Number of accepted requests whose processing has not finished yet,
    /// wherever they currently are (queued, running, parked on I/O or on an
    /// external subsystem).
    pub fn active_request_count(&self) -> i64 {
        self.shared.control.active_request_count()
    }

    /// Number of workers currently inside a handler computation.
    pub fn live_request_count(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Number of requests waiting in the priority queue right now.
    pub fn queued_request_count(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops the engine gracefully.
    ///
    /// Admission closes first: every request submitted after this point is
    /// answered with a 503. Already-admitted requests, including ones parked
    /// on external subsystems, run to completion; once the last one
    /// finishes, the workers are drained and joined. Idempotent.
    pub fn stop(&mut self) {
        info!("request engine stopping");
        self.shared.control.request_termination();
        self.shared
            .control
            .await_termination()
            .expect("termination was requested above");

        for _ in 0..self.workers.len() {
            let serial = self.shared.serials.fetch_add(1, Ordering::Relaxed);
            self.shared.queue.push(Box::new(RequestContext::poison(
                serial,
                self.shared.default_qos.clone(),
            )));
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("request engine stopped");
    }
}

fn worker_loop<Q>(shared: Arc<Shared<Q>>)
where
    Q: Clone + Send + Sync + 'static,
{
    debug!("worker started");
    loop {
        let ctx = shared.queue.take();
        if ctx.is_poison() {
            debug!("worker draining");
            return;
        }

        shared.live.fetch_add(1, Ordering::AcqRel);
        let outcome = catch_unwind(AssertUnwindSafe(|| interpreter::run(&shared, ctx)));
        shared.live.fetch_sub(1, Ordering::AcqRel);

        if let Err(payload) = outcome {
            let fault = Fault::HandlerPanic(Fault::panic_message(payload));
            shared.sensor.generic_error(&fault);
        }
    }
}

const DEFAULT_METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

/// Builder for configuring and creating [`Module`] instances.
///
/// `default_qos` and `qos_ordering` are required; everything else has
/// defaults (4 workers, the standard method set, a `tracing`-backed sensor,
/// plain-text error bodies, `qos-worker-N` thread names).
pub struct ModuleBuilder<Q> {
    default_qos: Option<Q>,
    order: Option<QosOrder<Q>>,
    workers: usize,
    known_methods: HashSet<String>,
    sensor: Option<Arc<dyn Sensor>>,
    errors: Option<Arc<dyn NegotiableErrors>>,
    thread_factory: Box<dyn Fn(usize) -> thread::Builder>,
}

impl<Q> ModuleBuilder<Q>
where
    Q: Clone + Send + Sync + 'static,
{
    /// Sets the priority assigned to every request on admission.
    ///
    /// **This is a required component.**
    #[inline]
    pub fn default_qos(mut self, qos: Q) -> Self {
        self.default_qos = Some(qos);
        self
    }

    /// Sets the total order over the QoS type. A comparison result of
    /// [`Less`](CmpOrdering::Less) means "more urgent".
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```
    /// use qos_web::Module;
    ///
    /// #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    /// enum Tier {
    ///     Interactive,
    ///     Batch,
    /// }
    ///
    /// let mut module = Module::builder()
    ///     .default_qos(Tier::Batch)
    ///     .qos_ordering(Tier::cmp)
    ///     .build();
    /// module.stop();
    /// ```
    #[inline]
    pub fn qos_ordering(
        mut self,
        order: impl Fn(&Q, &Q) -> CmpOrdering + Send + Sync + 'static,
    ) -> Self {
        self.order = Some(Arc::new(order));
        self
    }

    /// Sets the worker pool size (default: `4`).
    #[inline]
    pub fn workers(mut self, workers: usize) -> Self {
        debug_assert!(workers > 0, "a module needs at least one worker");
        self.workers = workers;
        self
    }

    /// Replaces the set of HTTP methods routing falls back on: a routing
    /// miss answers 404 for a known method and 501 for an unknown one.
    #[inline]
    pub fn known_methods(mut self, methods: impl IntoIterator<Item = String>) -> Self {
        self.known_methods = methods.into_iter().collect();
        self
    }

    /// Replaces the default `tracing`-backed [`Sensor`].
    #[inline]
    pub fn sensor(mut self, sensor: impl Sensor + 'static) -> Self {
        self.sensor = Some(Arc::new(sensor));
        self
    }

    /// Replaces the default plain-text error bodies with an
    /// application-supplied [`NegotiableErrors`].
    #[inline]
    pub fn errors(mut self, errors: impl NegotiableErrors + 'static) -> Self {
        self.errors = Some(Arc::new(errors));
        self
    }

    /// Replaces how worker threads are configured, e.g. to change names or
    /// stack sizes.
    #[inline]
    pub fn thread_factory(mut self, factory: impl Fn(usize) -> thread::Builder + 'static) -> Self {
        self.thread_factory = Box::new(factory);
        self
    }

    /// Finalizes the builder, spawns the workers and returns the running
    /// engine.
    ///
    /// # Panics
    ///
    /// Panics when:
    /// - The `default_qos` method was not called.
    /// - The `qos_ordering` method was not called.
    /// - A worker thread could not be spawned.
    #[track_caller]
    pub fn build(self) -> Module<Q> {
        let default_qos = self
            .default_qos
            .expect("The `default_qos` method must be called to create");
        let order = self
            .order
            .expect("The `qos_ordering` method must be called to create");

        let shared = Arc::new(Shared {
            queue: PriorityQueue::new(order),
            control: RequestControl::new(),
            live: AtomicUsize::new(0),
            serials: AtomicU64::new(1),
            default_qos,
            known_methods: Arc::new(self.known_methods),
            sensor: self
                .sensor
                .unwrap_or_else(|| Arc::new(TracingSensor::new())),
            errors: self.errors.unwrap_or_else(|| Arc::new(PlainTextErrors)),
        });

        let workers = (0..self.workers)
            .map(|index| {
                let shared = Arc::clone(&shared);
                (self.thread_factory)(index)
                    .spawn(move || worker_loop(shared))
                    .expect("worker thread creation failed")
            })
            .collect();

        Module { shared, workers }
    }
}
