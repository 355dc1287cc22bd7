//! qos_web - QoS-aware HTTP request execution engine for microservices
//!
//! A fixed pool of worker threads drains a priority queue of in-flight
//! requests. Each request runs an application-defined handler expressed as a
//! chain of suspendable operations ([`Step`]); suspensions hand control back
//! to the engine so it can re-schedule the request by priority, read the
//! body without blocking a worker, or park the request on an external
//! subsystem (a database client, a job queue) and resume when it completes.
//!
//! The engine deliberately contains no socket handling: the embedding HTTP
//! server adapts each request into an [`HttpExchange`] and hands it over.
//!
//! # Features
//!
//! ## 🚦 Scheduling
//! - **Priority ordering** - requests of a more urgent QoS class always
//!   reach a worker first; within a class, admission order wins.
//! - **User-defined QoS type** - the engine is generic over `Q` plus a total
//!   order you supply; priorities can change mid-request.
//! - **Priority propagation** - priority-aware subsystems receive the
//!   request's `(qos, serial)` pair and can drain consistently.
//!
//! ## 🧵 Cooperative handlers
//! - **Suspendable computations** - handlers are [`Step`] chains; the only
//!   preemption points are the operations in [`ops`].
//! - **Non-blocking body I/O** - bounded reads and chunked writes run on the
//!   adapter's event threads, never on a parked worker.
//! - **External boundaries** - fire-and-resume ([`Completable`]) and
//!   priority-aware ([`Scheduled`]) subsystems plug in with two callbacks.
//!
//! ## 🏭 Production Ready
//! - **Graceful shutdown** - admission flips off atomically, admitted
//!   requests drain, workers join; late submissions get an immediate 503.
//! - **Cleanup chains** - per-request cleanup actions run newest-first on
//!   every exit path.
//! - **Error shaping** - failures become content-negotiated responses with
//!   a correlation id reported through the [`Sensor`].
//!
//! # Quick Start
//!
//! ```
//! use qos_web::{ops, Module, Response, Step};
//!
//! fn handler() -> Step<u8, Response> {
//!     ops::read_body(64 * 1024)
//!         .map(|bytes| Response::status(200).body(format!("{} bytes", bytes.len())))
//! }
//!
//! let mut module = Module::<u8>::builder()
//!     .default_qos(10)
//!     .qos_ordering(u8::cmp)
//!     .workers(4)
//!     .build();
//!
//! // For every request the embedding server hands over:
//! //     module.handle(exchange, handler());
//!
//! module.stop();
//! ```
pub(crate) mod engine {
    pub(crate) mod boundary;
    pub(crate) mod cleaner;
    pub(crate) mod context;
    pub(crate) mod control;
    pub(crate) mod input;
    pub(crate) mod interpreter;
    pub(crate) mod module;
    pub(crate) mod output;
    pub(crate) mod queue;
}
pub(crate) mod http {
    pub(crate) mod exchange;
    pub(crate) mod response;
}
pub(crate) mod errors;
pub mod ops;
pub(crate) mod sensor;
pub(crate) mod step;

pub use crate::{
    engine::{
        boundary::{Callback, Completable, FutureBoundary, Scheduled},
        cleaner::CleanerId,
        context::RequestContext,
        module::{Module, ModuleBuilder},
    },
    errors::{BoxError, NegotiableErrors, PlainTextErrors},
    http::{
        exchange::{HttpExchange, InputChannel, InputListener, OutputChannel, OutputListener},
        response::{Cookie, Response},
    },
    sensor::{Sensor, TracingSensor},
    step::Step,
};

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted in-memory exchange driving the engine without a real server.
    //!
    //! Listener events fire from a spawned "adapter" thread, matching the
    //! contract that they never arrive synchronously from inside `begin`.

    use crate::http::{
        exchange::{
            HttpExchange, InputChannel, InputListener, OutputChannel, OutputListener,
        },
        response::Cookie,
    };
    use std::{
        io,
        sync::{Arc, Condvar, Mutex},
        thread,
        time::Duration,
    };

    /// What the exchange observed the engine doing.
    #[derive(Clone, Default)]
    pub(crate) struct Delivery {
        pub(crate) status: Option<u16>,
        pub(crate) headers: Vec<(String, String)>,
        pub(crate) cookies: Vec<Cookie>,
        pub(crate) body: Vec<u8>,
        pub(crate) chunks: Vec<usize>,
        pub(crate) completed: bool,
        pub(crate) input_closed: bool,
    }

    pub(crate) struct Recorded {
        state: Mutex<Delivery>,
        done: Condvar,
    }

    impl Recorded {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(Delivery::default()),
                done: Condvar::new(),
            })
        }

        pub(crate) fn snapshot(&self) -> Delivery {
            self.state.lock().unwrap().clone()
        }

        /// Blocks until the exchange was completed, then returns what was
        /// delivered. Panics after two seconds.
        pub(crate) fn wait_completed(&self) -> Delivery {
            let mut state = self.state.lock().unwrap();
            let deadline = Duration::from_secs(2);
            while !state.completed {
                let (next, timeout) = self.done.wait_timeout(state, deadline).unwrap();
                state = next;
                assert!(!timeout.timed_out(), "exchange never completed");
            }
            state.clone()
        }
    }

    pub(crate) struct FakeExchange {
        method: String,
        target: String,
        req_headers: Vec<(String, String)>,
        parameters: Vec<(String, String)>,
        req_cookies: Vec<Cookie>,
        input: ScriptedInput,
        output: ScriptedOutput,
        recorded: Arc<Recorded>,
    }

    impl FakeExchange {
        pub(crate) fn new(method: &str, target: &str) -> Self {
            let recorded = Recorded::new();
            Self {
                method: method.to_owned(),
                target: target.to_owned(),
                req_headers: Vec::new(),
                parameters: Vec::new(),
                req_cookies: Vec::new(),
                input: ScriptedInput {
                    data: Vec::new(),
                    pos: 0,
                    step: 7,
                    fail_read: false,
                    recorded: Arc::clone(&recorded),
                },
                output: ScriptedOutput {
                    fail_write: false,
                    recorded: Arc::clone(&recorded),
                },
                recorded,
            }
        }

        pub(crate) fn body(mut self, data: &[u8]) -> Self {
            self.input.data = data.to_vec();
            self
        }

        pub(crate) fn request_header(mut self, name: &str, value: &str) -> Self {
            self.req_headers.push((name.to_owned(), value.to_owned()));
            self
        }

        pub(crate) fn parameter(mut self, name: &str, value: &str) -> Self {
            self.parameters.push((name.to_owned(), value.to_owned()));
            self
        }

        pub(crate) fn request_cookie(mut self, cookie: Cookie) -> Self {
            self.req_cookies.push(cookie);
            self
        }

        /// Makes every body read fail with a connection reset.
        pub(crate) fn failing_read(mut self) -> Self {
            self.input.fail_read = true;
            self
        }

        /// Makes every body write fail with a broken pipe.
        pub(crate) fn failing_write(mut self) -> Self {
            self.output.fail_write = true;
            self
        }

        pub(crate) fn recorded(&self) -> Arc<Recorded> {
            Arc::clone(&self.recorded)
        }
    }

    impl HttpExchange for FakeExchange {
        fn target(&self) -> &str {
            &self.target
        }

        fn method(&self) -> &str {
            &self.method
        }

        fn header(&self, name: &str) -> Option<String> {
            self.req_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        }

        fn headers(&self, name: &str) -> Vec<String> {
            self.req_headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .collect()
        }

        fn header_names(&self) -> Vec<String> {
            self.req_headers.iter().map(|(n, _)| n.clone()).collect()
        }

        fn parameter(&self, name: &str) -> Option<String> {
            self.parameters
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        }

        fn parameter_names(&self) -> Vec<String> {
            self.parameters.iter().map(|(n, _)| n.clone()).collect()
        }

        fn cookies(&self) -> Vec<Cookie> {
            self.req_cookies.clone()
        }

        fn set_status(&mut self, status: u16) {
            self.recorded.state.lock().unwrap().status = Some(status);
        }

        fn add_header(&mut self, name: &str, value: &str) {
            self.recorded
                .state
                .lock()
                .unwrap()
                .headers
                .push((name.to_owned(), value.to_owned()));
        }

        fn add_cookie(&mut self, cookie: &Cookie) {
            self.recorded.state.lock().unwrap().cookies.push(cookie.clone());
        }

        fn input(&mut self) -> &mut dyn InputChannel {
            &mut self.input
        }

        fn output(&mut self) -> &mut dyn OutputChannel {
            &mut self.output
        }

        fn complete(&mut self) {
            self.recorded.state.lock().unwrap().completed = true;
            self.recorded.done.notify_all();
        }
    }

    struct ScriptedInput {
        data: Vec<u8>,
        pos: usize,
        /// Bytes served per read call, to force multiple pulls per event.
        step: usize,
        fail_read: bool,
        recorded: Arc<Recorded>,
    }

    impl InputChannel for ScriptedInput {
        fn begin(&mut self, listener: Arc<dyn InputListener>) {
            thread::spawn(move || {
                listener.data_available();
                listener.all_data_read();
            });
        }

        fn is_ready(&mut self) -> bool {
            self.fail_read || self.pos < self.data.len()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_read {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "read failed"));
            }
            let count = buf.len().min(self.step).min(self.data.len() - self.pos);
            buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
            self.pos += count;
            Ok(count)
        }

        fn close(&mut self) {
            self.recorded.state.lock().unwrap().input_closed = true;
        }
    }

    struct ScriptedOutput {
        fail_write: bool,
        recorded: Arc<Recorded>,
    }

    impl OutputChannel for ScriptedOutput {
        fn begin(&mut self, listener: Arc<dyn OutputListener>) {
            thread::spawn(move || listener.writable());
        }

        fn is_ready(&mut self) -> bool {
            true
        }

        fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
            if self.fail_write {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            let mut state = self.recorded.state.lock().unwrap();
            state.chunks.push(chunk.len());
            state.body.extend_from_slice(chunk);
            Ok(())
        }
    }

    /// Polls `condition` until it holds, for at most two seconds.
    pub(crate) fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition never held");
    }
}
