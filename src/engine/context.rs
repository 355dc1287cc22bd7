//! Per-request mutable state.

use crate::{
    engine::cleaner::{CleanerChain, CleanerId},
    http::{
        exchange::HttpExchange,
        response::{Cookie, Response},
    },
    step::Step,
};
use std::{collections::HashSet, sync::Arc};

/// The mutable state of one in-flight request.
///
/// A context is owned by exactly one party at a time (the priority queue,
/// the worker interpreting it, an I/O adapter, or an external subsystem
/// callback), so none of its state is synchronised. Handler code reaches it
/// through the context operations in [`ops`](crate::ops), which the
/// interpreter runs on the owning worker.
pub struct RequestContext<Q> {
    /// `None` marks the poison sentinel that stops a worker.
    exchange: Option<Box<dyn HttpExchange>>,
    pub(crate) serial: u64,
    pub(crate) qos: Q,
    initial_path: Vec<String>,
    pub(crate) effective_path: Vec<String>,
    pub(crate) extra_headers: Vec<(String, String)>,
    pub(crate) response_cookies: Vec<Cookie>,
    pub(crate) cleaners: CleanerChain,
    pub(crate) next_steps: Option<Step<Q, Response>>,
    pub(crate) known_methods: Arc<HashSet<String>>,
}

impl<Q> RequestContext<Q> {
    pub(crate) fn new(
        exchange: Box<dyn HttpExchange>,
        serial: u64,
        qos: Q,
        known_methods: Arc<HashSet<String>>,
        handler: Step<Q, Response>,
    ) -> Self {
        let path = split_target(exchange.target());
        Self {
            exchange: Some(exchange),
            serial,
            qos,
            initial_path: path.clone(),
            effective_path: path,
            extra_headers: Vec::new(),
            response_cookies: Vec::new(),
            cleaners: CleanerChain::new(),
            next_steps: Some(handler),
            known_methods,
        }
    }

    pub(crate) fn poison(serial: u64, qos: Q) -> Self {
        Self {
            exchange: None,
            serial,
            qos,
            initial_path: Vec::new(),
            effective_path: Vec::new(),
            extra_headers: Vec::new(),
            response_cookies: Vec::new(),
            cleaners: CleanerChain::new(),
            next_steps: None,
            known_methods: Arc::new(HashSet::new()),
        }
    }

    #[inline]
    pub(crate) fn is_poison(&self) -> bool {
        self.exchange.is_none()
    }

    pub(crate) fn exchange(&self) -> &dyn HttpExchange {
        self.exchange
            .as_deref()
            .expect("poison sentinel never reaches request processing")
    }

    pub(crate) fn exchange_mut(&mut self) -> &mut dyn HttpExchange {
        self.exchange
            .as_deref_mut()
            .expect("poison sentinel never reaches request processing")
    }

    /// Raw `Accept` header values, for error-body negotiation.
    pub(crate) fn accept_headers(&self) -> Vec<String> {
        self.exchange().headers("accept")
    }
}

/// Read accessors available to handler code.
impl<Q> RequestContext<Q> {
    /// Engine-unique serial of this request. Also the ordering tie-breaker
    /// within one priority class.
    #[inline]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    #[inline]
    pub fn qos(&self) -> &Q {
        &self.qos
    }

    pub fn method(&self) -> String {
        self.exchange().method().to_owned()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.exchange().header(name)
    }

    pub fn headers(&self, name: &str) -> Vec<String> {
        self.exchange().headers(name)
    }

    pub fn header_names(&self) -> Vec<String> {
        self.exchange().header_names()
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        self.exchange().parameter(name)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.exchange().parameter_names()
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.exchange().cookies()
    }

    /// The request path as it arrived, split into segments.
    pub fn initial_path(&self) -> &[String] {
        &self.initial_path
    }

    /// The not-yet-consumed path segments routing operates on.
    pub fn effective_path(&self) -> &[String] {
        &self.effective_path
    }
}

/// Mutators available to handler code.
impl<Q> RequestContext<Q> {
    /// Queues headers to append to the outgoing response, in order.
    pub fn add_headers(&mut self, headers: impl IntoIterator<Item = (String, String)>) {
        self.extra_headers.extend(headers);
    }

    /// Queues a cookie to set on the outgoing response.
    pub fn add_cookie(&mut self, cookie: Cookie) {
        self.response_cookies.push(cookie);
    }

    /// Replaces the unconsumed path, e.g. after a routing step consumed a
    /// prefix.
    pub fn set_effective_path(&mut self, path: Vec<String>) {
        self.effective_path = path;
    }

    /// Registers a cleanup action to run when this request finishes.
    pub fn register_cleanup(&mut self, action: impl FnOnce() + Send + 'static) -> CleanerId {
        self.cleaners.register(Box::new(action))
    }

    /// Drops a registered cleanup action without running it.
    pub fn remove_cleanup(&mut self, id: CleanerId) {
        self.cleaners.unregister(id);
    }
}

fn split_target(target: &str) -> Vec<String> {
    let path = target.split('?').next().unwrap_or("");
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_target_drops_query_and_empty_segments() {
        assert_eq!(split_target("/a//b/c?x=1"), ["a", "b", "c"]);
        assert_eq!(split_target("/"), Vec::<String>::new());
        assert_eq!(split_target(""), Vec::<String>::new());
    }

    #[test]
    fn poison_has_no_exchange() {
        let ctx = RequestContext::<u8>::poison(3, 0);
        assert!(ctx.is_poison());
        assert_eq!(ctx.serial(), 3);
    }
}
