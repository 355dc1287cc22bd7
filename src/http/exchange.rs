//! Contract between the engine and the embedding HTTP server.
//!
//! The engine contains no socket handling, parsing, or protocol logic of its
//! own. Each request reaches it as an [`HttpExchange`]: an adapter around the
//! embedding server's request/response pair, offering header and parameter
//! accessors plus non-blocking byte channels for the body in both directions.

use crate::http::response::Cookie;
use std::{io, sync::Arc};

/// One in-flight HTTP request/response pair, owned by the engine until the
/// response is complete.
///
/// # Ownership and threading
///
/// The exchange travels with its request context: at any moment exactly one
/// party (a worker thread, an I/O listener, an external subsystem callback)
/// holds it, so implementations do not need internal locking for the methods
/// below. Listener callbacks registered through [`InputChannel::begin`] and
/// [`OutputChannel::begin`] are the one place where the adapter calls back
/// into the engine; see those traits for the rules.
pub trait HttpExchange: Send + 'static {
    /// The request target path, e.g. `/users/42/avatar`.
    fn target(&self) -> &str;

    /// The HTTP method name, upper-case.
    fn method(&self) -> &str;

    /// First value of the named header, if any. Name matching is
    /// case-insensitive, as HTTP requires.
    fn header(&self, name: &str) -> Option<String>;

    /// All values of the named header, in wire order.
    fn headers(&self, name: &str) -> Vec<String>;

    fn header_names(&self) -> Vec<String>;

    /// First value of the named query/form parameter, if any.
    fn parameter(&self, name: &str) -> Option<String>;

    fn parameter_names(&self) -> Vec<String>;

    /// Cookies presented by the client.
    fn cookies(&self) -> Vec<Cookie>;

    /// Sets the response status line. Called exactly once, before any header.
    fn set_status(&mut self, status: u16);

    /// Appends a response header.
    fn add_header(&mut self, name: &str, value: &str);

    /// Sets a response cookie. Optional attributes that are `None` must not
    /// be emitted.
    fn add_cookie(&mut self, cookie: &Cookie);

    /// Non-blocking request body channel.
    fn input(&mut self) -> &mut dyn InputChannel;

    /// Non-blocking response body channel.
    fn output(&mut self) -> &mut dyn OutputChannel;

    /// Signals that the response is complete and the underlying request may
    /// be recycled. Called exactly once per exchange.
    fn complete(&mut self);
}

/// Non-blocking source of request body bytes.
///
/// The channel is event-driven: after [`begin`](InputChannel::begin) the
/// adapter invokes the registered [`InputListener`] from its own event thread
/// whenever bytes become readable, once when the body is exhausted, and on
/// failure. Listener methods must never be invoked synchronously from inside
/// `begin` itself.
pub trait InputChannel {
    /// Registers the listener and starts event delivery.
    fn begin(&mut self, listener: Arc<dyn InputListener>);

    /// Whether a [`read`](InputChannel::read) would currently yield bytes
    /// without blocking.
    fn is_ready(&mut self) -> bool;

    /// Reads available bytes into `buf`, returning the count. Only called
    /// while [`is_ready`](InputChannel::is_ready) reports `true`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Releases the channel once the body has been consumed.
    fn close(&mut self);
}

/// Events produced by an [`InputChannel`].
///
/// May arrive from any adapter thread, but never from two threads at once and
/// never re-entrantly.
pub trait InputListener: Send + Sync {
    /// Bytes are readable; the listener should drain while
    /// [`InputChannel::is_ready`] holds.
    fn data_available(&self);

    /// The body is exhausted; no further `data_available` calls follow.
    /// Adapters may still signal this after the listener stopped reading
    /// mid-body, so implementations guard against late delivery.
    fn all_data_read(&self);

    /// The transport failed; terminal.
    fn failed(&self, error: io::Error);
}

/// Non-blocking sink for response body bytes.
///
/// Mirrors [`InputChannel`]: after [`begin`](OutputChannel::begin) the
/// adapter signals writability through the listener from its own event
/// thread, never synchronously from inside `begin`.
pub trait OutputChannel {
    /// Registers the listener and starts event delivery.
    fn begin(&mut self, listener: Arc<dyn OutputListener>);

    /// Whether a [`write`](OutputChannel::write) would currently be accepted
    /// without blocking.
    fn is_ready(&mut self) -> bool;

    /// Writes the whole chunk. Only called while
    /// [`is_ready`](OutputChannel::is_ready) reports `true`.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Events produced by an [`OutputChannel`].
pub trait OutputListener: Send + Sync {
    /// The channel can accept bytes again.
    fn writable(&self);

    /// The transport failed; terminal.
    fn failed(&self, error: io::Error);
}
