use crate::http::response::Response;
use std::{error, fmt};

/// Error type carried by failed handler computations and boundary callbacks.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Faults raised by the engine itself rather than by application code.
#[derive(Debug)]
pub(crate) enum Fault {
    /// A handler-supplied closure panicked inside the interpreter.
    HandlerPanic(String),
    /// A cleanup action panicked while the request was being finished.
    CleanerPanic(String),
    /// A context was handed to a worker without a pending continuation.
    MissingContinuation,
    /// The sensor or the errors collaborator failed while shaping an error
    /// response.
    ShapingFailed(String),
}

impl error::Error for Fault {}
impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::HandlerPanic(msg) => write!(f, "handler panicked: {msg}"),
            Fault::CleanerPanic(msg) => write!(f, "cleanup action panicked: {msg}"),
            Fault::MissingContinuation => write!(f, "request resumed without a continuation"),
            Fault::ShapingFailed(msg) => write!(f, "error response shaping failed: {msg}"),
        }
    }
}

impl Fault {
    /// Renders a panic payload into something loggable.
    pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
        if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_owned()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            String::from("non-string panic payload")
        }
    }
}

/// Formats user-visible error responses negotiated against the request's
/// `Accept` headers.
///
/// The engine never renders error bodies itself: whenever a request has to be
/// answered with an engine-produced error, the response is asked from this
/// collaborator so the application controls the wire format (JSON problem
/// documents, HTML error pages, ...). Implementations receive the raw `Accept`
/// header values and are free to ignore them.
///
/// Implementations must be thread-safe: the engine calls them from worker
/// threads.
///
/// # Examples
///
/// ```
/// use qos_web::{NegotiableErrors, Response};
///
/// struct JsonErrors;
///
/// impl NegotiableErrors for JsonErrors {
///     fn internal_error(&self, _accept: &[String], correlation_id: &str) -> Response {
///         Response::status(500)
///             .header("content-type", "application/json")
///             .body(format!(r#"{{"error":"internal","ref":"{correlation_id}"}}"#))
///     }
///
///     fn byte_length_exceeded(&self, _accept: &[String], limit: usize) -> Response {
///         Response::status(413)
///             .header("content-type", "application/json")
///             .body(format!(r#"{{"error":"body too large","limit":{limit}}}"#))
///     }
/// }
/// ```
pub trait NegotiableErrors: Send + Sync {
    /// An unexpected failure while processing the request. `correlation_id`
    /// is the reference the sensor produced for the matching log event.
    fn internal_error(&self, accept: &[String], correlation_id: &str) -> Response;

    /// The request body exceeded the byte budget the handler allowed.
    fn byte_length_exceeded(&self, accept: &[String], limit: usize) -> Response;
}

/// Default [`NegotiableErrors`] emitting minimal `text/plain` bodies
/// regardless of the `Accept` headers.
pub struct PlainTextErrors;

impl NegotiableErrors for PlainTextErrors {
    fn internal_error(&self, _accept: &[String], correlation_id: &str) -> Response {
        Response::status(500)
            .header("content-type", "text/plain")
            .body(format!("internal error, reference {correlation_id}"))
    }

    fn byte_length_exceeded(&self, _accept: &[String], limit: usize) -> Response {
        Response::status(413)
            .header("content-type", "text/plain")
            .body(format!("request body exceeds the limit of {limit} bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_internal_error() {
        let resp = PlainTextErrors.internal_error(&[], "ab-12");

        assert_eq!(resp.status_code(), 500);
        assert!(String::from_utf8_lossy(resp.body_bytes()).contains("ab-12"));
    }

    #[test]
    fn plain_byte_length_exceeded() {
        let resp = PlainTextErrors.byte_length_exceeded(&[String::from("text/html")], 4096);

        assert_eq!(resp.status_code(), 413);
        assert!(String::from_utf8_lossy(resp.body_bytes()).contains("4096"));
    }

    #[test]
    fn fault_display() {
        let msg = format!("{}", Fault::HandlerPanic(String::from("boom")));
        assert_eq!(msg, "handler panicked: boom");
    }
}
