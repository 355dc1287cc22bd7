//! Response values handed from handlers to the output machinery.

/// A complete HTTP response produced by a handler.
///
/// Built by chaining methods in the usual order: [`status`](Response::status)
/// -> headers/cookies -> [`body`](Response::body). Unlike a streaming
/// response writer, this is a plain value: the engine serialises it onto the
/// wire asynchronously after the handler returned, so nothing here touches a
/// socket.
///
/// # Examples
/// ```
/// use qos_web::Response;
///
/// let resp = Response::status(200)
///     .header("content-type", "text/html")
///     .body("<h1>Hello</h1>");
///
/// assert_eq!(resp.status_code(), 200);
/// ```
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    body: Vec<u8>,
}

impl Response {
    /// Starts a response with the given status code.
    #[inline]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header. Headers are written in insertion order.
    #[inline]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends a cookie to set on the response.
    #[inline]
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Sets the response body.
    #[inline]
    pub fn body(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.body = data.into();
        self
    }

    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status
    }

    #[inline]
    pub fn header_entries(&self) -> &[(String, String)] {
        &self.headers
    }

    #[inline]
    pub fn cookie_entries(&self) -> &[Cookie] {
        &self.cookies
    }

    #[inline]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub(crate) fn into_parts(self) -> (u16, Vec<(String, String)>, Vec<Cookie>, Vec<u8>) {
        (self.status, self.headers, self.cookies, self.body)
    }
}

/// An HTTP cookie with optional attributes.
///
/// Optional attributes are only forwarded to the HTTP adapter when present.
///
/// # Examples
/// ```
/// use qos_web::Cookie;
///
/// let session = Cookie::new("session", "e51a")
///     .max_age(3600)
///     .path("/")
///     .http_only(true);
///
/// assert_eq!(session.name, "session");
/// assert_eq!(session.max_age, Some(3600));
/// assert_eq!(session.secure, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
}

impl Cookie {
    #[inline]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: None,
            secure: None,
            http_only: None,
        }
    }

    /// Lifetime in seconds.
    #[inline]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[inline]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[inline]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    #[inline]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = Some(http_only);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_keep_insertion_order() {
        let resp = Response::status(200)
            .header("a", "1")
            .header("b", "2")
            .header("a", "3");

        let names: Vec<&str> = resp
            .header_entries()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "a"]);
    }

    #[test]
    fn into_parts_round_trip() {
        let resp = Response::status(404)
            .cookie(Cookie::new("k", "v"))
            .body("missing");

        let (status, headers, cookies, body) = resp.into_parts();
        assert_eq!(status, 404);
        assert!(headers.is_empty());
        assert_eq!(cookies.len(), 1);
        assert_eq!(body, b"missing");
    }
}
