//! Outgoing responses: built by handlers, replayed onto a
//! [`ResponseWriter`], and finally encoded by the server.

use std::fmt::Write as _;
use std::io;

use bytes::BytesMut;
use serde::Serialize;

use super::{Headers, ResponseWriter, StatusCode};

/// Content type written by [`Response::json`].
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

const HEAD_SIZE_HINT: usize = 256;

/// A status, headers and body, assembled with builder calls.
///
/// ```
/// use starmap::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"name":"Lyra"}"#);
///
/// let wire = response.into_bytes();
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with("Content-Length: 15\r\n\r\n{\"name\":\"Lyra\"}"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// A JSON body with [`JSON_CONTENT_TYPE`]. A value that fails to
    /// serialize yields an empty `500` instead.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .header("Content-Type", JSON_CONTENT_TYPE)
                .body_bytes(body),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize JSON response body");
                Self::new(StatusCode::InternalServerError)
            }
        }
    }

    /// Appends a header; repeated names accumulate.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Chooses the `Connection` header written by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub(crate) fn extend_body(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Replays the response onto `writer` in header, status, body order.
    /// Headers the writer already carries are kept.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by [`ResponseWriter::write`].
    pub fn write_to(self, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        writer.headers_mut().extend(self.headers.iter());
        writer.write_status(self.status);

        let mut remaining = self.body.as_slice();
        while !remaining.is_empty() {
            let n = writer.write(remaining)?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            remaining = &remaining[n..];
        }
        Ok(())
    }

    /// Encodes the response for the wire.
    ///
    /// A non-empty body without a `Content-Type` is labelled as UTF-8 text.
    /// `Connection` reflects [`keep_alive`](Self::keep_alive) and
    /// `Content-Length` always closes the header block.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.append("Content-Type", TEXT_CONTENT_TYPE);
        }
        self.headers
            .set("Connection", if self.keep_alive { "keep-alive" } else { "close" });

        let mut wire = BytesMut::with_capacity(HEAD_SIZE_HINT + self.body.len());
        // Formatting into a BytesMut cannot fail.
        let _ = write!(
            wire,
            "HTTP/1.1 {} {}\r\n{}Content-Length: {}\r\n\r\n",
            self.status.as_u16(),
            self.status.canonical_reason(),
            self.headers,
            self.body.len(),
        );
        wire.extend_from_slice(&self.body);
        wire
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
