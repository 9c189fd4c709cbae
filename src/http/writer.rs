//! The outbound response sink.
//!
//! Middleware and the router write responses through a [`ResponseWriter`]
//! instead of returning them, which lets a layer substitute its own sink for
//! the rest of the chain (see [`crate::cache::ResponseCapture`]).

use std::io;

use tracing::debug;

use super::{Headers, Response, StatusCode};

/// Write access to a response in progress.
///
/// The status defaults to `200 OK`. It becomes fixed the first time it is
/// written, either explicitly through [`write_status`](Self::write_status) or
/// implicitly by the first body [`write`](Self::write).
pub trait ResponseWriter: Send {
    fn headers(&self) -> &Headers;

    /// Headers may be changed until the response leaves the process.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Sets the status. Ignored once a status has been written.
    fn write_status(&mut self, status: StatusCode);

    /// Appends body bytes, fixing the status if it was not yet written.
    ///
    /// Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// The status the client will see.
    fn status(&self) -> StatusCode;

    /// Whether a status has been written.
    fn written(&self) -> bool;
}

/// In-memory [`ResponseWriter`] that accumulates a complete [`Response`].
///
/// The server hands one to the pipeline for every request and serializes it
/// once dispatch returns. Tests use it directly to inspect what a pipeline
/// produced.
///
/// # Examples
///
/// ```
/// use starmap::http::{ResponseRecorder, ResponseWriter, StatusCode};
///
/// let mut recorder = ResponseRecorder::new();
/// assert!(!recorder.written());
///
/// recorder.write(b"pong").unwrap();
/// assert!(recorder.written());
/// assert_eq!(recorder.status(), StatusCode::Ok);
/// assert_eq!(recorder.body(), b"pong");
/// ```
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    response: Response,
    written: bool,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&self) -> &[u8] {
        self.response.content()
    }

    /// Consumes the recorder, yielding the accumulated response.
    pub fn into_response(self) -> Response {
        self.response
    }
}

impl ResponseWriter for ResponseRecorder {
    fn headers(&self) -> &Headers {
        self.response.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.response.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.written {
            debug!(
                current = self.response.status().as_u16(),
                ignored = status.as_u16(),
                "status already written"
            );
            return;
        }
        self.response.set_status(status);
        self.written = true;
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.written = true;
        self.response.extend_body(data);
        Ok(data.len())
    }

    fn status(&self) -> StatusCode {
        self.response.status()
    }

    fn written(&self) -> bool {
        self.written
    }
}
