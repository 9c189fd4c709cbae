use std::io;

use bytes::{Bytes, BytesMut};

use super::CacheEntry;
use crate::http::{Headers, ResponseWriter, StatusCode};

/// A [`ResponseWriter`] that records what passes through it.
///
/// Every call is forwarded to the wrapped writer first, so the client sees
/// exactly what it would have seen without the capture. Header, status, and
/// written-state queries are answered by the wrapped writer, which keeps the
/// capture invisible to layers further down the chain.
pub struct ResponseCapture<'w> {
    inner: &'w mut dyn ResponseWriter,
    // Headers the writer already carried when the capture was installed.
    inherited: Headers,
    status: Option<StatusCode>,
    body: BytesMut,
}

impl<'w> ResponseCapture<'w> {
    pub fn new(inner: &'w mut dyn ResponseWriter) -> Self {
        let inherited = inner.headers().clone();
        Self {
            inner,
            inherited,
            status: None,
            body: BytesMut::new(),
        }
    }

    /// The status recorded so far; `None` until a status is written or
    /// implied by a body write.
    pub fn captured_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Body bytes the wrapped writer accepted.
    pub fn captured_body(&self) -> &[u8] {
        &self.body
    }

    /// Snapshots the recorded response if its status is cacheable.
    ///
    /// Only headers added below the capture are kept. Headers that were on
    /// the writer when it was installed belong to outer layers, which add
    /// them again when a stored entry is replayed.
    pub fn into_entry(self) -> Option<CacheEntry> {
        let status = self.status?;
        let headers = self.downstream_headers();
        CacheEntry::new(status, headers, Bytes::from(self.body))
    }

    /// Headers on the wrapped writer minus one occurrence of each inherited
    /// `(name, value)` pair.
    fn downstream_headers(&self) -> Headers {
        let mut inherited: Vec<(&str, &str)> = self.inherited.iter().collect();
        self.inner
            .headers()
            .iter()
            .filter(|(name, value)| {
                let seen = inherited
                    .iter()
                    .position(|(n, v)| n.eq_ignore_ascii_case(name) && v == value);
                match seen {
                    Some(i) => {
                        inherited.swap_remove(i);
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }
}

impl ResponseWriter for ResponseCapture<'_> {
    fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.inner.write_status(status);
        self.status = Some(self.inner.status());
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(data)?;
        self.body.extend_from_slice(&data[..n]);
        self.status = Some(self.inner.status());
        Ok(n)
    }

    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn written(&self) -> bool {
        self.inner.written()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseRecorder;

    #[test]
    fn writes_are_forwarded_and_recorded() {
        let mut recorder = ResponseRecorder::new();
        let mut capture = ResponseCapture::new(&mut recorder);

        assert!(!capture.written());
        capture.headers_mut().append("Content-Type", "application/json");
        capture.write(b"{\"message\":").unwrap();
        capture.write(b"\"pong\"}").unwrap();

        assert_eq!(capture.captured_status(), Some(StatusCode::Ok));
        assert_eq!(capture.captured_body(), br#"{"message":"pong"}"#);
        assert!(capture.written());

        let entry = capture.into_entry().unwrap();
        assert_eq!(entry.body().as_ref(), br#"{"message":"pong"}"#);
        assert_eq!(entry.headers().get("content-type"), Some("application/json"));

        assert_eq!(recorder.body(), br#"{"message":"pong"}"#);
        assert_eq!(recorder.status(), StatusCode::Ok);
    }

    #[test]
    fn entry_keeps_only_headers_added_downstream() {
        let mut recorder = ResponseRecorder::new();
        recorder.headers_mut().append("X-Server", "starmap");
        recorder.headers_mut().append("X-Cache", "MISS");

        let mut capture = ResponseCapture::new(&mut recorder);
        capture.headers_mut().append("Content-Type", "application/json");
        capture.headers_mut().append("X-Server", "starmap");
        capture.write(b"[]").unwrap();

        let entry = capture.into_entry().unwrap();
        let stored: Vec<_> = entry.headers().iter().collect();
        assert_eq!(
            stored,
            vec![("Content-Type", "application/json"), ("X-Server", "starmap")]
        );

        // The client still saw every header.
        assert_eq!(recorder.headers().get_all("x-server").count(), 2);
        assert_eq!(recorder.headers().get("x-cache"), Some("MISS"));
    }

    #[test]
    fn status_reflects_downstream_state() {
        let mut recorder = ResponseRecorder::new();
        recorder.write_status(StatusCode::NotModified);

        let mut capture = ResponseCapture::new(&mut recorder);
        assert!(capture.written());
        capture.write_status(StatusCode::Ok);

        // The earlier status stuck on the real writer, and the capture agrees.
        assert_eq!(capture.status(), StatusCode::NotModified);
        assert_eq!(capture.captured_status(), Some(StatusCode::NotModified));
    }

    #[test]
    fn nothing_written_yields_no_entry() {
        let mut recorder = ResponseRecorder::new();
        let capture = ResponseCapture::new(&mut recorder);
        assert_eq!(capture.captured_status(), None);
        assert!(capture.into_entry().is_none());
    }

    #[test]
    fn error_status_yields_no_entry() {
        let mut recorder = ResponseRecorder::new();
        let mut capture = ResponseCapture::new(&mut recorder);
        capture.write_status(StatusCode::InternalServerError);
        capture.write(b"stars unavailable").unwrap();
        assert!(capture.into_entry().is_none());
        assert_eq!(recorder.status(), StatusCode::InternalServerError);
    }

    struct BrokenPipe(ResponseRecorder);

    impl ResponseWriter for BrokenPipe {
        fn headers(&self) -> &Headers {
            self.0.headers()
        }
        fn headers_mut(&mut self) -> &mut Headers {
            self.0.headers_mut()
        }
        fn write_status(&mut self, status: StatusCode) {
            self.0.write_status(status)
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
        fn status(&self) -> StatusCode {
            self.0.status()
        }
        fn written(&self) -> bool {
            self.0.written()
        }
    }

    #[test]
    fn failed_write_is_not_recorded() {
        let mut sink = BrokenPipe(ResponseRecorder::new());
        let mut capture = ResponseCapture::new(&mut sink);
        assert!(capture.write(b"lost").is_err());
        assert!(capture.captured_body().is_empty());
        assert_eq!(capture.captured_status(), None);
    }
}
