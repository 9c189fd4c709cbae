//! Incoming requests, parsed with [`httparse`].

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Why a buffer could not be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// More bytes are needed; not a protocol error.
    #[error("request is incomplete")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },
}

/// A request read off the wire.
///
/// The body holds exactly the bytes announced by `Content-Length`; anything
/// after that belongs to the next request on the connection.
///
/// ```
/// use starmap::http::request::Request;
///
/// let raw = b"GET /stars?mag=4 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/stars");
/// assert_eq!(request.query_param("mag"), Some("4"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    minor_version: u8,
    headers: Headers,
    body: Bytes,
    params: HashMap<String, String>,
}

const MAX_HEADERS: usize = 64;

impl Request {
    /// Parses one request from the front of `buf`.
    ///
    /// On success returns the request and the offset of its body within
    /// `buf`; the request occupies `offset + content_length()` bytes.
    ///
    /// # Errors
    ///
    /// [`RequestError::Incomplete`] while the head or the announced body is
    /// still arriving; any other variant means the bytes are unusable.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);
        let httparse::Status::Complete(body_offset) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = required(head.method, "method")?;
        let target = required(head.path, "path")?;
        let minor_version = required(head.version, "version")?;
        let headers = collect_headers(head.headers);

        let body_end = body_offset + declared_length(&headers)?;
        let Some(body) = buf.get(body_offset..body_end) else {
            return Err(RequestError::Incomplete);
        };

        let (path, query) = split_target(target);
        let params = query.as_deref().map(parse_query).unwrap_or_default();

        let request = Self {
            method: method.parse().unwrap_or_else(|never| match never {}),
            path,
            query,
            minor_version,
            headers,
            body: Bytes::copy_from_slice(body),
            params,
        };
        Ok((request, body_offset))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path without its query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.minor_version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the connection stays open after this request. An explicit
    /// `Connection` header decides; otherwise only HTTP/1.1 persists.
    pub fn is_keep_alive(&self) -> bool {
        self.headers
            .get("connection")
            .map_or(self.minor_version == 1, |value| {
                value.eq_ignore_ascii_case("keep-alive")
            })
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

fn required<T>(field: Option<T>, name: &'static str) -> Result<T, RequestError> {
    field.ok_or(RequestError::MissingField { field: name })
}

// Non-UTF-8 header values are dropped.
fn collect_headers(raw: &[httparse::Header<'_>]) -> Headers {
    raw.iter()
        .filter_map(|h| Some((h.name, std::str::from_utf8(h.value).ok()?)))
        .collect()
}

fn declared_length(headers: &Headers) -> Result<usize, RequestError> {
    let Some(value) = headers.get("content-length") else {
        return Ok(0);
    };
    value
        .trim()
        .parse()
        .map_err(|_| RequestError::InvalidContentLength {
            value: value.to_owned(),
        })
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

// `+` becomes a space; no percent-decoding.
fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}
