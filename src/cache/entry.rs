use bytes::Bytes;

use crate::http::{Headers, StatusCode};

/// Statuses whose responses may be committed to the cache.
pub const CACHEABLE_STATUSES: [StatusCode; 2] = [StatusCode::Ok, StatusCode::NotModified];

/// Returns `true` if a response with `status` may be cached.
pub fn is_cacheable(status: StatusCode) -> bool {
    CACHEABLE_STATUSES.contains(&status)
}

/// An immutable snapshot of a completed, cacheable response.
///
/// Only [`CacheEntry::new`] builds one, and it refuses statuses outside
/// [`CACHEABLE_STATUSES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl CacheEntry {
    /// Snapshots a response, or returns `None` if its status is not cacheable.
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Option<Self> {
        is_cacheable(status).then(|| Self {
            status,
            headers,
            body: body.into(),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ok_and_not_modified_are_cacheable() {
        assert!(is_cacheable(StatusCode::Ok));
        assert!(is_cacheable(StatusCode::NotModified));
        for status in [
            StatusCode::Created,
            StatusCode::NoContent,
            StatusCode::NotFound,
            StatusCode::InternalServerError,
        ] {
            assert!(!is_cacheable(status), "{status} must not be cacheable");
            assert!(CacheEntry::new(status, Headers::new(), Vec::new()).is_none());
        }
    }

    #[test]
    fn entry_keeps_what_it_was_built_from() {
        let headers: Headers = [("Content-Type", "application/json")].into_iter().collect();
        let entry = CacheEntry::new(StatusCode::Ok, headers.clone(), &b"[]"[..]).unwrap();
        assert_eq!(entry.status(), StatusCode::Ok);
        assert_eq!(entry.headers(), &headers);
        assert_eq!(entry.body().as_ref(), b"[]");
    }
}
