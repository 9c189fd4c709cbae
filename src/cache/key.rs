//! Cache and in-flight key derivation.
//!
//! Both keys are pure functions of the request identity. Conditional requests
//! (those carrying [`CONDITIONAL_HEADER`]) get their own cache key but share
//! the in-flight key of the unconditional variant, so while either variant of
//! a route is being computed the other one runs uncached.

use crate::{Method, Request};

/// The freshness-validator header that splits the cache key.
pub const CONDITIONAL_HEADER: &str = "If-Modified-Since";

const CONDITIONAL_PREFIX: &str = "IMS";
const PROGRESS_PREFIX: &str = "PROG";

/// Key under which a committed response is stored.
pub fn cache_key(method: &Method, path: &str, conditional: bool) -> String {
    let prefix = if conditional { CONDITIONAL_PREFIX } else { "" };
    format!("{prefix}{method}{path}")
}

/// Key of the in-flight marker for a route. Never depends on the conditional flag.
pub fn progress_key(method: &Method, path: &str) -> String {
    format!("{PROGRESS_PREFIX}{method}{path}")
}

/// The pair of keys the cache layer uses for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    pub cache_key: String,
    pub progress_key: String,
}

impl CacheKeys {
    pub fn derive(method: &Method, path: &str, conditional: bool) -> Self {
        Self {
            cache_key: cache_key(method, path, conditional),
            progress_key: progress_key(method, path),
        }
    }

    /// Derives the keys from a request's method, path, and conditional header.
    pub fn for_request(request: &Request) -> Self {
        let conditional = request.headers().contains(CONDITIONAL_HEADER);
        Self::derive(request.method(), request.path(), conditional)
    }
}
