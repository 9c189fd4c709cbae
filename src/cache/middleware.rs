use std::sync::Arc;

use tracing::debug;

use super::{CacheEntry, CacheKeys, CacheStore, Expiration, ResponseCapture};
use crate::context::Context;
use crate::http::ResponseWriter;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::router::Pattern;

/// Response header reporting whether the cache served the request.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// What the response store holds under a key.
#[derive(Debug, Clone)]
pub enum Slot {
    /// A committed response, stored under a cache key.
    Response(Arc<CacheEntry>),
    /// A computation for the route is running, stored under a progress key.
    InProgress,
}

/// The store shared by every [`CacheMiddleware`] of a server.
pub type ResponseStore = CacheStore<Slot>;

/// Holds a route's in-flight marker and deletes it when dropped.
///
/// Dropping happens on every way out of dispatch: normal return, a panic
/// unwinding through the handler chain, or the request future being dropped
/// mid-flight.
struct InFlightGuard<'s> {
    store: &'s ResponseStore,
    key: &'s str,
}

impl<'s> InFlightGuard<'s> {
    /// Sets the marker for `key`, or returns `None` if another request holds it.
    fn acquire(store: &'s ResponseStore, key: &'s str) -> Option<Self> {
        store
            .add(key, Slot::InProgress, Expiration::Never)
            .then(|| Self { store, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.store.delete(self.key);
    }
}

/// Cache-aside middleware for idempotent read routes.
///
/// Per request:
///
/// 1. A committed entry under the request's cache key is replayed with
///    `X-Cache: HIT` and the rest of the chain is skipped.
/// 2. Otherwise, if another request for the same route is in flight, the
///    chain runs against the real writer with no caching at all.
/// 3. Otherwise the route is marked in flight, `X-Cache: MISS` is added, and
///    the chain runs against a [`ResponseCapture`]. A `200` or `304` outcome
///    is committed with no expiry; the marker is released however dispatch
///    ends.
///
/// Requests outside the [`scoped`](Self::scoped) routes skip all three steps.
/// The store is never locked across the downstream `await`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use starmap::{Pipeline, Router, cache::{CacheMiddleware, ResponseStore}};
///
/// let store = Arc::new(ResponseStore::new(None));
/// let pipeline = Pipeline::new(Router::new()).wrap(CacheMiddleware::new(store));
/// ```
pub struct CacheMiddleware {
    store: Arc<ResponseStore>,
    // Empty means every route is cached.
    scope: Vec<Pattern>,
}

impl CacheMiddleware {
    pub fn new(store: Arc<ResponseStore>) -> Self {
        Self {
            store,
            scope: Vec::new(),
        }
    }

    /// Restricts caching to requests whose path matches one of `routes`,
    /// written in [`Router`](crate::Router) pattern syntax. Other requests
    /// pass straight through without an `X-Cache` header.
    ///
    /// An empty list keeps every route cached.
    #[must_use]
    pub fn scoped<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope = routes
            .into_iter()
            .map(|route| Pattern::parse(route.as_ref()))
            .collect();
        self
    }

    fn in_scope(&self, path: &str) -> bool {
        self.scope.is_empty() || self.scope.iter().any(|p| p.matches(path).is_some())
    }

    fn lookup(&self, cache_key: &str) -> Option<Arc<CacheEntry>> {
        match self.store.get(cache_key)? {
            Slot::Response(entry) => Some(entry),
            // Key collision with a marker: treat as a miss.
            Slot::InProgress => None,
        }
    }
}

fn replay(entry: &CacheEntry, writer: &mut dyn ResponseWriter) {
    let headers = writer.headers_mut();
    for (name, value) in entry.headers().iter() {
        if !name.eq_ignore_ascii_case(CACHE_STATUS_HEADER) {
            headers.append(name, value);
        }
    }
    headers.append(CACHE_STATUS_HEADER, "HIT");

    writer.write_status(entry.status());
    if let Err(e) = writer.write(entry.body()) {
        debug!(error = %e, "failed to replay cached body");
    }
}

impl Middleware for CacheMiddleware {
    fn handle<'a>(
        &'a self,
        ctx: Context,
        next: Next,
        writer: &'a mut dyn ResponseWriter,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            if !self.in_scope(ctx.request().path()) {
                next.run(ctx, writer).await;
                return;
            }

            let CacheKeys {
                cache_key,
                progress_key,
            } = CacheKeys::for_request(ctx.request());

            if let Some(entry) = self.lookup(&cache_key) {
                debug!(%cache_key, status = entry.status().as_u16(), "cache hit");
                replay(&entry, writer);
                return;
            }

            let Some(_in_flight) = InFlightGuard::acquire(&self.store, &progress_key) else {
                debug!(%cache_key, %progress_key, "route in flight; dispatching uncached");
                next.run(ctx, writer).await;
                return;
            };

            writer.headers_mut().append(CACHE_STATUS_HEADER, "MISS");
            let mut capture = ResponseCapture::new(&mut *writer);
            next.run(ctx, &mut capture).await;

            match capture.into_entry() {
                Some(entry) => {
                    debug!(%cache_key, status = entry.status().as_u16(), "committing response");
                    self.store
                        .set(cache_key, Slot::Response(Arc::new(entry)), Expiration::Never);
                }
                None => debug!(
                    %cache_key,
                    status = writer.status().as_u16(),
                    "response not cacheable"
                ),
            }
        })
    }
}
