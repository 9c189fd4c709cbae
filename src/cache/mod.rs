//! In-process HTTP response cache.
//!
//! The pieces, leaves first:
//!
//! - [`CacheStore`]: concurrent key/value store with per-record expiry and a
//!   background sweeper.
//! - [`CacheKeys`]: derives the cache key and the in-flight key of a request.
//! - [`ResponseCapture`]: a [`ResponseWriter`](crate::http::ResponseWriter)
//!   that records a response while forwarding it to the real writer.
//! - [`CacheMiddleware`]: replays hits, marks misses in flight, and commits
//!   `200`/`304` responses.
//!
//! Only responses with a status in [`CACHEABLE_STATUSES`] are ever stored;
//! no `Cache-Control` directives are interpreted.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

mod capture;
mod entry;
pub mod key;
mod middleware;
mod store;

pub use capture::ResponseCapture;
pub use entry::{CACHEABLE_STATUSES, CacheEntry, is_cacheable};
pub use key::{CONDITIONAL_HEADER, CacheKeys};
pub use middleware::{CACHE_STATUS_HEADER, CacheMiddleware, ResponseStore, Slot};
pub use store::{CacheStore, Expiration};

use crate::middleware::Pipeline;

/// Errors raised while validating a [`CacheConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache sweep interval must be greater than zero")]
    ZeroSweepInterval,
}

/// Settings for the response cache.
///
/// Deserializes from any serde format; durations are given in whole seconds
/// and every field is optional.
///
/// ```
/// use std::time::Duration;
/// use starmap::cache::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "sweep_interval_secs": 10 }"#).unwrap();
/// assert!(config.enabled);
/// assert_eq!(config.sweep_interval(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When `false` the cache middleware is not installed at all.
    pub enabled: bool,
    /// TTL applied to records stored with [`Expiration::Default`]; `None` never expires.
    pub default_ttl_secs: Option<u64>,
    /// Period of the expired-record sweep.
    pub sweep_interval_secs: u64,
    /// Route patterns the cache applies to; empty caches every route.
    pub routes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: Some(5 * 60),
            sweep_interval_secs: 30,
            routes: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroSweepInterval`] if the sweep interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    /// Builds an empty store configured with this config's default TTL.
    pub fn build_store(&self) -> Arc<ResponseStore> {
        Arc::new(ResponseStore::new(self.default_ttl()))
    }
}

impl Pipeline {
    /// Installs a [`CacheMiddleware`] over `store`, scoped to
    /// `config.routes`, if `config.enabled`. A disabled cache leaves the
    /// pipeline untouched.
    #[must_use]
    pub fn cache(self, config: &CacheConfig, store: Arc<ResponseStore>) -> Self {
        if !config.enabled {
            tracing::info!("response cache disabled; requests bypass the cache");
            return self;
        }
        self.wrap(CacheMiddleware::new(store).scoped(&config.routes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ResponseRecorder, ResponseWriter, StatusCode};
    use crate::{Request, Response, Router};

    fn ping_pipeline() -> Pipeline {
        let mut router = Router::new();
        router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok).body("pong") });
        Pipeline::new(router)
    }

    fn ping() -> Request {
        Request::parse(b"GET /ping HTTP/1.1\r\n\r\n").unwrap().0
    }

    #[test]
    fn defaults_match_store_parameters() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "enabled": true, "sweep_interval_secs": 0 }"#).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ZeroSweepInterval));
    }

    #[test]
    fn null_ttl_means_never() {
        let config: CacheConfig = serde_json::from_str(r#"{ "default_ttl_secs": null }"#).unwrap();
        assert_eq!(config.default_ttl(), None);
    }

    #[tokio::test]
    async fn disabled_cache_is_not_installed() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let store = config.build_store();
        let pipeline = ping_pipeline().cache(&config, Arc::clone(&store));
        assert_eq!(pipeline.len(), 1);

        let mut recorder = ResponseRecorder::new();
        pipeline.dispatch(ping(), &mut recorder).await;
        assert_eq!(recorder.headers().get(CACHE_STATUS_HEADER), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn configured_routes_limit_the_cache() {
        let config: CacheConfig = serde_json::from_str(r#"{ "routes": ["/stars"] }"#).unwrap();
        let store = config.build_store();
        let pipeline = ping_pipeline().cache(&config, Arc::clone(&store));

        let mut recorder = ResponseRecorder::new();
        pipeline.dispatch(ping(), &mut recorder).await;
        assert_eq!(recorder.status(), StatusCode::Ok);
        assert_eq!(recorder.headers().get(CACHE_STATUS_HEADER), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn enabled_cache_is_installed() {
        let config = CacheConfig::default();
        let store = config.build_store();
        let pipeline = ping_pipeline().cache(&config, Arc::clone(&store));
        assert_eq!(pipeline.len(), 2);

        let mut recorder = ResponseRecorder::new();
        pipeline.dispatch(ping(), &mut recorder).await;
        assert_eq!(recorder.headers().get(CACHE_STATUS_HEADER), Some("MISS"));
        assert!(store.get("GET/ping").is_some());
    }
}
