//! # starmap
//!
//! An async HTTP/1.1 server with a middleware pipeline and an in-process
//! response cache that coordinates concurrent misses for the same route.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use starmap::{Pipeline, Response, Router, Server, StatusCode, cache::CacheConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/ping", |_ctx| async {
//!         Response::json(StatusCode::Ok, &serde_json::json!({ "message": "pong" }))
//!     });
//!
//!     let config = CacheConfig::default();
//!     config.validate()?;
//!     let store = config.build_store();
//!     let _sweeper = store.spawn_sweeper(config.sweep_interval());
//!
//!     let pipeline = Pipeline::new(router).cache(&config, store);
//!     Server::bind("127.0.0.1:8080").await?.run(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::Pipeline;
pub use router::Router;
pub use server::{Server, ServerError};
