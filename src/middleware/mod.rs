//! The middleware pipeline that every request passes through.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and sink substitution without coupling handlers
//! to infrastructure concerns. Responses are written into a
//! [`ResponseWriter`] handed down the chain rather than returned, so a layer
//! can observe (or intercept) everything written below it.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`Pipeline`]: an ordered middleware stack ending in a
//!   [`Router`].
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{
    Request, StatusCode,
    context::Context,
    http::ResponseWriter,
    router::Router,
};

/// The boxed future returned by [`Middleware::handle`].
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A type-erased, reference-counted middleware.
///
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying them.
pub type MiddlewareHandler = Arc<dyn Middleware>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] invokes the next middleware, or writes a fallback
/// `500` response when the chain is exhausted without any layer responding.
///
/// `Next` is consumed by [`run`](Self::run), so it cannot be called more than
/// once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use starmap::{
///     context::Context,
///     http::ResponseWriter,
///     middleware::{BoxFuture, Middleware, Next},
/// };
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle<'a>(
///         &'a self,
///         ctx: Context,
///         next: Next,
///         writer: &'a mut dyn ResponseWriter,
///     ) -> BoxFuture<'a> {
///         Box::pin(async move { next.run(ctx, writer).await })
///     }
/// }
/// ```
pub struct Next {
    chain: Arc<[MiddlewareHandler]>,
    // Position of the layer the next `run` call invokes.
    index: usize,
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given chain.
    pub fn new(chain: Arc<[MiddlewareHandler]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Invokes the next middleware in the chain against `writer`.
    ///
    /// If no layer remains a `500 Internal Server Error` is written as a safe
    /// fallback.
    pub async fn run(self, ctx: Context, writer: &mut dyn ResponseWriter) {
        let Some(handler) = self.chain.get(self.index).cloned() else {
            writer.write_status(StatusCode::InternalServerError);
            if let Err(e) = writer.write(b"No response generated by middleware pipeline") {
                tracing::warn!(error = %e, "failed to write fallback response");
            }
            return;
        };

        let next = Next {
            chain: Arc::clone(&self.chain),
            index: self.index + 1,
        };
        handler.handle(ctx, next, writer).await
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`], a [`Next`] cursor, and the
/// [`ResponseWriter`] the response must be written into. They may:
///
/// - **Pass through**: call `next.run(ctx, writer).await` unchanged.
/// - **Short-circuit**: write a response and return without calling `next`.
/// - **Decorate**: add headers before calling `next`, or inspect the writer
///   after it returns.
/// - **Intercept**: run `next` against a wrapper sink of their own.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared across
///   Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future so it can be awaited across
///   `.await` points in multi-threaded runtimes.
/// - Implementations **must not** hold locks on shared state across the
///   `next.run(..).await` point; downstream handlers may wait on I/O for as
///   long as they like.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle<'a>(
        &'a self,
        ctx: Context,
        next: Next,
        writer: &'a mut dyn ResponseWriter,
    ) -> BoxFuture<'a>;
}

/// An ordered middleware stack that ends in a [`Router`].
///
/// Layers run in the order they were added with [`wrap`](Self::wrap): the
/// first wrapped layer is the outermost one.
///
/// # Examples
///
/// ```rust,no_run
/// use starmap::{Pipeline, Router, Response, StatusCode, middleware::LoggerMiddleware};
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// let pipeline = Pipeline::new(router).wrap(LoggerMiddleware);
/// assert_eq!(pipeline.len(), 2);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    /// Creates a pipeline whose only layer is `router`.
    pub fn new(router: Router) -> Self {
        let terminal: MiddlewareHandler = Arc::new(router);
        Self {
            chain: Arc::from(vec![terminal]),
        }
    }

    /// Installs `middleware` just in front of the router.
    #[must_use]
    pub fn wrap<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        let mut chain = self.chain.to_vec();
        let router_pos = chain.len() - 1;
        chain.insert(router_pos, Arc::new(middleware));
        Self {
            chain: Arc::from(chain),
        }
    }

    /// Number of layers, including the router.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always `false`: a pipeline contains at least its router.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Runs `request` through every layer, writing the response into `writer`.
    pub async fn dispatch(&self, request: Request, writer: &mut dyn ResponseWriter) {
        Next::new(Arc::clone(&self.chain))
            .run(Context::new(request), writer)
            .await
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` record after the downstream layers return.
/// The status is read back from the writer it was handed, so it reports what
/// the client receives even when an inner layer substituted its own sink.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle<'a>(
        &'a self,
        ctx: Context,
        next: Next,
        writer: &'a mut dyn ResponseWriter,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let path = ctx.request().path().to_owned();

            next.run(ctx, &mut *writer).await;

            tracing::info!(
                %method,
                %path,
                status = writer.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request completed"
            );
        })
    }
}
