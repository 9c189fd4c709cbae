//! Method and path dispatch to async handlers.
//!
//! | Pattern               | Example match                 | Captured params                    |
//! |-----------------------|-------------------------------|------------------------------------|
//! | `/stars`              | `/stars`                      | *(none)*                           |
//! | `/constellations/:id` | `/constellations/ori`         | `id → "ori"`                       |
//! | `/assets/*`           | `/assets/js/main.js`          | `wildcard → "/js/main.js"`         |
//!
//! A trailing slash on the request path is ignored. Registration order
//! decides between overlapping routes.
//!
//! A [`Router`] is the terminal layer of every [`Pipeline`](crate::Pipeline): the
//! handler's [`Response`] is written onto whatever [`ResponseWriter`] the layers
//! above handed down.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::http::ResponseWriter;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler that turns a [`Context`] into a [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = Response> + Send`
/// that is `Send + Sync + 'static`.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    // Trailing `*`: captures whatever is left of the path.
    Rest,
}

/// A compiled route path: literals, `:param` captures and a trailing `*`.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    segments: Vec<Segment>,
}

fn trim_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

impl Pattern {
    pub(crate) fn parse(pattern: &str) -> Self {
        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.len().saturating_sub(1);
        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match (part.strip_prefix(':'), *part) {
                (Some(name), _) => Segment::Param(name.to_owned()),
                (None, "*") if i == last => Segment::Rest,
                (None, literal) => Segment::Literal(literal.to_owned()),
            })
            .collect();
        Self { segments }
    }

    pub(crate) fn matches(&self, path: &str) -> Option<PathParams> {
        let mut rest = trim_trailing_slash(path);
        let mut params = PathParams::new();

        for segment in &self.segments {
            if *segment == Segment::Rest {
                params.insert("wildcard".to_owned(), rest.to_owned());
                return Some(params);
            }

            let tail = rest.strip_prefix('/')?;
            let (part, remainder) = tail.split_at(tail.find('/').unwrap_or(tail.len()));
            match segment {
                Segment::Literal(literal) if literal != part => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.insert(name.clone(), part.to_owned()),
                _ => {}
            }
            rest = remainder;
        }

        (rest.is_empty() || rest == "/").then_some(params)
    }
}

macro_rules! method_routes {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers `handler` for `", stringify!($method), "` requests to `path`.")]
            pub fn $name(&mut self, path: &str, handler: impl IntoHandler) {
                self.route_method(Method::$method, path, handler);
            }
        )*
    };
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use starmap::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
/// router.get("/constellations/:id", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    method_routes! {
        get => Get,
        post => Post,
        put => Put,
        delete => Delete,
    }

    /// Registers `handler` for any method, extension methods included.
    pub fn route_method(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs the first route matching both method and path; `404` otherwise.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            if &route.method != request.method() {
                return None;
            }
            route
                .pattern
                .matches(request.path())
                .map(|params| (Arc::clone(&route.handler), params))
        });

        match matched {
            Some((handler, params)) => handler(Context::with_params(request, params)).await,
            None => Response::new(StatusCode::NotFound),
        }
    }
}

impl Middleware for Router {
    // Terminal layer: `next` is never advanced.
    fn handle<'a>(
        &'a self,
        ctx: Context,
        _next: Next,
        writer: &'a mut dyn ResponseWriter,
    ) -> BoxFuture<'a> {
        Box::pin(async move {
            let response = self.route(ctx.into_request()).await;
            if let Err(e) = response.write_to(writer) {
                tracing::warn!(error = %e, "failed to write handler response");
            }
        })
    }
}
