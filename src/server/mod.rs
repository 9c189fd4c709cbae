//! Tokio TCP front end.
//!
//! One task per accepted connection; each connection serves requests one at
//! a time (HTTP/1.1 keep-alive, including pipelined requests already in the
//! read buffer) and hands every request to the shared [`Pipeline`].

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    ResponseRecorder, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::Pipeline;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Largest request (head plus body) buffered before answering `413`.
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener, ready to serve a [`Pipeline`].
///
/// # Examples
///
/// ```rust,no_run
/// use starmap::{Pipeline, Response, Router, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok).body("pong") });
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(Pipeline::new(router)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The bound address; useful after binding to port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `pipeline` forever.
    ///
    /// # Errors
    ///
    /// See [`run_with_shutdown`](Self::run_with_shutdown).
    pub async fn run(self, pipeline: Pipeline) -> Result<(), ServerError> {
        self.run_with_shutdown(pipeline, std::future::pending()).await
    }

    /// Serves `pipeline` until `shutdown` resolves.
    ///
    /// Accept errors are logged and skipped. Connections that are already
    /// open when `shutdown` fires keep running until they finish.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok(())` once `shutdown` resolves.
    pub async fn run_with_shutdown<S>(self, pipeline: Pipeline, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let pipeline = Arc::new(pipeline);
        info!(address = %self.local_addr, layers = pipeline.len(), "starmap listening");

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown signal received; no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(%peer, "connection accepted");
            let connection = Connection::new(stream, peer, Arc::clone(&pipeline));
            tokio::spawn(async move {
                if let Err(e) = connection.serve().await {
                    warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// What the read side produced for the next turn of a connection.
enum Incoming {
    Request { request: Request, consumed: usize },
    Reject(Response),
    Closed,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: Arc<Pipeline>,
    buf: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, pipeline: Arc<Pipeline>) -> Self {
        Self {
            stream,
            peer,
            pipeline,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
        }
    }

    async fn serve(mut self) -> io::Result<()> {
        loop {
            let (request, consumed) = match self.read_request().await? {
                Incoming::Request { request, consumed } => (request, consumed),
                Incoming::Reject(response) => {
                    self.send(response.keep_alive(false)).await?;
                    return Ok(());
                }
                Incoming::Closed => {
                    debug!(peer = %self.peer, "connection closed by peer");
                    return Ok(());
                }
            };

            let keep_alive = request.is_keep_alive();
            debug!(
                peer = %self.peer,
                method = %request.method(),
                path = %request.path(),
                "dispatching request"
            );

            let mut recorder = ResponseRecorder::new();
            self.pipeline.dispatch(request, &mut recorder).await;
            self.send(recorder.into_response().keep_alive(keep_alive)).await?;

            let _ = self.buf.split_to(consumed);
            if !keep_alive {
                return Ok(());
            }
        }
    }

    // Parses from what is already buffered before touching the socket, so
    // pipelined requests are served without an extra read.
    async fn read_request(&mut self) -> io::Result<Incoming> {
        loop {
            match Request::parse(&self.buf) {
                Ok((request, body_offset)) => {
                    let consumed = body_offset + request.content_length();
                    return Ok(Incoming::Request { request, consumed });
                }
                Err(RequestError::Incomplete) if self.buf.len() > MAX_REQUEST_SIZE => {
                    warn!(peer = %self.peer, size = self.buf.len(), "request too large, sending 413");
                    return Ok(Incoming::Reject(
                        Response::new(StatusCode::PayloadTooLarge).body("Request entity too large"),
                    ));
                }
                Err(RequestError::Incomplete) => {
                    if self.stream.read_buf(&mut self.buf).await? == 0 {
                        return Ok(Incoming::Closed);
                    }
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "bad request, sending 400");
                    return Ok(Incoming::Reject(
                        Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
                    ));
                }
            }
        }
    }

    async fn send(&mut self, response: Response) -> io::Result<()> {
        self.stream.write_all(&response.into_bytes()).await?;
        self.stream.flush().await
    }
}
