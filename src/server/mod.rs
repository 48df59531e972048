//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports HTTP/1.1 persistent connections (keep-alive). When the shutdown
//! future resolves the listener is closed, idle connections are dropped, and
//! in-flight requests are answered with `Connection: close` before `run`
//! returns.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::CorsMiddleware;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP listener.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function, one Tokio task per connection.
///
/// # Examples
///
/// ```rust,no_run
/// use hostlm::server::Server;
/// use hostlm::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8000").await?;
///     server
///         .run(
///             |_req| async { Response::new(StatusCode::Ok).body("ok") },
///             async {
///                 let _ = tokio::signal::ctrl_c().await;
///             },
///         )
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` resolves.
    ///
    /// Once `shutdown` completes the listener is dropped, so new connections
    /// are refused. Open connections are then told to stop: idle ones close
    /// at once, busy ones finish their current request with
    /// `Connection: close`. `run` returns after every connection is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let Server {
            listener,
            local_addr,
        } = self;
        let handler = Arc::new(handler);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        info!(address = %local_addr, "listening");

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %local_addr, "shutdown requested, no longer accepting");
                    break;
                }
            };

            // Reap finished connection tasks.
            while connections.try_join_next().is_some() {}

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let stop = stop_rx.clone();

            connections.spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, stop).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        drop(listener);
        let _ = stop_tx.send(true);
        debug!(open = connections.len(), "draining connections");
        while connections.join_next().await.is_some() {}

        Ok(())
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection, signals
/// `Connection: close`, or `stop` flips to `true`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered; only read when needed.
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            Request::parse(&buf)
        };

        let (request, body_offset) = match parsed {
            Ok((request, offset)) if request.is_complete() => (request, offset),
            Ok(_) | Err(RequestError::Incomplete) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request too large, sending 413");
                    let response =
                        connection_error(StatusCode::PayloadTooLarge, "Request entity too large");
                    stream.write_all(&response.into_bytes()).await?;
                    break;
                }

                let bytes_read = tokio::select! {
                    read = stream.read_buf(&mut buf) => read?,
                    _ = stop.changed() => {
                        debug!(peer = %peer_addr, "server stopping, closing connection");
                        break;
                    }
                };
                if bytes_read == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = connection_error(StatusCode::BadRequest, format!("Bad Request: {e}"));
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let total_len = body_offset + request.content_length();
        let wants_keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await;
        let keep_alive = wants_keep_alive && !*stop.borrow();
        stream.write_all(&response.keep_alive(keep_alive).into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_len);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

/// Responses produced below the request pipeline still carry CORS headers,
/// so cross-origin callers can read the error.
fn connection_error(status: StatusCode, body: impl Into<String>) -> Response {
    let mut response = Response::new(status).body(body).keep_alive(false);
    CorsMiddleware::permissive().apply(&mut response);
    response
}
