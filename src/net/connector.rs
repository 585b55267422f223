//! Dialer handed to the HTTP engine.
//!
//! # Data Flow
//! ```text
//! engine needs a connection for Uri
//!     → DeadlineConnector::call
//!     → Resolve (DNS cache collaborator, or system lookup)
//!     → TcpStream::connect under the dial timeout
//!     → DeadlineConnection (per-read / per-write deadlines)
//!     → engine pools it
//! ```

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::Uri;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tower::Service;

use super::connection::DeadlineConnection;
use super::dns::{system_lookup, Resolve};

/// Why a dial attempt failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unsupported scheme {0:?}")]
    Scheme(String),

    #[error("uri has no host")]
    MissingHost,

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("dial to {addr} timed out after {timeout:?}")]
    DialTimeout { addr: SocketAddr, timeout: Duration },
}

/// The connection type produced by [`DeadlineConnector`].
pub type Conn = DeadlineConnection<TokioIo<TcpStream>>;

/// Resolves, dials and wraps plain-HTTP connections.
#[derive(Clone)]
pub struct DeadlineConnector {
    resolver: Option<Arc<dyn Resolve>>,
    dial_timeout: Duration,
    io_timeout: Duration,
}

impl DeadlineConnector {
    /// A connector with no dial limit and no I/O deadlines.
    pub fn new() -> Self {
        Self {
            resolver: None,
            dial_timeout: Duration::ZERO,
            io_timeout: Duration::ZERO,
        }
    }

    /// Resolve through `resolver` instead of the system resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Upper bound for establishing a TCP connection. Zero means none.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Per-read and per-write deadline of every connection. Zero means none.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Dial `uri` directly.
    pub async fn connect(&self, uri: Uri) -> Result<Conn, ConnectError> {
        match uri.scheme_str() {
            Some("http") | None => {}
            Some(other) => return Err(ConnectError::Scheme(other.to_string())),
        }

        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or(ConnectError::MissingHost)?;
        let port = uri.port_u16().unwrap_or(80);

        let resolved = match (&self.resolver, host.parse::<IpAddr>()) {
            (_, Ok(ip)) => Ok(ip),
            (Some(resolver), Err(_)) => resolver.resolve(host).await,
            (None, Err(_)) => system_lookup(host).await,
        };
        let ip = resolved.map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            source,
        })?;
        let addr = SocketAddr::new(ip, port);

        let dialed = if self.dial_timeout.is_zero() {
            TcpStream::connect(addr).await
        } else {
            tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| ConnectError::DialTimeout {
                    addr,
                    timeout: self.dial_timeout,
                })?
        };
        let stream = dialed.map_err(|source| ConnectError::Dial { addr, source })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = DeadlineConnection::new(TokioIo::new(stream), self.io_timeout);
        tracing::debug!(connection_id = %conn.id(), %addr, host, "Connection established");
        Ok(conn)
    }
}

impl Default for DeadlineConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeadlineConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineConnector")
            .field("custom_resolver", &self.resolver.is_some())
            .field("dial_timeout", &self.dial_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl Service<Uri> for DeadlineConnector {
    type Response = Conn;
    type Error = ConnectError;
    type Future = BoxFuture<'static, Result<Conn, ConnectError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.connect(uri).await })
    }
}
