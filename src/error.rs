//! Client error taxonomy.
//!
//! # Categories
//! - Configuration: malformed URL, bad header, body marshal failure.
//!   Surfaced before anything is sent, never retried.
//! - Dial/resolve: DNS-cache or TCP connect failure reported by the engine.
//! - Timeouts: inactivity while sending, inactivity while receiving, overall
//!   deadline. Each has its own variant so callers can match on it.
//! - Multipart: a part failed to produce; carries the producer's own error.
//! - Engine, body and decode failures.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::exchange::Phase;

/// Boxed error used at the boundary with the HTTP engine.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// The URL could not be parsed.
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The URL scheme is not served by this client.
    #[error("unsupported url scheme {0:?}")]
    UnsupportedScheme(String),

    /// A header name or value is not valid on the wire.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A structured body (JSON/XML) could not be encoded.
    #[error("failed to encode body: {0}")]
    Encode(String),

    /// DNS-cache lookup or TCP dial failed.
    #[error("connect error: {0}")]
    Connect(#[source] hyper_util::client::legacy::Error),

    /// No progress on the request side for the configured inactivity timeout.
    #[error("timeout exceeded while sending request (no progress for {0:?})")]
    TimeoutSending(Duration),

    /// No progress on the response side for the configured inactivity timeout.
    #[error("timeout exceeded while receiving response (no progress for {0:?})")]
    TimeoutReceiving(Duration),

    /// The overall exchange deadline elapsed.
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The multipart producer failed; this is the error it raised.
    #[error("multipart body aborted: {0}")]
    Multipart(#[source] Arc<io::Error>),

    /// The HTTP engine failed the exchange.
    #[error("http error: {0}")]
    Http(#[source] hyper_util::client::legacy::Error),

    /// Reading or producing a body frame failed.
    #[error("body error: {0}")]
    Body(#[source] BoxError),

    /// Redirect chain longer than the allowed hop count.
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Response body was not valid JSON for the requested type.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for inactivity timeouts and the overall deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::TimeoutSending(_) | Error::TimeoutReceiving(_) | Error::DeadlineExceeded(_)
        )
    }

    /// The phase an inactivity timeout fired in, if this is one.
    pub fn timeout_phase(&self) -> Option<Phase> {
        match self {
            Error::TimeoutSending(_) => Some(Phase::Sending),
            Error::TimeoutReceiving(_) => Some(Phase::Receiving),
            _ => None,
        }
    }

    /// True when the failure happened while resolving or dialing.
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Connect(_))
    }

    pub(crate) fn from_engine(err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            Error::Connect(err)
        } else {
            Error::Http(err)
        }
    }
}

/// Walks a source chain looking for an I/O timeout raised by a deadline connection.
pub(crate) fn has_io_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
            // io::Error::source skips the wrapped error itself
            if let Some(inner) = io_err.get_ref() {
                if has_io_timeout(inner) {
                    return true;
                }
            }
        }
        current = e.source();
    }
    false
}
