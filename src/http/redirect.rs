//! Redirect policy.
//!
//! # Responsibilities
//! - Decide whether a response is followed, and how the next hop looks
//! - Downgrade 301/302/303 to a bodiless GET
//! - Replay the buffered body on 307/308
//! - Drop credentials when the redirect leaves the original host
//!
//! # Design Decisions
//! - Pure: the client loop owns the I/O, this module only rewrites the hop
//! - A 307/308 with a streamed body is handed back to the caller as is
//! - At most [`MAX_REDIRECTS`] hops per exchange

use bytes::Bytes;
use http::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST,
};
use http::{Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};

/// Hops followed before giving up with [`Error::TooManyRedirects`].
pub const MAX_REDIRECTS: usize = 10;

/// Everything needed to issue one hop of an exchange.
#[derive(Debug, Clone)]
pub struct Hop {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// The body to send again, when it is known in full.
    pub replay: Option<Bytes>,
}

/// True for the statuses this client follows.
pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Compute the next hop, or `None` when the response goes back to the caller.
pub fn next_hop(current: &Hop, status: StatusCode, location: Option<&HeaderValue>) -> Result<Option<Hop>> {
    if !is_redirect(status) {
        return Ok(None);
    }
    let Some(location) = location.and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let url = current.url.join(location).map_err(|e| Error::InvalidUrl {
        url: location.to_string(),
        source: Box::new(e),
    })?;

    let mut headers = current.headers.clone();
    let (method, replay) = match status {
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
            let Some(replay) = current.replay.clone() else {
                tracing::debug!(%status, location = %url, "Body cannot be replayed, not following redirect");
                return Ok(None);
            };
            (current.method.clone(), Some(replay))
        }
        _ => {
            headers.remove(CONTENT_TYPE);
            headers.remove(CONTENT_LENGTH);
            let method = if current.method == Method::HEAD {
                Method::HEAD
            } else {
                Method::GET
            };
            (method, Some(Bytes::new()))
        }
    };

    if !same_origin(&current.url, &url) {
        headers.remove(AUTHORIZATION);
        headers.remove(COOKIE);
        headers.remove(HOST);
    }

    Ok(Some(Hop {
        method,
        url,
        headers,
        replay,
    }))
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}
