//! Response handle.
//!
//! # Responsibilities
//! - Expose status, headers and cookies of the final hop
//! - Hand out the body in full, in chunks, or as a cancel-linked reader
//! - Render the request and response heads for debugging
//!
//! # Design Decisions
//! - The body stays bound to the exchange timer until it is consumed or dropped
//! - Bytes peeked with `read_n` are kept and served first by every other accessor

use std::fmt::{self, Write as _};
use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, SET_COOKIE};
use http::{Method, StatusCode, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, Chain};
use url::Url;
use uuid::Uuid;

use crate::body::BodyReader;
use crate::error::Result;
use crate::exchange::{CancelLinkedReader, TimedBody};

/// What was actually sent on the final hop.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// A cookie set by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Byte stream over a response body, bound to the exchange's cancellation.
pub type ResponseReader = CancelLinkedReader<Chain<Cursor<Bytes>, BodyReader<TimedBody<Incoming>>>>;

/// The response of a completed exchange.
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    request: RequestHead,
    body: TimedBody<Incoming>,
    pending: BytesMut,
}

impl Response {
    pub(crate) fn new(
        parts: http::response::Parts,
        body: TimedBody<Incoming>,
        url: Url,
        request: RequestHead,
    ) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            url,
            request,
            body,
            pending: BytesMut::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True for 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// URL of the final hop.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn exchange_id(&self) -> Uuid {
        self.body.exchange().id()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// All values of `name`, joined with `", "`.
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Cookies from every `Set-Cookie` header.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies().into_iter().find(|c| c.name == name)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        let Self { body, mut pending, .. } = self;
        let rest = body.collect().await?.to_bytes();
        if pending.is_empty() {
            return Ok(rest);
        }
        pending.extend_from_slice(&rest);
        Ok(pending.freeze())
    }

    /// Read the whole body as text; invalid UTF-8 is replaced.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Up to `n` bytes from the front of the body. Fewer only at end of body.
    pub async fn read_n(&mut self, n: usize) -> Result<Bytes> {
        while self.pending.len() < n {
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.pending.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        let take = n.min(self.pending.len());
        Ok(self.pending.split_to(take).freeze())
    }

    /// The next piece of the body, `None` at the end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.split().freeze()));
        }
        loop {
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    /// Turn the body into a reader whose stalls cancel the exchange.
    ///
    /// Errors carry the client error; see
    /// [`client_error`](crate::exchange::cancel_reader::client_error).
    pub fn into_reader(self) -> ResponseReader {
        let Self { body, pending, .. } = self;
        let exchange = body.exchange().clone();
        let stream = Cursor::new(pending.freeze()).chain(BodyReader::new(body));
        CancelLinkedReader::new(stream, exchange)
    }

    /// Status line and headers, as received.
    pub fn dump_head(&self) -> String {
        format_head(&format!("{:?} {}", self.version, self.status), &self.headers)
    }

    /// Request line and headers of the final hop.
    pub fn dump_request(&self) -> String {
        let url = &self.request.url;
        let target = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        format_head(
            &format!("{} {} {:?}", self.request.method, target, self.version),
            &self.request.headers,
        )
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn format_head(first_line: &str, headers: &HeaderMap) -> String {
    let mut out = format!("{first_line}\r\n");
    for (name, value) in headers {
        let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    out.push_str("\r\n");
    out
}

fn parse_set_cookie(raw: &str) -> Option<Cookie> {
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(Cookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
    })
}
