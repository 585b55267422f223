//! Request body providers.
//!
//! # Data Flow
//! ```text
//! Request::body(provider)
//!     → BodyProvider::produce (once, just before the exchange)
//!     → Produced { body, content_type, replay, monitor }
//!     → TimedBody::sending wraps `body`
//!     → `replay` re-creates the body for 307/308 redirects
//!     → `monitor` reports a streaming producer's error
//! ```
//!
//! # Design Decisions
//! - Encoding errors (JSON/XML) surface from `produce`, before anything is sent
//! - In-memory kinds are replayable; streams are not
//! - Form encoding sorts keys so the output is deterministic

pub mod multipart;
pub mod pipe;
pub mod stream;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::error::{BoxError, Error, Result};

pub use multipart::{FilePart, MultipartBody};
pub use pipe::{pipe, PipeError, PipeMonitor, PipeReader, PipeWriter};
pub use stream::{BodyReader, ReaderBody};

/// The type-erased request body handed to the engine.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "application/xml";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// What a provider hands to the orchestrator.
pub struct Produced {
    pub body: RequestBody,
    /// Content type implied by the body kind, if any.
    pub content_type: Option<String>,
    /// The full body, when it can be sent again.
    pub replay: Option<Bytes>,
    /// Set for bodies produced by a background task.
    pub monitor: Option<PipeMonitor>,
}

impl Produced {
    /// An in-memory, replayable body.
    pub fn full(data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        let data = data.into();
        Self {
            body: full_body(data.clone()),
            content_type: content_type.map(str::to_string),
            replay: Some(data),
            monitor: None,
        }
    }

    /// No body at all.
    pub fn empty() -> Self {
        Self {
            body: empty_body(),
            content_type: None,
            replay: Some(Bytes::new()),
            monitor: None,
        }
    }
}

impl fmt::Debug for Produced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Produced")
            .field("content_type", &self.content_type)
            .field("replayable", &self.replay.is_some())
            .field("streaming", &self.monitor.is_some())
            .finish()
    }
}

pub(crate) fn full_body(data: Bytes) -> RequestBody {
    Full::new(data).map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn empty_body() -> RequestBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Something that can become a request body.
///
/// Called at most once per request. Must not block; long-running work
/// belongs in a spawned task writing into a [`pipe`].
pub trait BodyProvider: Send {
    fn produce(self: Box<Self>) -> Result<Produced>;
}

/// Raw bytes with an optional content type.
#[derive(Debug, Clone)]
pub struct BytesBody {
    data: Bytes,
    content_type: Option<&'static str>,
}

impl BodyProvider for BytesBody {
    fn produce(self: Box<Self>) -> Result<Produced> {
        Ok(Produced::full(self.data, self.content_type))
    }
}

/// A string body; set the content type on the request yourself.
pub fn string(body: impl Into<String>) -> BytesBody {
    bytes(body.into())
}

/// A byte body; set the content type on the request yourself.
pub fn bytes(body: impl Into<Bytes>) -> BytesBody {
    BytesBody {
        data: body.into(),
        content_type: None,
    }
}

/// Already-encoded JSON text.
pub fn json_string(body: impl Into<String>) -> BytesBody {
    json_bytes(body.into())
}

/// Already-encoded JSON bytes.
pub fn json_bytes(body: impl Into<Bytes>) -> BytesBody {
    BytesBody {
        data: body.into(),
        content_type: Some(CONTENT_TYPE_JSON),
    }
}

/// Already-encoded XML text.
pub fn xml_string(body: impl Into<String>) -> BytesBody {
    xml_bytes(body.into())
}

/// Already-encoded XML bytes.
pub fn xml_bytes(body: impl Into<Bytes>) -> BytesBody {
    BytesBody {
        data: body.into(),
        content_type: Some(CONTENT_TYPE_XML),
    }
}

/// Already-encoded form text.
pub fn form_string(body: impl Into<String>) -> BytesBody {
    BytesBody {
        data: Bytes::from(body.into()),
        content_type: Some(CONTENT_TYPE_FORM),
    }
}

/// A URL-encoded form, one value per key, keys sorted.
pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> BytesBody
where
    K: Into<String>,
    V: Into<String>,
{
    let sorted: BTreeMap<String, String> = fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    form_string(encode_form(sorted.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
}

/// A URL-encoded form allowing repeated keys, keys sorted, values in order.
pub fn form_values<K, V>(fields: impl IntoIterator<Item = (K, Vec<V>)>) -> BytesBody
where
    K: Into<String>,
    V: Into<String>,
{
    let mut sorted: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, values) in fields {
        sorted
            .entry(k.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }
    let pairs = sorted
        .iter()
        .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())));
    form_string(encode_form(pairs))
}

pub(crate) fn encode_form<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// A value serialized to JSON when the request is sent.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

/// Serialize `value` as JSON.
pub fn json<T: Serialize + Send>(value: T) -> JsonBody<T> {
    JsonBody(value)
}

impl<T: Serialize + Send> BodyProvider for JsonBody<T> {
    fn produce(self: Box<Self>) -> Result<Produced> {
        let data = serde_json::to_vec(&self.0).map_err(|e| Error::Encode(e.to_string()))?;
        Ok(Produced::full(data, Some(CONTENT_TYPE_JSON)))
    }
}

/// A value serialized to XML when the request is sent.
#[derive(Debug, Clone)]
pub struct XmlBody<T>(pub T);

/// Serialize `value` as XML; the root element is named after the type.
pub fn xml<T: Serialize + Send>(value: T) -> XmlBody<T> {
    XmlBody(value)
}

impl<T: Serialize + Send> BodyProvider for XmlBody<T> {
    fn produce(self: Box<Self>) -> Result<Produced> {
        let data = quick_xml::se::to_string(&self.0).map_err(|e| Error::Encode(e.to_string()))?;
        Ok(Produced::full(data, Some(CONTENT_TYPE_XML)))
    }
}

/// A streamed body from any reader. Not replayable.
pub struct StreamBody<R> {
    reader: R,
}

/// Stream the request body from `reader`.
pub fn reader<R>(reader: R) -> StreamBody<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    StreamBody { reader }
}

impl<R> BodyProvider for StreamBody<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    fn produce(self: Box<Self>) -> Result<Produced> {
        Ok(Produced {
            body: ReaderBody::new(self.reader)
                .map_err(BoxError::from)
                .boxed_unsync(),
            content_type: None,
            replay: None,
            monitor: None,
        })
    }
}

impl<R> fmt::Debug for StreamBody<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBody").finish_non_exhaustive()
    }
}

/// A single file sent as the raw body (PUT/PATCH uploads).
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
}

/// Upload the file at `path` as the raw body; the content type is guessed
/// from the extension.
pub fn file(path: impl AsRef<Path>) -> FileBody {
    FileBody {
        path: path.as_ref().to_path_buf(),
    }
}

impl BodyProvider for FileBody {
    fn produce(self: Box<Self>) -> Result<Produced> {
        let file = std::fs::File::open(&self.path)?;
        let content_type = mime_guess::from_path(&self.path)
            .first()
            .map(|m| m.to_string());

        Ok(Produced {
            body: ReaderBody::new(tokio::fs::File::from_std(file))
                .map_err(BoxError::from)
                .boxed_unsync(),
            content_type,
            replay: None,
            monitor: None,
        })
    }
}
