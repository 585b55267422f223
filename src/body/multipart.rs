//! Streaming `multipart/form-data` encoder.
//!
//! # Data Flow
//! ```text
//! MultipartBody::produce
//!     ├─ no files → encode form fields in memory (synchronous)
//!     └─ files    → pipe(capacity) + spawned producer task
//!                      for each file: part header, 32 KiB chunks, drop file
//!                      form fields
//!                      closing boundary → writer.close()
//!                   on error: remaining files dropped, writer.close_with_error(e)
//! ```
//!
//! The boundary (and so the content type) is fixed before the producer starts.

use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::pipe::{pipe, PipeWriter};
use super::{BodyProvider, Produced};
use crate::error::{BoxError, Result};
use crate::observability::metrics;

/// Size of one chunk read from a file.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between the producer and the engine.
const PIPE_CAPACITY: usize = 4;

const DEFAULT_FILE_MIME: &str = "application/octet-stream";

/// One file of a multipart upload.
pub struct FilePart {
    /// File name sent to the server.
    pub name: String,
    pub content: Box<dyn AsyncRead + Send + Unpin>,
    /// Form field name; derived from the position when absent.
    pub field_name: Option<String>,
    /// Content type of the part; `application/octet-stream` when absent.
    pub mime: Option<String>,
}

impl FilePart {
    pub fn new(name: impl Into<String>, content: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            content: Box::new(content),
            field_name: None,
            mime: None,
        }
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Open a file from disk; the MIME type is guessed from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = mime_guess::from_path(path).first().map(|m| m.to_string());

        Ok(Self {
            name,
            content: Box::new(file),
            field_name: None,
            mime,
        })
    }
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("name", &self.name)
            .field("field_name", &self.field_name)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

/// Field name for the file at `index` out of `count` files.
pub fn derive_field_name(explicit: Option<&str>, index: usize, count: usize) -> String {
    match explicit {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if count > 1 => format!("file{}", index + 1),
        _ => "file".to_string(),
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A fresh random boundary: 30 random bytes as lowercase hex.
pub fn random_boundary() -> String {
    let mut raw = [0u8; 30];
    rand::thread_rng().fill_bytes(&mut raw);
    raw.iter().fold(String::with_capacity(60), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Writes part delimiters and headers around a fixed boundary.
#[derive(Debug, Clone)]
pub struct Framer {
    boundary: String,
    wrote_part: bool,
}

impl Framer {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            wrote_part: false,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn part(&mut self, headers: &[(&str, &str)]) -> Bytes {
        let mut out = String::new();
        if self.wrote_part {
            out.push_str("\r\n");
        }
        self.wrote_part = true;

        let _ = write!(out, "--{}\r\n", self.boundary);
        for (name, value) in headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        Bytes::from(out)
    }

    /// Header of a file part.
    pub fn file_header(&mut self, field_name: &str, file_name: &str, mime: Option<&str>) -> Bytes {
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            escape_quotes(field_name),
            escape_quotes(file_name)
        );
        let mime = mime.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_FILE_MIME);
        self.part(&[("Content-Disposition", &disposition), ("Content-Type", mime)])
    }

    /// A complete plain form field.
    pub fn field(&mut self, name: &str, value: &str) -> Bytes {
        let disposition = format!("form-data; name=\"{}\"", escape_quotes(name));
        let header = self.part(&[("Content-Disposition", &disposition)]);

        let mut out = BytesMut::with_capacity(header.len() + value.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(value.as_bytes());
        out.freeze()
    }

    /// The terminal boundary.
    pub fn close(&self) -> Bytes {
        let lead = if self.wrote_part { "\r\n" } else { "" };
        Bytes::from(format!("{lead}--{}--\r\n", self.boundary))
    }
}

/// A multipart form: file parts first, then plain fields.
#[derive(Debug, Default)]
pub struct MultipartBody {
    files: Vec<FilePart>,
    fields: Vec<(String, String)>,
    boundary: Option<String>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, file: FilePart) -> Self {
        self.files.push(file);
        self
    }

    pub fn files(mut self, files: impl IntoIterator<Item = FilePart>) -> Self {
        self.files.extend(files);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Use a fixed boundary instead of a random one.
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl BodyProvider for MultipartBody {
    fn produce(self: Box<Self>) -> Result<Produced> {
        let MultipartBody {
            files,
            fields,
            boundary,
        } = *self;
        let mut framer = Framer::new(boundary.unwrap_or_else(random_boundary));
        let content_type = framer.content_type();

        if files.is_empty() {
            let encoded = encode_fields(&mut framer, &fields);
            return Ok(Produced::full(encoded, Some(&content_type)));
        }

        let (writer, reader) = pipe(PIPE_CAPACITY);
        let monitor = writer.monitor();
        tokio::spawn(run_producer(files, fields, framer, writer));

        Ok(Produced {
            body: reader.map_err(BoxError::from).boxed_unsync(),
            content_type: Some(content_type),
            replay: None,
            monitor: Some(monitor),
        })
    }
}

/// Form fields plus the terminal boundary, in memory.
fn encode_fields(framer: &mut Framer, fields: &[(String, String)]) -> Bytes {
    let mut out = BytesMut::new();
    for (name, value) in fields {
        out.extend_from_slice(&framer.field(name, value));
    }
    out.extend_from_slice(&framer.close());
    out.freeze()
}

async fn run_producer(
    files: Vec<FilePart>,
    fields: Vec<(String, String)>,
    mut framer: Framer,
    writer: PipeWriter,
) {
    match write_parts(files, &fields, &mut framer, &writer).await {
        Ok(()) => writer.close(),
        Err(err) => {
            tracing::debug!(error = %err, "Multipart producer failed");
            metrics::record_multipart_abort();
            writer.close_with_error(err);
        }
    }
}

async fn write_parts(
    files: Vec<FilePart>,
    fields: &[(String, String)],
    framer: &mut Framer,
    writer: &PipeWriter,
) -> std::result::Result<(), Arc<io::Error>> {
    let count = files.len();

    // every file not yet reached is dropped with the iterator on early return
    for (index, mut file) in files.into_iter().enumerate() {
        let field_name = derive_field_name(file.field_name.as_deref(), index, count);
        writer
            .write(framer.file_header(&field_name, &file.name, file.mime.as_deref()))
            .await?;

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buf.reserve(CHUNK_SIZE);
            let n = file.content.read_buf(&mut buf).await.map_err(Arc::new)?;
            if n == 0 {
                break;
            }
            writer.write(buf.split().freeze()).await?;
        }
        drop(file);
    }

    for (name, value) in fields {
        writer.write(framer.field(name, value)).await?;
    }
    writer.write(framer.close()).await
}
