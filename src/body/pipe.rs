//! Bounded in-memory pipe between a body producer task and the engine.
//!
//! # States
//! ```text
//! Open ──writer.close()──────────▶ Closed      (reader: remaining chunks, then EOF)
//!   │──writer.close_with_error(e)▶ Failed(e)   (reader: remaining chunks, then e forever)
//!   └──reader dropped────────────▶ Abandoned   (writer: every write fails)
//! ```
//!
//! The terminal error is one `Arc<io::Error>` seen by both ends and by the
//! [`PipeMonitor`], so the caller gets back exactly what the producer raised.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error yielded by a [`PipeReader`] after the producer failed.
#[derive(Debug, Clone, Error)]
#[error("body producer failed: {0}")]
pub struct PipeError(#[source] pub Arc<io::Error>);

#[derive(Debug, Default)]
struct PipeState {
    error: Option<Arc<io::Error>>,
    reader_gone: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<PipeState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        // the state is plain data; a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a pipe buffering at most `capacity` chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    (
        PipeWriter {
            tx,
            shared: Arc::clone(&shared),
        },
        PipeReader { rx, shared },
    )
}

/// Producer end.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Send one chunk, waiting while the pipe is full.
    ///
    /// Fails once the reader is gone.
    pub async fn write(&self, chunk: Bytes) -> Result<(), Arc<io::Error>> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(chunk).await.map_err(|_| closed_pipe())
    }

    /// Finish cleanly; the reader sees end of stream after the buffered chunks.
    pub fn close(self) {}

    /// Finish with `err`; the reader sees it after the buffered chunks.
    ///
    /// Returns the shared error value.
    pub fn close_with_error(self, err: impl Into<Arc<io::Error>>) -> Arc<io::Error> {
        let err = err.into();
        let mut state = self.shared.lock();
        if state.error.is_none() && !state.reader_gone {
            state.error = Some(Arc::clone(&err));
        }
        err
    }

    /// A handle that reports the producer's error after the fact.
    pub fn monitor(&self) -> PipeMonitor {
        PipeMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn closed_pipe() -> Arc<io::Error> {
    Arc::new(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "write on closed pipe",
    ))
}

/// Consumer end, usable directly as a request body.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
}

impl Body for PipeReader {
    type Data = Bytes;
    type Error = PipeError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, PipeError>>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => match self.shared.lock().error.clone() {
                Some(err) => Poll::Ready(Some(Err(PipeError(err)))),
                None => Poll::Ready(None),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.lock().reader_gone = true;
    }
}

/// Observes the error a producer closed its pipe with.
#[derive(Debug, Clone)]
pub struct PipeMonitor {
    shared: Arc<Shared>,
}

impl PipeMonitor {
    /// The producer's error, if it failed while the reader was still attached.
    pub fn error(&self) -> Option<Arc<io::Error>> {
        self.shared.lock().error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn clean_close_is_end_of_stream() {
        let (writer, mut reader) = pipe(4);
        writer.write(Bytes::from_static(b"ab")).await.unwrap();
        writer.write(Bytes::from_static(b"cd")).await.unwrap();
        writer.close();

        let mut out = Vec::new();
        while let Some(frame) = reader.frame().await {
            out.extend_from_slice(&frame.unwrap().into_data().unwrap());
        }
        assert_eq!(out, b"abcd");
    }

    #[tokio::test]
    async fn error_follows_buffered_chunks_and_repeats() {
        let (writer, mut reader) = pipe(4);
        let monitor = writer.monitor();
        writer.write(Bytes::from_static(b"ab")).await.unwrap();
        let raised = writer.close_with_error(io::Error::new(io::ErrorKind::Other, "disk gone"));

        let first = reader.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "ab");

        for _ in 0..2 {
            let err = reader.frame().await.unwrap().unwrap_err();
            assert!(Arc::ptr_eq(&err.0, &raised));
        }
        assert!(Arc::ptr_eq(&monitor.error().unwrap(), &raised));
    }

    #[tokio::test]
    async fn dropped_reader_fails_writer() {
        let (writer, reader) = pipe(1);
        let monitor = writer.monitor();
        drop(reader);

        let err = writer.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        writer.close_with_error(err);
        assert!(monitor.error().is_none());
    }

    #[tokio::test]
    async fn full_pipe_applies_backpressure() {
        let (writer, mut reader) = pipe(1);
        writer.write(Bytes::from_static(b"1")).await.unwrap();

        assert!(writer.write(Bytes::from_static(b"2")).now_or_never().is_none());

        reader.frame().await.unwrap().unwrap();
        writer.write(Bytes::from_static(b"2")).await.unwrap();
    }
}
