//! Adapters between `AsyncRead` byte streams and `http_body::Body`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body, Frame};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{BoxError, Error};

const READ_CHUNK: usize = 8 * 1024;

/// Turns an [`AsyncRead`] into a request body of data frames.
#[derive(Debug)]
pub struct ReaderBody<R> {
    reader: R,
    buf: BytesMut,
    done: bool,
}

impl<R> ReaderBody<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::new(),
            done: false,
        }
    }
}

impl<R: AsyncRead + Unpin> Body for ReaderBody<R> {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        this.buf.resize(READ_CHUNK, 0);
        let mut read = ReadBuf::new(&mut this.buf);
        match Pin::new(&mut this.reader).poll_read(cx, &mut read) {
            Poll::Ready(Ok(())) => {
                let n = read.filled().len();
                if n == 0 {
                    this.done = true;
                    this.buf.clear();
                    return Poll::Ready(None);
                }
                this.buf.truncate(n);
                Poll::Ready(Some(Ok(Frame::data(this.buf.split().freeze()))))
            }
            Poll::Ready(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

/// Reads the data frames of a body as a byte stream; trailers are skipped.
#[derive(Debug)]
pub struct BodyReader<B> {
    body: B,
    chunk: Bytes,
    done: bool,
}

impl<B> BodyReader<B> {
    pub fn new(body: B) -> Self {
        Self {
            body,
            chunk: Bytes::new(),
            done: false,
        }
    }
}

/// Wrap a body error for the `AsyncRead` world, keeping timeouts recognisable.
pub(crate) fn body_error_to_io(err: BoxError) -> io::Error {
    let kind = match err.downcast_ref::<Error>() {
        Some(e) if e.is_timeout() => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

impl<B> AsyncRead for BodyReader<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        while this.chunk.is_empty() {
            if this.done {
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        this.chunk = data;
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Err(body_error_to_io(e.into())));
                }
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = this.chunk.len().min(buf.remaining());
        buf.put_slice(&this.chunk[..n]);
        this.chunk.advance(n);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reader_becomes_body() {
        let data = vec![7u8; READ_CHUNK * 2 + 10];
        let body = ReaderBody::new(std::io::Cursor::new(data.clone()));
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn body_becomes_reader() {
        let mut reader = BodyReader::new(Full::new(Bytes::from_static(b"hello world")));
        let mut small = [0u8; 5];
        reader.read_exact(&mut small).await.unwrap();
        assert_eq!(&small, b"hello");

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, " world");
    }

    #[test]
    fn timeout_errors_keep_their_kind() {
        let err = body_error_to_io(Box::new(Error::TimeoutReceiving(
            std::time::Duration::from_millis(5),
        )));
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
