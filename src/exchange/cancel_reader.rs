//! Byte-stream reader whose stall fires the exchange's cancellation.
//!
//! Unlike [`TimedBody`](super::TimedBody), this reader owns its own per-read
//! timer: every read arms a fresh sleep, completion disarms it, and expiry
//! cancels the whole exchange before returning the error.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

use super::{Cause, Exchange, Phase};
use crate::error::Error;

/// Wraps an [`AsyncRead`] and ties its stalls to the exchange signal.
pub struct CancelLinkedReader<R> {
    inner: R,
    exchange: Exchange,
    phase: Phase,
    timeout: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    reading: bool,
    closed: bool,
    cancelled: Pin<Box<dyn Future<Output = Cause> + Send>>,
}

impl<R> CancelLinkedReader<R> {
    /// Link `inner` to `exchange`, using the exchange's inactivity timeout
    /// and its current phase.
    pub fn new(inner: R, exchange: Exchange) -> Self {
        let timeout = exchange.timeout();
        let phase = exchange.phase();
        let cancelled = Box::pin(exchange.signal().cancelled());
        Self {
            inner,
            exchange,
            phase,
            timeout,
            sleep: None,
            reading: false,
            closed: false,
            cancelled,
        }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Retire the exchange signal. Later reads return end of stream.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sleep = None;
        self.exchange.stop();
        self.exchange.signal().release();
    }

    fn arm(&mut self) {
        let at = Instant::now() + self.timeout;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(at))),
        }
    }

    fn fail(&mut self, cause: Cause) -> io::Error {
        self.reading = false;
        into_io(self.exchange.error_for(cause))
    }
}

/// Extracts the client error from an I/O error produced by a linked reader.
pub fn client_error(err: &io::Error) -> Option<&Error> {
    err.get_ref()?.downcast_ref::<Error>()
}

fn into_io(err: Error) -> io::Error {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, err)
}

impl<R: AsyncRead + Unpin> AsyncRead for CancelLinkedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Some(cause) = this.exchange.signal().cause() {
            return Poll::Ready(Err(this.fail(cause)));
        }
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        if this.timeout.is_zero() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        if !this.reading {
            this.reading = true;
            this.arm();
        }

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.reading = false;
                Poll::Ready(result)
            }
            Poll::Pending => {
                if let Poll::Ready(cause) = this.cancelled.as_mut().poll(cx) {
                    return Poll::Ready(Err(this.fail(cause)));
                }

                let elapsed = match this.sleep.as_mut() {
                    Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
                    None => false,
                };
                if elapsed {
                    let stalled = Cause::Inactivity(this.phase);
                    this.exchange.signal().cancel(stalled);
                    // the shared timer may have fired first with another cause
                    let cause = this.exchange.signal().cause().unwrap_or(stalled);
                    tracing::debug!(
                        exchange_id = %this.exchange.id(),
                        ?cause,
                        "Linked reader stalled"
                    );
                    return Poll::Ready(Err(this.fail(cause)));
                }
                Poll::Pending
            }
        }
    }
}

impl<R> Drop for CancelLinkedReader<R> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn receiving(timeout_ms: u64) -> Exchange {
        let exchange = Exchange::new(Duration::from_millis(timeout_ms), None);
        exchange.enter(Phase::Receiving);
        exchange
    }

    #[tokio::test(start_paused = true)]
    async fn stall_cancels_exchange() {
        let (_tx, rx) = tokio::io::duplex(64);
        let exchange = receiving(100);
        let signal = exchange.signal().clone();
        let mut reader = CancelLinkedReader::new(rx, exchange);

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(matches!(client_error(&err), Some(Error::TimeoutReceiving(_))));
        assert_eq!(signal.cause(), Some(Cause::Inactivity(Phase::Receiving)));

        // already fired: every later read fails the same way
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_writer_keeps_reader_alive() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = CancelLinkedReader::new(rx, receiving(100));

        let writer = tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tx.write_all(b"ab").await.unwrap();
            }
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        writer.await.unwrap();
        assert_eq!(out, b"ababababab");
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_signal() {
        let (_tx, rx) = tokio::io::duplex(64);
        let exchange = receiving(100);
        let signal = exchange.signal().clone();
        let mut reader = CancelLinkedReader::new(rx, exchange);

        reader.close();
        reader.close();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert!(!signal.cancel(Cause::Deadline));
    }
}
