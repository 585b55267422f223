//! Deadline-enforcing connection wrapper.
//!
//! # Responsibilities
//! - Tag each connection with an ID for tracing
//! - Arm a read deadline when a new read starts, a write deadline when a new
//!   write (or flush) starts
//! - Fail the pending operation with `io::ErrorKind::TimedOut` once the
//!   connection has been idle for the whole timeout
//!
//! # Design Decisions
//! - Progress in either direction counts. The HTTP/1 engine keeps a read
//!   pending for the response head while the request body is still being
//!   written, so a steady upload pushes the read deadline out.
//! - The deadline bounds the time between bytes, not the whole exchange.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use tokio::time::{Instant, Sleep};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a dialed connection in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One direction's deadline. Armed when an operation starts, cleared when
/// it completes.
#[derive(Debug, Default)]
struct OpDeadline {
    sleep: Option<Pin<Box<Sleep>>>,
    active: bool,
}

impl OpDeadline {
    fn begin(&mut self, timeout: Duration) {
        if self.active {
            return;
        }
        self.active = true;
        let at = Instant::now() + timeout;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(at))),
        }
    }

    fn finish(&mut self) {
        self.active = false;
    }

    /// True once the connection made no progress for `timeout`. A deadline
    /// that fires early is moved to `last_progress + timeout`.
    fn poll_elapsed(&mut self, cx: &mut Context<'_>, last_progress: Instant, timeout: Duration) -> bool {
        if !self.active {
            return false;
        }
        let Some(sleep) = self.sleep.as_mut() else {
            return false;
        };
        loop {
            if sleep.as_mut().poll(cx).is_pending() {
                return false;
            }
            let next = last_progress + timeout;
            if next <= Instant::now() {
                return true;
            }
            sleep.as_mut().reset(next);
        }
    }
}

/// A connection whose reads and writes each carry a deadline.
#[derive(Debug)]
pub struct DeadlineConnection<T> {
    inner: T,
    id: ConnectionId,
    timeout: Duration,
    last_progress: Instant,
    read: OpDeadline,
    write: OpDeadline,
}

impl<T> DeadlineConnection<T> {
    /// Wrap `inner`. A zero `timeout` disables both deadlines.
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            id: ConnectionId::next(),
            timeout,
            last_progress: Instant::now(),
            read: OpDeadline::default(),
            write: OpDeadline::default(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn enabled(&self) -> bool {
        !self.timeout.is_zero()
    }
}

fn timed_out(id: ConnectionId, op: &'static str, timeout: Duration) -> io::Error {
    tracing::debug!(connection_id = %id, op, ?timeout, "Connection deadline elapsed");
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{op} deadline of {timeout:?} elapsed"),
    )
}

impl<T> DeadlineConnection<T>
where
    T: Write + Unpin,
{
    /// Run one write-side operation under the write deadline.
    fn poll_write_op<R>(
        &mut self,
        cx: &mut Context<'_>,
        op: &'static str,
        f: impl FnOnce(Pin<&mut T>, &mut Context<'_>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        if !self.enabled() {
            return f(Pin::new(&mut self.inner), cx);
        }
        self.write.begin(self.timeout);
        match f(Pin::new(&mut self.inner), cx) {
            Poll::Ready(result) => {
                self.write.finish();
                if result.is_ok() {
                    self.last_progress = Instant::now();
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                if self.write.poll_elapsed(cx, self.last_progress, self.timeout) {
                    self.write.finish();
                    return Poll::Ready(Err(timed_out(self.id, op, self.timeout)));
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Read for DeadlineConnection<T>
where
    T: Read + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if !this.enabled() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        this.read.begin(this.timeout);
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read.finish();
                if result.is_ok() {
                    this.last_progress = Instant::now();
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.read.poll_elapsed(cx, this.last_progress, this.timeout) {
                    this.read.finish();
                    return Poll::Ready(Err(timed_out(this.id, "read", this.timeout)));
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Write for DeadlineConnection<T>
where
    T: Write + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_write_op(cx, "write", |io, cx| io.poll_write(cx, buf))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_write_op(cx, "flush", |io, cx| io.poll_flush(cx))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.poll_write_op(cx, "write", |io, cx| io.poll_write_vectored(cx, bufs))
    }
}

impl<T> Connection for DeadlineConnection<T> {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl<T> Drop for DeadlineConnection<T> {
    fn drop(&mut self) {
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper_util::rt::TokioIo;
    use std::future::poll_fn;
    use std::mem::MaybeUninit;
    use tokio::io::AsyncWriteExt;

    async fn read_some<T: Read + Unpin>(conn: &mut DeadlineConnection<T>) -> io::Result<usize> {
        let mut storage = [MaybeUninit::<u8>::uninit(); 64];
        let mut buf = hyper::rt::ReadBuf::uninit(&mut storage);
        poll_fn(|cx| Pin::new(&mut *conn).poll_read(cx, buf.unfilled())).await?;
        Ok(buf.filled().len())
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, b) = tokio::io::duplex(8);
        let first = DeadlineConnection::new(TokioIo::new(a), Duration::ZERO);
        let second = DeadlineConnection::new(TokioIo::new(b), Duration::ZERO);
        assert_ne!(first.id(), second.id());
        assert!(first.id().to_string().starts_with("conn-"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_read_times_out() {
        let (_peer, local) = tokio::io::duplex(64);
        let mut conn = DeadlineConnection::new(TokioIo::new(local), Duration::from_millis(100));

        let started = Instant::now();
        let err = read_some(&mut conn).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn each_read_gets_a_fresh_deadline() {
        let (mut peer, local) = tokio::io::duplex(64);
        let mut conn = DeadlineConnection::new(TokioIo::new(local), Duration::from_millis(100));

        tokio::spawn(async move {
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(80)).await;
                peer.write_all(b"x").await.unwrap();
            }
        });

        // 320ms in total, but never more than 80ms between bytes
        for _ in 0..4 {
            assert_eq!(read_some(&mut conn).await.unwrap(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writes_keep_a_pending_read_alive() {
        let (_peer, local) = tokio::io::duplex(64);
        let mut conn = DeadlineConnection::new(TokioIo::new(local), Duration::from_millis(100));
        let mut ticker = tokio::time::interval(Duration::from_millis(60));
        let mut storage = [MaybeUninit::<u8>::uninit(); 64];
        let mut buf = hyper::rt::ReadBuf::uninit(&mut storage);
        let mut writes = 0;

        // the read stays pending throughout; a write lands every 60ms, five times
        let started = Instant::now();
        let err = poll_fn(|cx| loop {
            if let Poll::Ready(res) = Pin::new(&mut conn).poll_read(cx, buf.unfilled()) {
                return Poll::Ready(res);
            }
            if writes == 5 || ticker.poll_tick(cx).is_pending() {
                return Poll::Pending;
            }
            writes += 1;
            if let Poll::Ready(Err(e)) = Pin::new(&mut conn).poll_write(cx, b"x") {
                return Poll::Ready(Err(e));
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(writes, 5);
        assert!(started.elapsed() >= Duration::from_millis(340));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_fires() {
        let (mut peer, local) = tokio::io::duplex(64);
        let mut conn = DeadlineConnection::new(TokioIo::new(local), Duration::ZERO);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            peer.write_all(b"late").await.unwrap();
        });

        assert_eq!(read_some(&mut conn).await.unwrap(), 4);
    }
}
