//! Request and response body wrappers bound to an exchange timer.
//!
//! # States
//! ```text
//! request:  Sending ──(read: reset)──▶ Sending ──close──▶ Sent (phase=Receiving, reset)
//! response: Receiving ──(read: reset, data: stop)──▶ Receiving ──close──▶ Done (stop)
//! ```
//!
//! "close" is end of stream, an explicit `close()`, or drop. It runs once.
//! A request body dropped before its end of stream was aborted by the engine:
//! the phase stays Sending so the failure is reported against the upload.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use super::{Cause, Exchange, Phase};
use crate::error::{has_io_timeout, BoxError, Error};

/// A body that resets the exchange's shared timer on every read.
pub struct TimedBody<B> {
    inner: B,
    exchange: Exchange,
    direction: Phase,
    reading: bool,
    complete: bool,
    closed: bool,
    cancelled: Pin<Box<dyn Future<Output = Cause> + Send>>,
}

impl<B: Body> TimedBody<B> {
    /// Wrap an outgoing request body.
    pub fn sending(inner: B, exchange: Exchange) -> Self {
        Self::new(inner, exchange, Phase::Sending)
    }

    /// Wrap an incoming response body.
    pub fn receiving(inner: B, exchange: Exchange) -> Self {
        Self::new(inner, exchange, Phase::Receiving)
    }

    fn new(inner: B, exchange: Exchange, direction: Phase) -> Self {
        let cancelled = Box::pin(exchange.signal().cancelled());
        let complete = inner.is_end_stream();
        Self {
            inner,
            exchange,
            direction,
            reading: false,
            complete,
            closed: false,
            cancelled,
        }
    }

}

impl<B> TimedBody<B> {
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Finish this side of the exchange. Calling it again does nothing.
    ///
    /// Closing the request body arms the timer for the wait on response
    /// headers; closing the response body stops it.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reading = false;

        match self.direction {
            Phase::Sending => {
                // headers may already be in, then the receive side owns the timer
                if self.exchange.phase() == Phase::Sending {
                    self.exchange.enter(Phase::Receiving);
                    self.exchange.reset();
                }
            }
            Phase::Receiving => self.exchange.stop(),
        }
    }

    fn map_error(&self, err: BoxError) -> Error {
        if let Some(cancelled) = self.exchange.cancel_error() {
            return cancelled;
        }
        if has_io_timeout(&*err) {
            return self.exchange.error_for(Cause::Inactivity(self.direction));
        }
        Error::Body(err)
    }
}

impl<B> Body for TimedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Error>>> {
        let this = &mut *self;

        if let Some(err) = this.exchange.cancel_error() {
            return Poll::Ready(Some(Err(err)));
        }
        if this.closed {
            return Poll::Ready(None);
        }

        if !this.reading {
            this.reading = true;
            this.exchange.reset();
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                this.reading = false;
                if this.direction == Phase::Receiving {
                    this.exchange.stop();
                }
                if this.inner.is_end_stream() {
                    this.complete = true;
                    this.close();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.reading = false;
                let err = this.map_error(err.into());
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.complete = true;
                this.close();
                Poll::Ready(None)
            }
            Poll::Pending => match this.cancelled.as_mut().poll(cx) {
                Poll::Ready(cause) => {
                    this.reading = false;
                    Poll::Ready(Some(Err(this.exchange.error_for(cause))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.closed || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for TimedBody<B> {
    fn drop(&mut self) {
        if self.direction == Phase::Sending && !self.complete {
            self.closed = true;
            return;
        }
        self.close();
    }
}

impl<B> fmt::Debug for TimedBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedBody")
            .field("exchange_id", &self.exchange.id())
            .field("direction", &self.direction)
            .field("closed", &self.closed)
            .finish()
    }
}
