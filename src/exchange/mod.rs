//! Exchange lifecycle: inactivity timeout and cancellation.
//!
//! # Data Flow
//! ```text
//! Client::send
//!     → Exchange::new (signal, timer, optional deadline)
//!     → reset() before dial                 phase = Sending
//!     → TimedBody::sending  (reset per read, close → Receiving + reset)
//!     → response headers    stop()
//!     → TimedBody::receiving (reset per read, stop after data, close → stop)
//!     → drop of last handle → signal released, timer driver exits
//!
//! Timer expiry / deadline:
//!     timer driver → CancelSignal::cancel(cause)
//!     → orchestrator select drops the engine future
//!     → body polls surface TimeoutSending / TimeoutReceiving / DeadlineExceeded
//! ```
//!
//! # Design Decisions
//! - One explicit state object per exchange, shared by `Arc`, instead of
//!   ambient mutable timers
//! - Phases are sequential for one exchange, so the timer needs no lock
//! - Inactivity timeout and overall deadline are independent; first one wins

pub mod cancel_reader;
pub mod signal;
pub mod timed_body;
pub mod timer;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::Error;

pub use cancel_reader::CancelLinkedReader;
pub use signal::{Cause, CancelSignal};
pub use timed_body::TimedBody;
pub use timer::ResettableTimer;

/// Which half of the exchange is making progress.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Dialing and writing the request.
    Sending = 0,
    /// Waiting for response headers and reading the response body.
    Receiving = 1,
}

impl From<u8> for Phase {
    fn from(val: u8) -> Self {
        match val {
            1 => Phase::Receiving,
            _ => Phase::Sending,
        }
    }
}

/// Atomic phase shared with the timer driver.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub fn get(&self) -> Phase {
        Phase::from(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

#[derive(Debug)]
struct Shared {
    id: Uuid,
    signal: CancelSignal,
    timer: ResettableTimer,
    phase: Arc<PhaseCell>,
    request_timeout: Option<Duration>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.timer.stop();
        self.signal.release();
    }
}

/// One logical request/response pair, including its redirect hops.
///
/// Cloning is cheap; every clone refers to the same timer and signal.
#[derive(Debug, Clone)]
pub struct Exchange {
    shared: Arc<Shared>,
}

impl Exchange {
    /// Create an exchange.
    ///
    /// `timeout` is the inactivity timeout (zero disables it), `request_timeout`
    /// bounds the whole exchange and never resets.
    pub fn new(timeout: Duration, request_timeout: Option<Duration>) -> Self {
        let request_timeout = request_timeout.filter(|d| !d.is_zero());
        let signal = CancelSignal::new();
        let phase = Arc::new(PhaseCell::new(Phase::Sending));
        let deadline = request_timeout.map(|d| tokio::time::Instant::now() + d);
        let timer = ResettableTimer::new(timeout, deadline, signal.clone(), Arc::clone(&phase));

        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                signal,
                timer,
                phase,
                request_timeout,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.shared.signal
    }

    pub fn timer(&self) -> &ResettableTimer {
        &self.shared.timer
    }

    /// The inactivity timeout; zero when disabled.
    pub fn timeout(&self) -> Duration {
        self.shared.timer.timeout()
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase.get()
    }

    pub fn enter(&self, phase: Phase) {
        let previous = self.shared.phase.get();
        if previous != phase {
            self.shared.phase.set(phase);
            tracing::trace!(exchange_id = %self.shared.id, ?phase, "Exchange phase changed");
        }
    }

    pub fn reset(&self) {
        self.shared.timer.reset();
    }

    pub fn stop(&self) {
        self.shared.timer.stop();
    }

    /// The error matching the signal's cause, if it fired.
    pub fn cancel_error(&self) -> Option<Error> {
        self.shared.signal.cause().map(|cause| self.error_for(cause))
    }

    /// Map a cancellation cause to the caller-facing error.
    pub fn error_for(&self, cause: Cause) -> Error {
        match cause {
            Cause::Inactivity(Phase::Sending) => Error::TimeoutSending(self.timeout()),
            Cause::Inactivity(Phase::Receiving) => Error::TimeoutReceiving(self.timeout()),
            Cause::Deadline => {
                Error::DeadlineExceeded(self.shared.request_timeout.unwrap_or_default())
            }
        }
    }

    /// The timeout error for the current phase, used when a deadline
    /// connection reported an I/O timeout before the shared timer fired.
    pub fn phase_timeout_error(&self) -> Error {
        self.error_for(Cause::Inactivity(self.phase()))
    }
}
