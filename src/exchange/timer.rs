//! Shared resettable inactivity timer.
//!
//! # Responsibilities
//! - Hold the single expiry instant of one exchange (`reset` / `stop`)
//! - Fire the exchange's cancel signal when the expiry passes
//! - Enforce the optional overall deadline from the same driver task
//!
//! # Design Decisions
//! - The expiry lives in a `watch` channel; one driver task sleeps on it and
//!   re-reads it whenever it changes, so `reset` never allocates
//! - The driver is spawned lazily on first use
//! - The driver holds no reference back to the exchange; dropping the timer
//!   closes the channel and the driver exits

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::signal::{Cause, CancelSignal};
use super::PhaseCell;

/// A single timer reused by every phase of one exchange.
#[derive(Debug)]
pub struct ResettableTimer {
    timeout: Duration,
    deadline: Option<Instant>,
    expiry: watch::Sender<Option<Instant>>,
    started: AtomicBool,
    signal: CancelSignal,
    phase: Arc<PhaseCell>,
}

impl ResettableTimer {
    /// Create a timer. A zero `timeout` disables inactivity tracking.
    pub(crate) fn new(
        timeout: Duration,
        deadline: Option<Instant>,
        signal: CancelSignal,
        phase: Arc<PhaseCell>,
    ) -> Self {
        let (expiry, _) = watch::channel(None);
        let timer = Self {
            timeout,
            deadline,
            expiry,
            started: AtomicBool::new(false),
            signal,
            phase,
        };
        if deadline.is_some() {
            timer.ensure_driver();
        }
        timer
    }

    /// True when inactivity tracking is on.
    pub fn is_enabled(&self) -> bool {
        !self.timeout.is_zero()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Move the expiry to now + timeout.
    pub fn reset(&self) {
        if !self.is_enabled() {
            return;
        }
        self.ensure_driver();
        self.expiry.send_replace(Some(Instant::now() + self.timeout));
    }

    /// Disarm until the next `reset`.
    pub fn stop(&self) {
        if !self.is_enabled() {
            return;
        }
        self.expiry.send_if_modified(|expiry| expiry.take().is_some());
    }

    /// True while an expiry is pending.
    pub fn is_armed(&self) -> bool {
        self.expiry.borrow().is_some()
    }

    fn ensure_driver(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let rx = self.expiry.subscribe();
        let signal = self.signal.clone();
        let phase = Arc::clone(&self.phase);
        tokio::spawn(drive(rx, self.deadline, signal, phase));
    }
}

async fn drive(
    mut expiry: watch::Receiver<Option<Instant>>,
    deadline: Option<Instant>,
    signal: CancelSignal,
    phase: Arc<PhaseCell>,
) {
    let settled = signal.settled();
    tokio::pin!(settled);

    loop {
        let armed = *expiry.borrow_and_update();

        let idle = async {
            match armed {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let overall = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let expired = tokio::select! {
            _ = idle => Some(Cause::Inactivity(phase.get())),
            _ = overall => Some(Cause::Deadline),
            changed = expiry.changed() => {
                if changed.is_err() {
                    return;
                }
                None
            }
            _ = &mut settled => return,
        };

        match expired {
            Some(Cause::Deadline) => {
                signal.cancel(Cause::Deadline);
                return;
            }
            // a reset may have raced the sleep
            Some(cause) if *expiry.borrow() == armed => {
                signal.cancel(cause);
                return;
            }
            _ => {}
        }
    }
}
