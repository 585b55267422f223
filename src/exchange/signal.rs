//! One-shot cancellation signal for an exchange.
//!
//! # States
//! ```text
//! Pending ──cancel(cause)──▶ Cancelled(cause)
//!    │
//!    └──────release()──────▶ Released
//! ```
//! The first transition out of `Pending` wins; every later call is a no-op.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use super::Phase;

/// Why an exchange was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// No progress for the inactivity timeout during the given phase.
    Inactivity(Phase),
    /// The overall exchange deadline elapsed.
    Deadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Pending,
    Cancelled(Cause),
    Released,
}

/// Idempotent one-shot trigger observed by everything taking part in one exchange.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<SignalState>>,
}

impl CancelSignal {
    /// Create a pending signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SignalState::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns true only for the call that actually fired it.
    pub fn cancel(&self, cause: Cause) -> bool {
        let fired = self.tx.send_if_modified(|state| {
            if *state == SignalState::Pending {
                *state = SignalState::Cancelled(cause);
                true
            } else {
                false
            }
        });
        if fired {
            tracing::debug!(cause = ?cause, "Exchange cancelled");
        }
        fired
    }

    /// Retire the signal without firing it. Later `cancel` calls do nothing.
    pub fn release(&self) {
        self.tx.send_if_modified(|state| {
            if *state == SignalState::Pending {
                *state = SignalState::Released;
                true
            } else {
                false
            }
        });
    }

    /// The cause, if the signal fired.
    pub fn cause(&self) -> Option<Cause> {
        match *self.tx.borrow() {
            SignalState::Cancelled(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Resolves with the cause once the signal fires. Never resolves if it is released.
    pub fn cancelled(&self) -> impl Future<Output = Cause> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            loop {
                if let SignalState::Cancelled(cause) = *rx.borrow_and_update() {
                    return cause;
                }
                if rx.changed().await.is_err() {
                    return std::future::pending().await;
                }
            }
        }
    }

    /// Resolves once the signal left `Pending`, either way.
    pub(crate) fn settled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|state| *state != SignalState::Pending).await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_idempotent() {
        let signal = CancelSignal::new();
        assert!(signal.cancel(Cause::Inactivity(Phase::Sending)));
        assert!(!signal.cancel(Cause::Deadline));
        assert_eq!(signal.cause(), Some(Cause::Inactivity(Phase::Sending)));
    }

    #[test]
    fn release_blocks_later_cancel() {
        let signal = CancelSignal::new();
        signal.release();
        assert!(!signal.cancel(Cause::Deadline));
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_sees_cause() {
        let signal = CancelSignal::new();
        let waiter = tokio::spawn(signal.cancelled());

        tokio::task::yield_now().await;
        signal.cancel(Cause::Deadline);

        let cause = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert_eq!(cause, Cause::Deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn released_signal_never_resolves() {
        let signal = CancelSignal::new();
        signal.release();
        let result = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
