//! Process-wide cancellation token.
//!
//! A [`Shutdown`] is cheap to clone and every clone observes the same signal.
//! Cancelling is idempotent. Blocking code selects on [`Shutdown::signal`]
//! next to its own channel operation:
//!
//! ```ignore
//! crossbeam_channel::select! {
//!     send(queue, item) -> res => res.map_err(|_| Interrupted)?,
//!     recv(shutdown.signal()) -> _ => return Err(Interrupted),
//! }
//! ```
//!
//! The signal channel never carries a message; it becomes ready when the
//! only sender is dropped, which wakes every waiter at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
}

/// Broadcast cancellation signal shared by all pipeline stages.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
    signal: Receiver<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
            }),
            signal,
        }
    }

    /// Request shutdown. Safe to call any number of times from any thread.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let trigger = match self.inner.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(trigger);
        tracing::debug!("shutdown requested");
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once shutdown is requested.
    #[must_use]
    pub const fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Sleep for `delay` unless shutdown arrives first.
    ///
    /// Returns `true` if the full delay elapsed, `false` if cancelled.
    #[must_use]
    pub fn sleep(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.signal.recv_timeout(delay) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => true,
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => false,
        }
    }
}
