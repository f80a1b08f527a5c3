//! One-shot shutdown completion flag
//!
//! A single false -> true transition that releases every waiter, async
//! tasks and blocked OS threads alike. Once set, it stays set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Completion flag with broadcast wake-up
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    completed: AtomicBool,
    // mirrors `completed` for condvar waiters
    gate: Mutex<bool>,
    cvar: Condvar,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create a signal that has not completed yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the signal has completed
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Complete the signal and release all waiters.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn complete(&self) -> bool {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cvar.notify_all();
        self.notify.notify_waiters();
        true
    }

    /// Wait until the signal completes.
    ///
    /// Dropping the returned future cancels the wait.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking the flag so a concurrent complete() is not missed
            notified.as_mut().enable();
            if self.is_completed() {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the signal completes or `timeout` elapses.
    ///
    /// Returns `true` if the signal completed.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = tokio::time::Instant::now().checked_add(timeout) else {
            self.wait().await;
            return true;
        };
        tokio::time::timeout_at(deadline, self.wait()).await.is_ok()
    }

    /// Block the current thread until the signal completes.
    ///
    /// Must not be called from inside an async task.
    pub fn wait_blocking(&self) {
        let guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .cvar
            .wait_while(guard, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block the current thread until the signal completes or `timeout` elapses.
    ///
    /// Returns `true` if the signal completed.
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            self.wait_blocking();
            return true;
        };

        let mut guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *guard {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
