//! Event primitives for the pipeline
//!
//! Two shapes cover every wait in the engine: a one-shot [`Completion`]
//! (download finished, read finished) and a repeatable edge-triggered
//! [`Signal`] (feed decoder, new download, task update, state update).
//! Waiters must tolerate spurious wakeups and re-check their condition;
//! both primitives only guarantee that a `wait` returns some time after the
//! corresponding set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// One-shot completion token.
///
/// Cloned handles share state. Once completed it stays completed; `wait`
/// returns immediately afterwards.
#[derive(Clone, Default)]
pub struct Completion {
    inner: Arc<CompletionState>,
}

#[derive(Default)]
struct CompletionState {
    done: AtomicBool,
    notify: Notify,
}

impl Completion {
    /// Create a fresh, incomplete token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark complete and wake every waiter
    pub fn complete(&self) {
        self.inner.done.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token has completed
    pub fn is_complete(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Wait until completed. Returns immediately if already complete.
    pub async fn wait(&self) {
        loop {
            if self.is_complete() {
                return;
            }
            // Register interest before re-checking so a concurrent
            // `complete` between the check and the await is not lost.
            let notified = self.inner.notify.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_complete())
            .finish()
    }
}

/// Repeatable edge-triggered signal.
///
/// `set` latches the signal and wakes all waiters; it stays set until some
/// consumer calls `reset`. A `wait` on a set signal returns immediately.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalState>,
}

#[derive(Default)]
struct SignalState {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create a fresh, unset signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the signal and wake every waiter
    pub fn set(&self) {
        self.inner.set.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Clear the latch
    pub fn reset(&self) {
        self.inner.set.store(false, Ordering::Release);
    }

    /// Whether the signal is currently latched
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::Acquire)
    }

    /// Wait until the signal is latched. Does not consume the latch.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("set", &self.is_set()).finish()
    }
}
