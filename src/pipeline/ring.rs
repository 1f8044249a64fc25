//! Bounded ring of encoded Opus frames
//!
//! The consumer produces into the ring and blocks when it is full; the
//! sender consumes and blocks when it is empty. A one-shot shutdown wakes
//! every waiter so both sides can observe the stop flag.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

/// Frames held between consumer and sender
pub const RING_CAPACITY: usize = 25;

/// The ring has been shut down; no more frames flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingClosed;

/// Bounded FIFO of encoded frames
pub struct FrameRing {
    state: Mutex<RingState>,
    not_full: Notify,
    not_empty: Notify,
}

struct RingState {
    frames: VecDeque<Bytes>,
    closed: bool,
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRing {
    /// Create an empty ring
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RingState {
                frames: VecDeque::with_capacity(RING_CAPACITY),
                closed: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Number of frames currently queued
    pub fn len(&self) -> usize {
        self.state.lock().expect("ring lock poisoned").frames.len()
    }

    /// Whether the ring holds no frames
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether shutdown has been signalled
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("ring lock poisoned").closed
    }

    /// Enqueue one frame, waiting while the ring is at capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RingClosed`] once the ring has been shut down.
    pub async fn produce(&self, frame: Bytes) -> Result<(), RingClosed> {
        let mut frame = Some(frame);
        loop {
            let notified = self.not_full.notified();
            {
                let mut state = self.state.lock().expect("ring lock poisoned");
                if state.closed {
                    return Err(RingClosed);
                }
                if state.frames.len() < RING_CAPACITY {
                    state.frames.push_back(frame.take().expect("frame taken once"));
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Dequeue one frame, waiting while the ring is empty.
    ///
    /// Returns `None` once the ring is empty and shut down.
    pub async fn consume(&self) -> Option<Bytes> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut state = self.state.lock().expect("ring lock poisoned");
                if let Some(frame) = state.frames.pop_front() {
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Dequeue one frame without waiting
    pub fn try_consume(&self) -> Option<Bytes> {
        let frame = {
            let mut state = self.state.lock().expect("ring lock poisoned");
            state.frames.pop_front()
        };
        if frame.is_some() {
            self.not_full.notify_waiters();
        }
        frame
    }

    /// Drop every queued frame
    pub fn drain(&self) {
        {
            let mut state = self.state.lock().expect("ring lock poisoned");
            state.frames.clear();
        }
        self.not_full.notify_waiters();
    }

    /// Shut the ring down and wake all waiters. Queued frames stay readable
    /// through `consume` until drained.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().expect("ring lock poisoned");
            state.closed = true;
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }
}
