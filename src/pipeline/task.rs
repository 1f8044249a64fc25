//! Per-cycle running task record

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::buffer::{ByteSource, SharedByteSource};
use crate::error::ReadError;
use crate::http::TransferHandle;
use crate::sync::Completion;
use crate::types::TaskItem;

/// Lifecycle phase of a running task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPhase {
    /// The fetcher is still writing bytes
    Downloading,
    /// Every byte has landed in the byte source
    DownloadAndWriteFinished,
    /// The decoder has consumed the source to the end
    DrainFinished,
}

/// State of one task cycle, created by the fetcher, driven by the producer
/// and consumer, destroyed after both completion tokens have fired.
pub struct RunningTask {
    /// The play-list record this cycle runs
    pub item: TaskItem,
    /// The byte source the fetcher fills and the decoder drains
    pub source: SharedByteSource,
    phase: Mutex<TaskPhase>,
    /// Fires when the download (and final write) has completed or failed
    pub download_finished: Completion,
    /// Fires when the producer has observed the drain and retired the cycle
    pub read_finished: Completion,
    read_error: Mutex<Option<ReadError>>,
    should_skip: AtomicBool,
    flushed: AtomicBool,
    total_bytes: AtomicU64,
    /// Wakes a paused fetcher reception (the consumer pokes this when it
    /// next needs bytes)
    pub resume_recv: Arc<Notify>,
    transfer: Mutex<Option<TransferHandle>>,
}

impl RunningTask {
    /// Create a fresh cycle over the given byte source
    #[must_use]
    pub fn new(item: TaskItem, source: ByteSource) -> Arc<Self> {
        Arc::new(Self {
            item,
            source: source.into_shared(),
            phase: Mutex::new(TaskPhase::Downloading),
            download_finished: Completion::new(),
            read_finished: Completion::new(),
            read_error: Mutex::new(None),
            should_skip: AtomicBool::new(false),
            flushed: AtomicBool::new(false),
            total_bytes: AtomicU64::new(0),
            resume_recv: Arc::new(Notify::new()),
            transfer: Mutex::new(None),
        })
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> TaskPhase {
        *self.phase.lock().expect("task lock poisoned")
    }

    /// Advance the lifecycle phase (never backwards)
    pub fn set_phase(&self, phase: TaskPhase) {
        let mut current = self.phase.lock().expect("task lock poisoned");
        if phase > *current {
            *current = phase;
        }
    }

    /// Record a read error for this cycle; the first one wins
    pub fn record_read_error(&self, error: ReadError) {
        let mut slot = self.read_error.lock().expect("task lock poisoned");
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// The recorded read error, if any
    pub fn read_error(&self) -> Option<ReadError> {
        self.read_error.lock().expect("task lock poisoned").clone()
    }

    /// Mark the cycle as failed; counts toward the instance's error
    /// threshold
    pub fn mark_skip(&self) {
        self.should_skip.store(true, Ordering::Release);
    }

    /// Whether the cycle failed and must be skipped
    pub fn should_skip(&self) -> bool {
        self.should_skip.load(Ordering::Acquire)
    }

    /// Mark the cycle as deliberately flushed (manual skip); does not count
    /// as an error
    pub fn mark_flushed(&self) {
        self.flushed.store(true, Ordering::Release);
    }

    /// Whether the cycle is being flushed
    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }

    /// Whether the pipeline should stop driving this cycle forward
    pub fn is_winding_down(&self) -> bool {
        self.should_skip() || self.is_flushed()
    }

    /// Add received bytes to the cumulative counter
    pub fn add_bytes(&self, n: u64) {
        self.total_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Cumulative bytes received (staging included)
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Attach the in-flight HTTP transfer
    pub fn set_transfer(&self, handle: TransferHandle) {
        *self.transfer.lock().expect("task lock poisoned") = Some(handle);
    }

    /// Detach the in-flight HTTP transfer, if still attached
    pub fn take_transfer(&self) -> Option<TransferHandle> {
        self.transfer.lock().expect("task lock poisoned").take()
    }
}

impl std::fmt::Debug for RunningTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningTask")
            .field("task", &self.item.name)
            .field("phase", &self.phase())
            .field("should_skip", &self.should_skip())
            .field("total_bytes", &self.total_bytes())
            .finish()
    }
}
