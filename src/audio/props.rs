//! Per-running-task audio properties

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::sync::Signal;
use crate::types::PlayState;

use super::{AudioFormat, SampleEncoding};

/// Mutable audio state for the running task, shared by the producer,
/// consumer, sender and the control plane.
#[derive(Debug)]
pub struct AudioProps {
    inner: Mutex<PropsState>,
    /// One-shot: the sender drains the ring without emitting, then clears
    drop_ring: AtomicBool,
    /// Raised on play-state and volume changes so the sender re-checks
    state_update: Signal,
}

#[derive(Debug)]
struct PropsState {
    format: Option<AudioFormat>,
    current_samples: i64,
    total_samples: i64,
    play_state: PlayState,
    volume: f64,
}

/// Shared handle to the audio properties
pub type SharedProps = Arc<AudioProps>;

impl Default for AudioProps {
    fn default() -> Self {
        Self {
            inner: Mutex::new(PropsState {
                format: None,
                current_samples: 0,
                total_samples: 0,
                play_state: PlayState::Playing,
                volume: 1.0,
            }),
            drop_ring: AtomicBool::new(false),
            state_update: Signal::new(),
        }
    }
}

impl AudioProps {
    /// Create properties in their initial state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal raised on play-state and volume changes
    #[must_use]
    pub fn state_update(&self) -> &Signal {
        &self.state_update
    }

    /// Publish the resolved format for the current task
    pub fn set_format(&self, format: AudioFormat) {
        self.inner.lock().expect("props lock poisoned").format = Some(format);
    }

    /// Format of the current task, if resolved
    pub fn format(&self) -> Option<AudioFormat> {
        self.inner.lock().expect("props lock poisoned").format
    }

    /// Source sample rate, falling back to the target rate when unresolved
    pub fn sample_rate(&self) -> u32 {
        self.format()
            .map_or(super::TARGET_SAMPLE_RATE, |format| format.sample_rate)
    }

    /// Channel count, defaulting to stereo when unresolved
    pub fn channels(&self) -> usize {
        self.format().map_or(2, |format| format.channels)
    }

    /// Sample encoding tag
    pub fn encoding(&self) -> SampleEncoding {
        self.format().map_or_else(SampleEncoding::default, |format| format.encoding)
    }

    /// Samples decoded so far in the current task (per channel)
    pub fn current_samples(&self) -> i64 {
        self.inner
            .lock()
            .expect("props lock poisoned")
            .current_samples
    }

    /// Overwrite the decoded-sample counter (after a seek)
    pub fn set_current_samples(&self, samples: i64) {
        self.inner
            .lock()
            .expect("props lock poisoned")
            .current_samples = samples;
    }

    /// Add decoded samples (per channel)
    pub fn add_samples(&self, samples: i64) {
        self.inner
            .lock()
            .expect("props lock poisoned")
            .current_samples += samples;
    }

    /// Total samples of the current task, 0 while unknown
    pub fn total_samples(&self) -> i64 {
        self.inner.lock().expect("props lock poisoned").total_samples
    }

    /// Publish the total sample count once the download has finished
    pub fn set_total_samples(&self, samples: i64) {
        self.inner
            .lock()
            .expect("props lock poisoned")
            .total_samples = samples;
    }

    /// Current playback state
    pub fn play_state(&self) -> PlayState {
        self.inner.lock().expect("props lock poisoned").play_state
    }

    /// Switch playback state and wake the sender
    pub fn set_play_state(&self, state: PlayState) {
        self.inner.lock().expect("props lock poisoned").play_state = state;
        self.state_update.set();
    }

    /// Current volume
    pub fn volume(&self) -> f64 {
        self.inner.lock().expect("props lock poisoned").volume
    }

    /// Set the volume, rounded to 0.01
    pub fn set_volume(&self, volume: f64) {
        let rounded = (volume.max(0.0) * 100.0).round() / 100.0;
        self.inner.lock().expect("props lock poisoned").volume = rounded;
        self.state_update.set();
    }

    /// Arm the one-shot ring drop
    pub fn request_drop_ring(&self) {
        self.drop_ring.store(true, Ordering::Release);
        self.state_update.set();
    }

    /// Consume the ring-drop request, returning whether it was armed
    pub fn take_drop_ring(&self) -> bool {
        self.drop_ring.swap(false, Ordering::AcqRel)
    }

    /// Clear everything task-scoped at retirement. Play state and volume are
    /// stream-scoped and survive.
    pub fn reset_task(&self) {
        let mut state = self.inner.lock().expect("props lock poisoned");
        state.format = None;
        state.current_samples = 0;
        state.total_samples = 0;
    }
}
