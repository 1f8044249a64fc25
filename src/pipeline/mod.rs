//! Per-stream pipeline
//!
//! A [`StreamInstance`] owns one play list, one RTP destination, and one
//! active task at a time. Four cooperative tasks drive it: the fetcher
//! (download), the producer (task lifecycle), the consumer
//! (decode/convert/encode) and the sender (paced RTP transmit), wired by
//! the shared context in [`PipelineShared`].

mod consumer;
mod producer;
mod ring;
mod sender;
mod task;

#[cfg(test)]
mod tests;

pub use ring::{FrameRing, RingClosed, RING_CAPACITY};
pub use task::{RunningTask, TaskPhase};

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audio::props::{AudioProps, SharedProps};
use crate::config::Config;
use crate::decode::Decoder;
use crate::error::{Result, StreamError};
use crate::fetch;
use crate::http::HttpDriver;
use crate::playlist::Playlist;
use crate::rtp::RtpSession;
use crate::sync::Signal;
use crate::types::{PlayMode, PlayState, StreamDestination, TaskItem};

/// Server-pushed notification raised by an instance
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Stream state changed (format, totals, play state, volume, seek)
    Stream {
        /// Originating stream
        stream_id: String,
    },
    /// The play list changed
    Playlist {
        /// Originating stream
        stream_id: String,
    },
    /// The instance halted and left the registry
    Removed {
        /// Originating stream
        stream_id: String,
    },
}

/// Snapshot returned by `get_stream`
#[derive(Debug, Clone)]
pub struct StreamStatus {
    /// The task currently running, if any
    pub current_play: Option<TaskItem>,
    /// Milliseconds decoded so far
    pub time_played_ms: i64,
    /// Total milliseconds, 0 while unknown
    pub time_total_ms: i64,
    /// Playback state
    pub play_state: PlayState,
    /// Volume
    pub volume: f64,
    /// Play-list mode
    pub play_mode: PlayMode,
}

/// State shared by the pipeline tasks of one instance
pub(crate) struct PipelineShared {
    pub stream_id: String,
    pub playlist: Arc<Playlist>,
    pub props: SharedProps,
    pub ring: Arc<FrameRing>,
    pub stop: CancellationToken,
    pub driver: Arc<HttpDriver>,
    /// The running task of the active cycle
    pub current: Mutex<Option<Arc<RunningTask>>>,
    /// The decoder chosen by the producer for the active cycle
    pub decoder: Mutex<Option<Box<dyn Decoder>>>,
    /// Fetcher -> producer: a fresh cycle is available
    pub new_download: Signal,
    /// Producer -> consumer: bytes are ready to decode
    pub feed_decoder: Signal,
    /// Consumer -> producer: the source has drained for this cycle
    pub read_done: Signal,
    pub events: broadcast::Sender<EngineEvent>,
    /// Target bitrate from the channel description
    pub bitrate: u32,
}

impl PipelineShared {
    pub fn current_task(&self) -> Option<Arc<RunningTask>> {
        self.current.lock().expect("current task lock poisoned").clone()
    }

    pub fn set_current(&self, task: Arc<RunningTask>) {
        *self.current.lock().expect("current task lock poisoned") = Some(task);
    }

    /// Flush the active cycle: the producer runs unobstructed to retirement
    /// and the fetcher's transfer is cancelled.
    pub fn do_skip(&self) -> bool {
        let Some(task) = self.current_task() else {
            return false;
        };
        info!(stream = %self.stream_id, task = %task.item.name, "skip requested");
        task.mark_flushed();
        if let Some(handle) = task.take_transfer() {
            self.driver.cancel(handle);
        }
        task.set_phase(TaskPhase::DownloadAndWriteFinished);
        self.feed_decoder.reset();
        self.read_done.set();
        true
    }

    pub fn publish_stream_event(&self) {
        let _ = self.events.send(EngineEvent::Stream {
            stream_id: self.stream_id.clone(),
        });
    }

    pub fn publish_playlist_event(&self) {
        let _ = self.events.send(EngineEvent::Playlist {
            stream_id: self.stream_id.clone(),
        });
    }
}

/// A per-destination stream pipeline
pub struct StreamInstance {
    shared: Arc<PipelineShared>,
}

impl StreamInstance {
    /// Create the RTP session, install the initial play list, and spawn the
    /// pipeline tasks.
    ///
    /// `halt_tx` receives the stream id when the instance stops, so the
    /// registry can drop it.
    ///
    /// # Errors
    ///
    /// Returns an error when the RTP session cannot be created.
    pub async fn start(
        stream_id: String,
        destination: StreamDestination,
        initial: Vec<TaskItem>,
        driver: Arc<HttpDriver>,
        config: &Config,
        events: broadcast::Sender<EngineEvent>,
        halt_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Arc<Self>> {
        let session = RtpSession::connect(&destination).await?;

        let playlist = Arc::new(Playlist::new(PlayMode::default()));
        let order: Vec<String> = initial.iter().map(|task| task.name.clone()).collect();
        if !playlist.update(initial, order) {
            return Err(StreamError::Rejected {
                message: "initial play list contains duplicate or dangling names".to_string(),
            });
        }

        let shared = Arc::new(PipelineShared {
            stream_id: stream_id.clone(),
            playlist,
            props: Arc::new(AudioProps::new()),
            ring: Arc::new(FrameRing::new()),
            stop: CancellationToken::new(),
            driver,
            current: Mutex::new(None),
            decoder: Mutex::new(None),
            new_download: Signal::new(),
            feed_decoder: Signal::new(),
            read_done: Signal::new(),
            events,
            bitrate: destination.bitrate,
        });

        tokio::spawn(fetch::run_fetcher(
            Arc::clone(&shared),
            config.default_buffer_size,
        ));
        tokio::spawn(producer::run_producer(Arc::clone(&shared)));
        tokio::spawn(consumer::run_consumer(Arc::clone(&shared)));
        tokio::spawn(sender::run_sender(
            Arc::clone(&shared),
            session,
            RtpSession::initial_timestamp(),
        ));

        // Registry eviction once the stop token fires, whether from the
        // control plane or the instance's own error threshold.
        let watch_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            watch_shared.stop.cancelled().await;
            let _ = halt_tx.send(watch_shared.stream_id.clone());
            let _ = watch_shared.events.send(EngineEvent::Removed {
                stream_id: watch_shared.stream_id.clone(),
            });
        });

        info!(stream = %stream_id, "instance started");
        Ok(Arc::new(Self { shared }))
    }

    /// Stream id of this instance
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.shared.stream_id
    }

    /// Play list of this instance
    #[must_use]
    pub fn playlist(&self) -> &Playlist {
        &self.shared.playlist
    }

    /// Stop the instance: cancel the in-flight transfer, unblock every
    /// waiter, and shut the ring down. Idempotent and asynchronous; the
    /// pipeline tasks wind down on their own.
    pub fn stop(&self) {
        let shared = &self.shared;
        if shared.stop.is_cancelled() {
            return;
        }
        info!(stream = %shared.stream_id, "stopping instance");
        shared.stop.cancel();
        if let Some(task) = shared.current_task() {
            if let Some(handle) = task.take_transfer() {
                shared.driver.cancel(handle);
            }
            task.download_finished.complete();
            task.read_finished.complete();
        }
        shared.new_download.set();
        shared.feed_decoder.set();
        shared.read_done.set();
        shared.playlist.task_update().set();
        shared.props.state_update().set();
        shared.ring.shutdown();
    }

    /// Whether `stop` has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_cancelled()
    }

    /// Atomic play-list replace; see [`Playlist::update`]
    pub fn update_playlist(&self, tasks: Vec<TaskItem>, order: Vec<String>) -> Result<()> {
        if self.shared.playlist.update(tasks, order) {
            self.shared.publish_playlist_event();
            Ok(())
        } else {
            Err(StreamError::Rejected {
                message: "order references a task that does not exist".to_string(),
            })
        }
    }

    /// Seek within the current task and drop queued frames once
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let mut decoder = self.shared.decoder.lock().expect("decoder lock poisoned");
        let Some(decoder) = decoder.as_mut() else {
            return Err(StreamError::Rejected {
                message: "no active task to seek".to_string(),
            });
        };
        decoder.seek(seconds)?;
        self.shared.props.set_current_samples(decoder.current_samples());
        // One-shot: the sender drains queued frames before the next send.
        self.shared.props.request_drop_ring();
        self.shared.publish_stream_event();
        Ok(())
    }

    /// Absolute and/or relative skip, then flush the current cycle
    pub fn skip(&self, next: Option<&str>, offset: i32) -> Result<()> {
        if let Some(name) = next {
            if !self.shared.playlist.skip_to(name) {
                return Err(StreamError::Rejected {
                    message: format!("unknown task {name}"),
                });
            }
        }
        if offset != 0 && !self.shared.playlist.skip_relative(offset) {
            return Err(StreamError::Rejected {
                message: "play list is empty".to_string(),
            });
        }
        self.shared.do_skip();
        self.shared.publish_stream_event();
        Ok(())
    }

    /// Switch between playing and paused
    pub fn set_play_state(&self, state: PlayState) {
        self.shared.props.set_play_state(state);
        self.shared.publish_stream_event();
    }

    /// Switch the play-list mode
    pub fn set_play_mode(&self, mode: PlayMode) {
        self.shared.playlist.set_mode(mode);
        self.shared.publish_stream_event();
    }

    /// Set the volume (rounded to 0.01)
    pub fn set_volume(&self, volume: f64) {
        self.shared.props.set_volume(volume);
        self.shared.publish_stream_event();
    }

    /// Snapshot for `get_stream`
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        let props = &self.shared.props;
        let rate = i64::from(props.sample_rate().max(1));
        StreamStatus {
            current_play: self.shared.current_task().map(|task| task.item.clone()),
            time_played_ms: props.current_samples() * 1000 / rate,
            time_total_ms: props.total_samples() * 1000 / rate,
            play_state: props.play_state(),
            volume: props.volume(),
            play_mode: self.shared.playlist.mode(),
        }
    }
}
