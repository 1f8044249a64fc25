use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::audio::props::AudioProps;
use crate::buffer::{ByteSource, FixedBuffer};
use crate::error::StreamError;
use crate::http::HttpDriver;
use crate::pipeline::consumer::OpusFramer;
use crate::pipeline::*;
use crate::playlist::Playlist;
use crate::rtp::MediaStream;
use crate::sync::Signal;
use crate::types::{PlayMode, PlayState, TaskItem};

// ===== Ring =====

#[tokio::test]
async fn test_ring_fifo_order() {
    let ring = FrameRing::new();
    for i in 0..5u8 {
        ring.produce(Bytes::from(vec![i])).await.unwrap();
    }
    for i in 0..5u8 {
        assert_eq!(ring.consume().await.unwrap()[0], i);
    }
}

#[tokio::test]
async fn test_ring_blocks_producer_at_capacity() {
    let ring = Arc::new(FrameRing::new());
    for _ in 0..RING_CAPACITY {
        ring.produce(Bytes::from_static(b"x")).await.unwrap();
    }
    assert_eq!(ring.len(), RING_CAPACITY);

    let blocked = Arc::clone(&ring);
    let producer = tokio::spawn(async move { blocked.produce(Bytes::from_static(b"y")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished(), "producer must block on a full ring");

    // One consume unblocks it; nothing was dropped.
    ring.consume().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), producer)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ring.len(), RING_CAPACITY);
}

#[tokio::test]
async fn test_ring_blocks_consumer_when_empty() {
    let ring = Arc::new(FrameRing::new());
    let waiting = Arc::clone(&ring);
    let consumer = tokio::spawn(async move { waiting.consume().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!consumer.is_finished(), "consumer must block on an empty ring");

    ring.produce(Bytes::from_static(b"z")).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.unwrap(), Bytes::from_static(b"z"));
}

#[tokio::test]
async fn test_ring_shutdown_wakes_everyone() {
    let ring = Arc::new(FrameRing::new());
    let waiting = Arc::clone(&ring);
    let consumer = tokio::spawn(async move { waiting.consume().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    ring.shutdown();
    let frame = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .unwrap()
        .unwrap();
    assert!(frame.is_none());
    assert!(ring.produce(Bytes::from_static(b"x")).await.is_err());
}

#[tokio::test]
async fn test_ring_drains_queued_frames_after_shutdown() {
    let ring = FrameRing::new();
    ring.produce(Bytes::from_static(b"a")).await.unwrap();
    ring.shutdown();
    // Queued frames stay readable; then the closed ring reports None.
    assert!(ring.consume().await.is_some());
    assert!(ring.consume().await.is_none());
}

// ===== Opus framer =====

#[test]
fn test_framer_carries_partial_frames() {
    let mut framer = OpusFramer::new(2, 96_000).unwrap();
    let mut frames = Vec::new();

    // 1000 samples is well short of the 3840 a stereo frame needs.
    framer.push(&vec![0i16; 1000], &mut frames);
    assert!(frames.is_empty());
    assert_eq!(framer.carried(), 1000);

    // Completing the frame flushes exactly one and restarts the carry.
    framer.push(&vec![0i16; 2840], &mut frames);
    assert_eq!(frames.len(), 1);
    assert_eq!(framer.carried(), 0);
}

#[test]
fn test_framer_emits_whole_frames() {
    let mut framer = OpusFramer::new(1, 64_000).unwrap();
    let mut frames = Vec::new();
    // Mono frame is 1920 samples; 2.5 frames in one push.
    framer.push(&vec![0i16; 4800], &mut frames);
    assert_eq!(frames.len(), 2);
    assert_eq!(framer.carried(), 960);
    for frame in &frames {
        assert!(!frame.is_empty());
        assert!(frame.len() <= 4000);
    }
}

#[test]
fn test_framer_rejects_unencodable_channel_count() {
    assert!(matches!(
        OpusFramer::new(6, 96_000),
        Err(StreamError::Encoder { .. })
    ));
}

// ===== Sender =====

#[derive(Clone)]
struct MockStream {
    sent: Arc<Mutex<Vec<u32>>>,
    fail: bool,
}

#[async_trait]
impl MediaStream for MockStream {
    async fn push_frame(&mut self, _payload: &[u8], timestamp: u32) -> Result<()> {
        self.sent.lock().unwrap().push(timestamp);
        if self.fail {
            return Err(StreamError::Send {
                message: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

fn test_shared(driver: Arc<HttpDriver>) -> Arc<PipelineShared> {
    let (events, _) = broadcast::channel(16);
    Arc::new(PipelineShared {
        stream_id: "test".to_string(),
        playlist: Arc::new(Playlist::new(PlayMode::Fifo)),
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
        bitrate: 96_000,
    })
}

async fn run_sender_over(
    shared: &Arc<PipelineShared>,
    frames: usize,
    fail: bool,
) -> Vec<u32> {
    for _ in 0..frames {
        shared.ring.produce(Bytes::from_static(&[1, 2, 3])).await.unwrap();
    }
    let sent = Arc::new(Mutex::new(Vec::new()));
    let stream = MockStream {
        sent: Arc::clone(&sent),
        fail,
    };
    let sender = tokio::spawn(crate::pipeline::sender::run_sender(
        Arc::clone(shared),
        stream,
        1000,
    ));

    // Let the cadence play out, then stop.
    tokio::time::sleep(Duration::from_secs(2)).await;
    shared.stop.cancel();
    shared.ring.shutdown();
    shared.props.state_update().set();
    tokio::time::timeout(Duration::from_secs(5), sender)
        .await
        .expect("sender must exit after shutdown")
        .unwrap();
    let timestamps = sent.lock().unwrap().clone();
    timestamps
}

#[tokio::test(start_paused = true)]
async fn test_sender_timestamps_step_by_whole_frames() {
    let driver = Arc::new(HttpDriver::start(1).unwrap());
    let shared = test_shared(Arc::clone(&driver));

    let sent = run_sender_over(&shared, 10, false).await;
    assert_eq!(sent.len(), 10);
    // The first slot may jump by the startup lead, but always by whole
    // frames from the session's initial timestamp.
    assert_eq!(sent[0].wrapping_sub(1000) % 1920, 0);
    for pair in sent.windows(2) {
        let step = pair[1].wrapping_sub(pair[0]);
        assert!(step >= 1920, "timestamps must be strictly increasing");
        assert_eq!(step % 1920, 0, "steps are whole frame slots");
    }
}

#[tokio::test(start_paused = true)]
async fn test_sender_timestamp_advances_across_send_failures() {
    let driver = Arc::new(HttpDriver::start(1).unwrap());
    let shared = test_shared(Arc::clone(&driver));

    let sent = run_sender_over(&shared, 5, true).await;
    // Every frame was attempted and cadence was preserved regardless.
    assert_eq!(sent.len(), 5);
    for pair in sent.windows(2) {
        assert_eq!(pair[1].wrapping_sub(pair[0]) % 1920, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_sender_pause_gates_all_frames() {
    let driver = Arc::new(HttpDriver::start(1).unwrap());
    let shared = test_shared(Arc::clone(&driver));
    shared.props.set_play_state(PlayState::Paused);
    shared.props.state_update().reset();

    for _ in 0..5 {
        shared.ring.produce(Bytes::from_static(&[9])).await.unwrap();
    }
    let sent = Arc::new(Mutex::new(Vec::new()));
    let stream = MockStream {
        sent: Arc::clone(&sent),
        fail: false,
    };
    let sender = tokio::spawn(crate::pipeline::sender::run_sender(
        Arc::clone(&shared),
        stream,
        0,
    ));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sent.lock().unwrap().is_empty(), "paused stream must emit nothing");

    // Resume and let it drain.
    shared.props.set_play_state(PlayState::Playing);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sent.lock().unwrap().len(), 5);

    shared.stop.cancel();
    shared.ring.shutdown();
    shared.props.state_update().set();
    let _ = tokio::time::timeout(Duration::from_secs(5), sender).await;
}

#[tokio::test(start_paused = true)]
async fn test_sender_drop_ring_discards_queued_frames_once() {
    let driver = Arc::new(HttpDriver::start(1).unwrap());
    let shared = test_shared(Arc::clone(&driver));

    for _ in 0..5 {
        shared.ring.produce(Bytes::from_static(&[7])).await.unwrap();
    }
    shared.props.request_drop_ring();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let stream = MockStream {
        sent: Arc::clone(&sent),
        fail: false,
    };
    let sender = tokio::spawn(crate::pipeline::sender::run_sender(
        Arc::clone(&shared),
        stream,
        0,
    ));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(sent.lock().unwrap().is_empty(), "queued frames were dropped");

    // New frames flow normally afterwards.
    shared.ring.produce(Bytes::from_static(&[8])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);

    shared.stop.cancel();
    shared.ring.shutdown();
    shared.props.state_update().set();
    let _ = tokio::time::timeout(Duration::from_secs(5), sender).await;
}

// ===== Skip handshake =====

#[tokio::test]
async fn test_do_skip_flushes_cycle() {
    let driver = Arc::new(HttpDriver::start(1).unwrap());
    let shared = test_shared(driver);

    assert!(!shared.do_skip(), "no running task yet");

    let running = RunningTask::new(
        TaskItem::file("t1", "http://host/a.mp3"),
        ByteSource::Fixed(FixedBuffer::new(1024)),
    );
    shared.set_current(Arc::clone(&running));
    shared.feed_decoder.set();

    assert!(shared.do_skip());
    assert!(running.is_flushed());
    // A manual flush is not an error skip.
    assert!(!running.should_skip());
    assert_eq!(running.phase(), TaskPhase::DownloadAndWriteFinished);
    assert!(shared.read_done.is_set());
    assert!(!shared.feed_decoder.is_set());
}

#[test]
fn test_task_phase_never_regresses() {
    let running = RunningTask::new(
        TaskItem::file("t1", "http://host/a.mp3"),
        ByteSource::Fixed(FixedBuffer::new(16)),
    );
    running.set_phase(TaskPhase::DrainFinished);
    running.set_phase(TaskPhase::Downloading);
    assert_eq!(running.phase(), TaskPhase::DrainFinished);
}
