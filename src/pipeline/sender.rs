//! Sender: paced RTP transmit
//!
//! Emits one 40 ms frame every 40 ms of wall clock on average. The sender
//! keeps a small look-ahead (`advance`) between its deadline and the real
//! send time; the look-ahead adapts to recent send latency so jitter is
//! absorbed without accumulating into clock drift. Missed deadlines drop
//! their slots (timestamp jumps forward) instead of back-catching.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::pipeline::PipelineShared;
use crate::rtp::MediaStream;
use crate::types::PlayState;

/// Frame cadence
const FRAME_MS: u64 = 40;
const FRAME_US: u64 = FRAME_MS * 1000;

/// RTP timestamp ticks per frame (48 kHz * 40 ms)
const RTP_TICKS_PER_FRAME: u32 = 1920;

/// Look-ahead bounds and step, in frames
const MIN_ADVANCE: u64 = 2;
const MAX_ADVANCE: u64 = 4;
const STEP: u64 = 1;

/// Moving-average window over batch send durations
const AVG_WINDOW: usize = 5;

pub(crate) async fn run_sender(
    shared: Arc<PipelineShared>,
    mut stream: impl MediaStream,
    initial_timestamp: u32,
) {
    let mut timestamp = initial_timestamp;
    let mut frame_index: u64 = 0;
    let mut advance = MIN_ADVANCE;

    let mut durations_us = [0u64; AVG_WINDOW];
    let mut window_index = 0;
    let mut window_total: u64 = 0;
    let mut window_count = 0;

    let start_time = Instant::now();

    loop {
        if shared.stop.is_cancelled() && shared.ring.is_empty() {
            break;
        }

        // ===== Pause / ring-drop gates =====
        while shared.props.play_state() == PlayState::Paused {
            if shared.stop.is_cancelled() {
                break;
            }
            shared.props.state_update().reset();
            tokio::select! {
                () = shared.stop.cancelled() => {}
                () = shared.props.state_update().wait() => {}
            }
        }
        if shared.props.take_drop_ring() {
            debug!(stream = %shared.stream_id, "dropping queued frames");
            shared.ring.drain();
        }

        // ===== Deadline =====
        let elapsed_slots = Duration::from_millis(frame_index * FRAME_MS);
        let lead = Duration::from_millis(advance * FRAME_MS);
        let target = if elapsed_slots >= lead {
            start_time + (elapsed_slots - lead)
        } else {
            start_time
        };
        let now = Instant::now();
        if now < target {
            tokio::select! {
                () = shared.stop.cancelled() => {}
                () = tokio::time::sleep_until(target) => {}
            }
        } else {
            // Late: drop the missed slots rather than speeding up playback.
            let late_ms = now.duration_since(target).as_millis() as u64;
            let frames_late = late_ms / FRAME_MS;
            if frames_late > 0 {
                trace!(stream = %shared.stream_id, frames_late, "dropping missed slots");
                frame_index += frames_late;
                timestamp = timestamp.wrapping_add(frames_late as u32 * RTP_TICKS_PER_FRAME);
            }
        }

        // ===== Batch =====
        let available = shared.ring.len();
        let batch: Vec<bytes::Bytes> = if available == 0 {
            let Some(frame) = shared.ring.consume().await else {
                // Ring shut down while empty.
                break;
            };
            vec![frame]
        } else {
            let want = (advance as usize).min(available);
            let mut batch = Vec::with_capacity(want);
            for _ in 0..want {
                match shared.ring.try_consume() {
                    Some(frame) => batch.push(frame),
                    None => break,
                }
            }
            if batch.is_empty() {
                continue;
            }
            batch
        };

        // ===== Transmit =====
        let batch_len = batch.len();
        let send_start = Instant::now();
        for frame in batch {
            if let Err(e) = stream.push_frame(&frame, timestamp).await {
                error!(stream = %shared.stream_id, "push_frame failed: {e}");
            }
            // Advance unconditionally so cadence is preserved even across
            // send failures.
            timestamp = timestamp.wrapping_add(RTP_TICKS_PER_FRAME);
            frame_index += 1;
        }
        let batch_duration_us = send_start.elapsed().as_micros() as u64;

        // ===== Adapt the look-ahead =====
        if window_count < AVG_WINDOW {
            window_count += 1;
        } else {
            window_total -= durations_us[window_index];
        }
        durations_us[window_index] = batch_duration_us;
        window_total += batch_duration_us;
        window_index = (window_index + 1) % AVG_WINDOW;
        let average_us = window_total / window_count as u64;

        if average_us > FRAME_US * advance {
            advance = advance.saturating_sub(STEP).max(MIN_ADVANCE);
        } else if average_us < FRAME_US * (advance - STEP) {
            advance = (advance + STEP).min(MAX_ADVANCE);
        }
        advance = advance.clamp(MIN_ADVANCE, MAX_ADVANCE);

        trace!(
            stream = %shared.stream_id,
            batch = batch_len,
            advance,
            average_us,
            "batch sent"
        );
    }

    info!(stream = %shared.stream_id, "sender exited");
}
