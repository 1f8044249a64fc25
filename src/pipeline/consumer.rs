//! Consumer: decode, convert, resample, apply volume, encode
//!
//! One pull equals one decoder read, not one PCM frame. Decoded bytes are
//! converted by their encoding tag, brought to 48 kHz, scaled by the
//! volume, carved into 40 ms Opus frames through an explicit carry buffer,
//! and produced into the ring.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::audio::convert::{
    apply_volume_i16, f32_from_bytes, f32_to_i16_with_volume, i16_bytes_to_f32, i16_from_bytes,
    i32_bytes_to_f32,
};
use crate::audio::{AudioFormat, Resampler, SampleEncoding, FRAME_SAMPLES, TARGET_SAMPLE_RATE};
use crate::decode::DecodeRead;
use crate::error::{ReadError, ReadErrorKind, StreamError};
use crate::pipeline::PipelineShared;

/// Worst-case bytes per decoder pull
const MAX_DECODE_SIZE: usize = 73_728;

/// Worst-case PCM scratch in bytes
const MAX_PCM_SIZE: usize = 131_072;

/// Upper bound for one encoded Opus frame
const MAX_OPUS_FRAME: usize = 4000;

pub(crate) async fn run_consumer(shared: Arc<PipelineShared>) {
    // Hot buffers, allocated once for the life of the consumer.
    let mut decode_buf = vec![0u8; MAX_DECODE_SIZE];
    let mut f32_scratch: Vec<f32> = Vec::with_capacity(MAX_PCM_SIZE / 4);
    let mut resampled: Vec<f32> = Vec::with_capacity(MAX_PCM_SIZE / 4);
    let mut pcm: Vec<i16> = Vec::with_capacity(MAX_PCM_SIZE / 2);

    let mut framer: Option<OpusFramer> = None;
    let mut resampler: Option<Resampler> = None;
    let mut active_format: Option<AudioFormat> = None;

    loop {
        tokio::select! {
            () = shared.stop.cancelled() => break,
            () = shared.feed_decoder.wait() => {}
        }
        if shared.stop.is_cancelled() {
            break;
        }

        // One decoder pull under the decoder lock; conversion and encoding
        // run without it.
        let outcome = {
            let mut slot = shared.decoder.lock().expect("decoder lock poisoned");
            let Some(decoder) = slot.as_mut() else {
                shared.feed_decoder.reset();
                continue;
            };
            decoder.read(&mut decode_buf)
        };

        let (bytes_read, format_changed) = match outcome {
            Ok(DecodeRead::Pcm(n)) => (n, false),
            Ok(DecodeRead::NewFormat(n)) => (n, true),
            Ok(DecodeRead::Done) => {
                debug!(stream = %shared.stream_id, "source drained");
                shared.feed_decoder.reset();
                shared.read_done.set();
                framer = None;
                resampler = None;
                active_format = None;
                tokio::task::yield_now().await;
                continue;
            }
            Ok(DecodeRead::NeedMore) => {
                shared.feed_decoder.reset();
                // Reception may be parked on the backlog threshold.
                if let Some(task) = shared.current_task() {
                    task.resume_recv.notify_one();
                }
                continue;
            }
            Err(e) => {
                error!(stream = %shared.stream_id, "decoder failed: {e}");
                if let Some(task) = shared.current_task() {
                    task.record_read_error(ReadError::new(ReadErrorKind::DecoderError, e.to_string()));
                    task.mark_skip();
                }
                shared.feed_decoder.reset();
                shared.read_done.set();
                continue;
            }
        };
        if bytes_read == 0 {
            continue;
        }

        let Some(format) = current_format(&shared, format_changed) else {
            continue;
        };
        if active_format != Some(format) {
            // First frame of a cycle or a mid-stream parameter change:
            // rebuild the conversion chain.
            if format_changed {
                info!(
                    stream = %shared.stream_id,
                    rate = format.sample_rate,
                    channels = format.channels,
                    "re-publishing stream parameters"
                );
                shared.props.set_format(format);
                shared.publish_stream_event();
            }
            resampler = match build_resampler(&format) {
                Ok(resampler) => resampler,
                Err(e) => {
                    warn!(stream = %shared.stream_id, "resampler unavailable: {e}");
                    continue;
                }
            };
            framer = match OpusFramer::new(format.channels, shared.bitrate) {
                Ok(framer) => Some(framer),
                Err(e) => {
                    error!(stream = %shared.stream_id, "opus encoder unavailable: {e}");
                    continue;
                }
            };
            active_format = Some(format);
        }

        let volume = shared.props.volume() as f32;
        let samples_bytes = &decode_buf[..bytes_read];
        let sample_count = bytes_read / format.encoding.bytes_per_sample();
        shared
            .props
            .add_samples((sample_count / format.channels.max(1)) as i64);

        // Convert by encoding tag; volume lands exactly once per frame.
        let converted = convert(
            samples_bytes,
            &format,
            resampler.as_mut(),
            volume,
            &mut f32_scratch,
            &mut resampled,
            &mut pcm,
        );
        match converted {
            Ok(()) => {}
            Err(e) => {
                // Skip this PCM run and keep decoding.
                warn!(stream = %shared.stream_id, "conversion failed: {e}");
                continue;
            }
        }

        let Some(framer) = framer.as_mut() else {
            continue;
        };
        let mut frames: Vec<Bytes> = Vec::new();
        framer.push(&pcm, &mut frames);
        for frame in frames {
            if shared.ring.produce(frame).await.is_err() {
                info!(stream = %shared.stream_id, "ring shut down, consumer exiting");
                return;
            }
        }
    }

    shared.ring.shutdown();
    info!(stream = %shared.stream_id, "consumer exited");
}

fn current_format(shared: &PipelineShared, refresh: bool) -> Option<AudioFormat> {
    if refresh {
        let slot = shared.decoder.lock().expect("decoder lock poisoned");
        return slot.as_ref().and_then(|decoder| decoder.format());
    }
    shared.props.format()
}

fn build_resampler(format: &AudioFormat) -> Result<Option<Resampler>, StreamError> {
    if format.sample_rate == TARGET_SAMPLE_RATE {
        return Ok(None);
    }
    Resampler::new(format.sample_rate, format.channels).map(Some)
}

/// Convert one decoded run into 48 kHz i16 PCM in `pcm`
fn convert(
    input: &[u8],
    format: &AudioFormat,
    resampler: Option<&mut Resampler>,
    volume: f32,
    f32_scratch: &mut Vec<f32>,
    resampled: &mut Vec<f32>,
    pcm: &mut Vec<i16>,
) -> Result<(), StreamError> {
    match (format.encoding, resampler) {
        (SampleEncoding::S16, None) => {
            // Pass through; dedicated volume kernel.
            i16_from_bytes(input, pcm);
            apply_volume_i16(pcm, volume);
        }
        (SampleEncoding::S16, Some(resampler)) => {
            i16_bytes_to_f32(input, f32_scratch);
            resampled.clear();
            resampler.process(f32_scratch, resampled)?;
            f32_to_i16_with_volume(resampled, pcm, volume);
        }
        (SampleEncoding::S32, None) => {
            i32_bytes_to_f32(input, f32_scratch);
            f32_to_i16_with_volume(f32_scratch, pcm, volume);
        }
        (SampleEncoding::S32, Some(resampler)) => {
            i32_bytes_to_f32(input, f32_scratch);
            resampled.clear();
            resampler.process(f32_scratch, resampled)?;
            f32_to_i16_with_volume(resampled, pcm, volume);
        }
        (SampleEncoding::F32 | SampleEncoding::F32P, None) => {
            f32_from_bytes(input, f32_scratch);
            f32_to_i16_with_volume(f32_scratch, pcm, volume);
        }
        (SampleEncoding::F32 | SampleEncoding::F32P, Some(resampler)) => {
            f32_from_bytes(input, f32_scratch);
            resampled.clear();
            resampler.process(f32_scratch, resampled)?;
            f32_to_i16_with_volume(resampled, pcm, volume);
        }
    }
    Ok(())
}

/// Carves i16 PCM into 40 ms Opus frames with an explicit carry buffer for
/// samples that straddle a frame boundary.
pub(crate) struct OpusFramer {
    encoder: opus::Encoder,
    channels: usize,
    carry: Vec<i16>,
    encode_buf: Vec<u8>,
}

impl OpusFramer {
    pub(crate) fn new(channels: usize, bitrate: u32) -> Result<Self, StreamError> {
        let opus_channels = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            other => {
                return Err(StreamError::Encoder {
                    message: format!("{other} channels not encodable"),
                })
            }
        };
        let mut encoder =
            opus::Encoder::new(TARGET_SAMPLE_RATE, opus_channels, opus::Application::Audio)
                .map_err(encoder_error)?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(encoder_error)?;
        encoder.set_vbr(true).map_err(encoder_error)?;
        encoder.set_vbr_constraint(true).map_err(encoder_error)?;
        encoder.set_inband_fec(false).map_err(encoder_error)?;

        let frame_len = FRAME_SAMPLES * channels;
        Ok(Self {
            encoder,
            channels,
            carry: Vec::with_capacity(frame_len),
            encode_buf: vec![0u8; MAX_OPUS_FRAME],
        })
    }

    /// Feed PCM; every completed 40 ms frame is encoded and appended to
    /// `frames`. A failed encode drops that frame and keeps going.
    pub(crate) fn push(&mut self, pcm: &[i16], frames: &mut Vec<Bytes>) {
        let frame_len = FRAME_SAMPLES * self.channels;
        let mut input = pcm;

        // Top up the carry first so straddling samples stay in order.
        if !self.carry.is_empty() {
            let needed = frame_len - self.carry.len();
            let take = needed.min(input.len());
            self.carry.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.carry.len() < frame_len {
                return;
            }
            let carry = std::mem::take(&mut self.carry);
            self.encode_frame(&carry, frames);
            self.carry = carry;
            self.carry.clear();
        }

        let mut chunks = input.chunks_exact(frame_len);
        for frame in chunks.by_ref() {
            self.encode_frame(frame, frames);
        }
        self.carry.extend_from_slice(chunks.remainder());
    }

    /// Straddling samples waiting for the next push
    #[cfg(test)]
    pub(crate) fn carried(&self) -> usize {
        self.carry.len()
    }

    fn encode_frame(&mut self, frame: &[i16], frames: &mut Vec<Bytes>) {
        match self.encoder.encode(frame, &mut self.encode_buf) {
            Ok(len) => frames.push(Bytes::copy_from_slice(&self.encode_buf[..len])),
            Err(e) => warn!("opus encode failed, dropping frame: {e}"),
        }
    }
}

fn encoder_error(e: opus::Error) -> StreamError {
    StreamError::Encoder {
        message: e.to_string(),
    }
}
