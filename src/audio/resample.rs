//! Sample rate conversion to the 48 kHz target
//!
//! Wraps an FFT fixed-chunk resampler. Input arrives as interleaved f32 in
//! arbitrary lengths; whole chunks are converted as soon as the accumulator
//! fills, anything shorter waits for the next feed. Channel count is
//! preserved.

use rubato::{FftFixedInOut, Resampler as _};

use crate::error::StreamError;

use super::TARGET_SAMPLE_RATE;

const CHUNK_FRAMES: usize = 1024;

/// Interleaved-in / interleaved-out resampler to 48 kHz
pub struct Resampler {
    inner: FftFixedInOut<f32>,
    in_buf: ChannelBuffer,
    out_buf: Vec<Vec<f32>>,
    channels: usize,
}

impl Resampler {
    /// Create a resampler from `input_rate` to 48 kHz for `channels`
    pub fn new(input_rate: u32, channels: usize) -> Result<Self, StreamError> {
        let inner = FftFixedInOut::<f32>::new(
            input_rate as usize,
            TARGET_SAMPLE_RATE as usize,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| StreamError::Resampler {
            message: e.to_string(),
        })?;
        let frames_in = inner.input_frames_next();
        let out_buf = inner.output_buffer_allocate();
        Ok(Self {
            inner,
            in_buf: ChannelBuffer::new(frames_in, channels),
            out_buf,
            channels,
        })
    }

    /// Feed interleaved samples; converted output (also interleaved) is
    /// appended to `out`. Partial chunks are carried to the next call.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), StreamError> {
        let mut consumed = 0;
        while consumed < input.len() {
            consumed += self.in_buf.fill_from_interleaved(&input[consumed..]);
            if !self.in_buf.is_full() {
                break;
            }
            self.inner
                .process_into_buffer(self.in_buf.inner(), &mut self.out_buf, None)
                .map_err(|e| StreamError::Resampler {
                    message: e.to_string(),
                })?;
            self.in_buf.reset();
            interleave_into(&self.out_buf, self.channels, out);
        }
        Ok(())
    }

    /// Frames currently buffered waiting for a full chunk
    #[cfg(test)]
    pub fn pending_frames(&self) -> usize {
        self.in_buf.position()
    }
}

/// Deinterleaved accumulation buffer with a fixed per-channel capacity
struct ChannelBuffer {
    inner: Vec<Vec<f32>>,
    capacity: usize,
    channels: usize,
    current_chan: usize,
}

impl ChannelBuffer {
    fn new(capacity: usize, channels: usize) -> Self {
        Self {
            inner: vec![Vec::with_capacity(capacity); channels],
            capacity,
            channels,
            current_chan: 0,
        }
    }

    fn position(&self) -> usize {
        self.inner[self.channels - 1].len()
    }

    fn is_full(&self) -> bool {
        self.position() == self.capacity
    }

    fn reset(&mut self) {
        for chan in &mut self.inner {
            chan.clear();
        }
        self.current_chan = 0;
    }

    fn inner(&self) -> &[Vec<f32>] {
        &self.inner
    }

    /// Push interleaved samples round-robin into the channel columns,
    /// stopping when full. Returns how many input samples were consumed.
    fn fill_from_interleaved(&mut self, data: &[f32]) -> usize {
        let mut i = 0;
        while !self.is_full() && i < data.len() {
            self.inner[self.current_chan].push(data[i]);
            self.current_chan = (self.current_chan + 1) % self.channels;
            i += 1;
        }
        i
    }
}

fn interleave_into(deinterleaved: &[Vec<f32>], channels: usize, out: &mut Vec<f32>) {
    let frames = deinterleaved[0].len();
    out.reserve(frames * channels);
    for frame in 0..frames {
        for chan in deinterleaved {
            out.push(chan[frame]);
        }
    }
}
