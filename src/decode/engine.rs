//! Shared symphonia decode machinery
//!
//! Both decoder adapters drive the same packet pump: pull a packet, decode
//! it, interleave the samples into a byte staging area, and hand bytes out
//! in caller-sized pieces. The adapters differ in how they construct the
//! format reader and in their error policy.

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder as SymphoniaDecoder, DecoderOptions};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatReader, SeekMode, SeekTo};
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

use crate::audio::{AudioFormat, SampleEncoding};
use crate::error::{Result, StreamError};

use super::{classify_symphonia_error, decoder_error, DecodeRead};

/// How a single pump turn ended
pub(crate) enum PumpRead {
    /// Bytes staged and copied out
    Pcm(usize),
    /// Stream parameters changed before these bytes
    NewFormat(usize),
    /// Source still filling
    NeedMore,
    /// Stream drained
    Done,
    /// A corrupt packet was skipped; pump again
    Skipped,
}

pub(crate) struct DecoderEngine {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    time_base: TimeBase,
    format: Option<AudioFormat>,
    copy: Option<SampleCopy>,
    total_frames: i64,
    current_ts: u64,
    /// Decoded bytes not yet handed to the caller
    staged: Vec<u8>,
    staged_off: usize,
}

/// Typed interleaving buffer; the variant pins the PCM encoding handed out
enum SampleCopy {
    S16(SampleBuffer<i16>),
    S32(SampleBuffer<i32>),
    F32(SampleBuffer<f32>),
}

impl DecoderEngine {
    /// Build an engine over an opened format reader
    pub(crate) fn new(reader: Box<dyn FormatReader>) -> Result<Self> {
        let track = reader
            .default_track()
            .ok_or_else(|| decoder_error("no audio track"))?;
        let params = &track.codec_params;
        let track_id = track.id;
        let time_base = params.time_base.unwrap_or_else(|| TimeBase::new(1, 1));
        let total_frames = params.n_frames.map_or(0, |frames| frames as i64);

        let format = match (params.sample_rate, params.channels) {
            (Some(sample_rate), Some(channels)) => Some(AudioFormat {
                sample_rate,
                channels: channels.count(),
                // Refined to the decoded representation on the first packet.
                encoding: SampleEncoding::S16,
            }),
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| decoder_error(format!("unsupported codec: {e}")))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            time_base,
            format,
            copy: None,
            total_frames,
            current_ts: 0,
            staged: Vec::new(),
            staged_off: 0,
        })
    }

    pub(crate) fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub(crate) fn total_samples(&self) -> i64 {
        self.total_frames
    }

    pub(crate) fn current_samples(&self) -> i64 {
        let Some(format) = self.format else {
            return 0;
        };
        let time = self.time_base.calc_time(self.current_ts);
        #[allow(clippy::cast_possible_truncation)]
        let samples =
            (time.seconds as f64 + time.frac) * f64::from(format.sample_rate);
        samples as i64
    }

    /// Decode packets until warm: the format is known and its encoding
    /// reflects the first decoded buffer. Decoded bytes stay staged for the
    /// consumer, nothing is dropped.
    pub(crate) fn warm_up(&mut self) -> Result<PumpRead> {
        if self.copy.is_some() {
            return Ok(PumpRead::Pcm(0));
        }
        self.pump()
    }

    /// One pump turn: hand out staged bytes if any, otherwise decode the
    /// next packet into staging and hand out from there.
    pub(crate) fn pump_into(&mut self, out: &mut [u8]) -> Result<PumpRead> {
        if self.staged_off < self.staged.len() {
            return Ok(self.drain_staged(out));
        }
        match self.pump()? {
            PumpRead::Pcm(_) => Ok(self.drain_staged(out)),
            PumpRead::NewFormat(_) => {
                let copied = match self.drain_staged(out) {
                    PumpRead::Pcm(n) => n,
                    other => return Ok(other),
                };
                Ok(PumpRead::NewFormat(copied))
            }
            other => Ok(other),
        }
    }

    fn drain_staged(&mut self, out: &mut [u8]) -> PumpRead {
        let available = self.staged.len() - self.staged_off;
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.staged[self.staged_off..self.staged_off + n]);
        self.staged_off += n;
        if self.staged_off == self.staged.len() {
            self.staged.clear();
            self.staged_off = 0;
        }
        PumpRead::Pcm(n)
    }

    /// Pull and decode one packet into staging
    fn pump(&mut self) -> Result<PumpRead> {
        let packet = match self.reader.next_packet() {
            Ok(packet) => packet,
            Err(e) => {
                return match classify_symphonia_error(&e) {
                    Some(DecodeRead::NeedMore) => Ok(PumpRead::NeedMore),
                    Some(DecodeRead::Done) => Ok(PumpRead::Done),
                    _ => match e {
                        Error::ResetRequired => {
                            self.decoder.reset();
                            Ok(PumpRead::Skipped)
                        }
                        other => Err(decoder_error(other)),
                    },
                };
            }
        };

        if packet.track_id() != self.track_id {
            return Ok(PumpRead::Skipped);
        }
        self.current_ts = packet.ts();

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::DecodeError(e)) => {
                warn!("skipping corrupt packet: {e}");
                return Ok(PumpRead::Skipped);
            }
            Err(e) => {
                return match classify_symphonia_error(&e) {
                    Some(DecodeRead::NeedMore) => Ok(PumpRead::NeedMore),
                    Some(DecodeRead::Done) => Ok(PumpRead::Done),
                    _ => Err(decoder_error(e)),
                };
            }
        };

        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;
        let encoding = SampleCopy::encoding_for(&decoded);
        let next_format = AudioFormat {
            sample_rate: spec.rate,
            channels: spec.channels.count(),
            encoding,
        };
        let format_changed = match self.format {
            Some(previous) if self.copy.is_some() => previous != next_format,
            _ => false,
        };
        if format_changed {
            // The interleave buffer is sized for the old spec.
            self.copy = None;
        }
        self.format = Some(next_format);

        // The time base may be a placeholder until the first decoded packet
        // reveals the true rate.
        if self.time_base.denom == 1 {
            self.time_base = TimeBase::new(1, spec.rate);
        }

        if self.copy.is_none() {
            self.copy = Some(SampleCopy::for_buffer(&decoded, duration, spec));
        }
        let copy = self.copy.as_mut().expect("copy buffer just ensured");
        copy.stage(&decoded, &mut self.staged);
        self.staged_off = 0;

        let staged = self.staged.len();
        if format_changed {
            debug!(
                rate = spec.rate,
                channels = spec.channels.count(),
                "stream parameters changed mid-decode"
            );
            Ok(PumpRead::NewFormat(staged))
        } else {
            Ok(PumpRead::Pcm(staged))
        }
    }

    pub(crate) fn seek(&mut self, seconds: f64) -> Result<()> {
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        let seeked = self
            .reader
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| StreamError::Decoder {
                message: format!("seek failed: {e}"),
            })?;
        // Per the docs, decoders need a reset after seeking.
        self.decoder.reset();
        self.current_ts = seeked.actual_ts;
        self.staged.clear();
        self.staged_off = 0;
        Ok(())
    }
}

impl SampleCopy {
    fn encoding_for(decoded: &symphonia::core::audio::AudioBufferRef<'_>) -> SampleEncoding {
        use symphonia::core::audio::AudioBufferRef;
        match decoded {
            AudioBufferRef::S16(_) => SampleEncoding::S16,
            AudioBufferRef::S32(_) => SampleEncoding::S32,
            // Everything else converts to f32 on copy, planar included.
            _ => SampleEncoding::F32,
        }
    }

    fn for_buffer(
        decoded: &symphonia::core::audio::AudioBufferRef<'_>,
        duration: u64,
        spec: SignalSpec,
    ) -> Self {
        match Self::encoding_for(decoded) {
            SampleEncoding::S16 => Self::S16(SampleBuffer::new(duration, spec)),
            SampleEncoding::S32 => Self::S32(SampleBuffer::new(duration, spec)),
            _ => Self::F32(SampleBuffer::new(duration, spec)),
        }
    }

    /// Interleave the decoded buffer and append it to `staged` as
    /// little-endian bytes.
    fn stage(
        &mut self,
        decoded: &symphonia::core::audio::AudioBufferRef<'_>,
        staged: &mut Vec<u8>,
    ) {
        staged.clear();
        match self {
            Self::S16(buf) => {
                buf.copy_interleaved_ref(decoded.clone());
                for sample in buf.samples() {
                    staged.extend_from_slice(&sample.to_le_bytes());
                }
            }
            Self::S32(buf) => {
                buf.copy_interleaved_ref(decoded.clone());
                for sample in buf.samples() {
                    staged.extend_from_slice(&sample.to_le_bytes());
                }
            }
            Self::F32(buf) => {
                buf.copy_interleaved_ref(decoded.clone());
                for sample in buf.samples() {
                    staged.extend_from_slice(&sample.to_le_bytes());
                }
            }
        }
    }
}
