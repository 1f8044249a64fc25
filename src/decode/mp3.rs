//! MP3-specialised decoder
//!
//! Opens the MPEG audio reader directly, skipping the container probe. The
//! reader keeps its own coarse seek index, so seeks stay cheap even on
//! sources without an accurate bitrate header.

use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::default::formats::MpaReader;

use crate::audio::AudioFormat;
use crate::buffer::SharedByteSource;
use crate::error::Result;

use super::engine::{DecoderEngine, PumpRead};
use super::{decoder_error, DecodeRead, Decoder, SourceReader};

/// Decoder for MPEG audio streams
#[derive(Default)]
pub struct Mp3Decoder {
    engine: Option<DecoderEngine>,
}

impl Mp3Decoder {
    /// Create an unopened decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Mp3Decoder {
    fn setup(&mut self, source: SharedByteSource) -> Result<()> {
        if self.engine.is_none() {
            // A failed earlier attempt may have consumed probe bytes.
            {
                let mut src = source.lock().expect("byte source lock poisoned");
                if src.is_seekable() {
                    let _ = src.seek(std::io::SeekFrom::Start(0));
                }
            }
            let mss = MediaSourceStream::new(
                Box::new(SourceReader::new(source)),
                MediaSourceStreamOptions::default(),
            );
            let options = FormatOptions {
                enable_gapless: true,
                ..FormatOptions::default()
            };
            let reader = MpaReader::try_new(mss, &options)
                .map_err(|e| decoder_error(format!("mpeg reader: {e}")))?;
            self.engine = Some(DecoderEngine::new(Box::new(reader))?);
        }
        // Decode ahead until the true stream parameters are known; the
        // producer re-invokes after more bytes arrive if this under-runs.
        if let Some(engine) = self.engine.as_mut() {
            if engine.format().is_none() {
                engine.warm_up()?;
            }
        }
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> Result<DecodeRead> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(decoder_error("read before setup"));
        };
        loop {
            match engine.pump_into(out)? {
                PumpRead::Pcm(n) => return Ok(DecodeRead::Pcm(n)),
                PumpRead::NewFormat(n) => return Ok(DecodeRead::NewFormat(n)),
                PumpRead::NeedMore => return Ok(DecodeRead::NeedMore),
                PumpRead::Done => return Ok(DecodeRead::Done),
                // Bad frames are dropped the way an MPEG decoder resyncs.
                PumpRead::Skipped => continue,
            }
        }
    }

    fn format(&self) -> Option<AudioFormat> {
        self.engine.as_ref().and_then(DecoderEngine::format)
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(decoder_error("seek before setup"));
        };
        engine.seek(seconds)
    }

    fn current_samples(&self) -> i64 {
        self.engine
            .as_ref()
            .map_or(0, DecoderEngine::current_samples)
    }

    fn total_samples(&self) -> i64 {
        self.engine.as_ref().map_or(0, DecoderEngine::total_samples)
    }

    fn reset(&mut self) {
        self.engine = None;
    }
}
