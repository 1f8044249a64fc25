//! General probe-driven container decoder
//!
//! Runs the full format probe over the byte source and decodes whatever
//! track it finds. Corrupt packets are dropped and decoding continues, but
//! more than `MAX_CONSECUTIVE_SKIPS` in one `read` invocation is treated as
//! an unrecoverable stream.

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::AudioFormat;
use crate::buffer::SharedByteSource;
use crate::error::Result;

use super::engine::{DecoderEngine, PumpRead};
use super::{decoder_error, DecodeRead, Decoder, SourceReader};

const MAX_CONSECUTIVE_SKIPS: u32 = 5;

/// Decoder for everything the probe recognises
#[derive(Default)]
pub struct ContainerDecoder {
    engine: Option<DecoderEngine>,
}

impl ContainerDecoder {
    /// Create an unopened decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ContainerDecoder {
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
            let probed = symphonia::default::get_probe()
                .format(
                    &Hint::new(),
                    mss,
                    &FormatOptions {
                        enable_gapless: true,
                        ..FormatOptions::default()
                    },
                    &MetadataOptions::default(),
                )
                .map_err(|e| decoder_error(format!("probe: {e}")))?;
            self.engine = Some(DecoderEngine::new(probed.format)?);
        }
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
        let mut skips = 0;
        loop {
            match engine.pump_into(out)? {
                PumpRead::Pcm(n) => return Ok(DecodeRead::Pcm(n)),
                PumpRead::NewFormat(n) => return Ok(DecodeRead::NewFormat(n)),
                PumpRead::NeedMore => return Ok(DecodeRead::NeedMore),
                PumpRead::Done => return Ok(DecodeRead::Done),
                PumpRead::Skipped => {
                    skips += 1;
                    if skips >= MAX_CONSECUTIVE_SKIPS {
                        return Err(decoder_error(format!(
                            "{skips} consecutive undecodable packets"
                        )));
                    }
                }
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
