//! Sample format conversion and the volume kernel
//!
//! The consumer converts decoded PCM by encoding tag: pass-through for S16
//! at the target rate, otherwise through f32 scratch, optionally resampled,
//! and back to i16 with the volume folded into the final scaling step so it
//! is applied exactly once per frame.

/// Reinterpret little-endian i16 bytes as samples into `out`
pub fn i16_from_bytes(input: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        input
            .chunks_exact(2)
            .map(|bytes| i16::from_le_bytes([bytes[0], bytes[1]])),
    );
}

/// Convert little-endian i16 bytes to f32 in [-1, 1]
pub fn i16_bytes_to_f32(input: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(input.chunks_exact(2).map(|bytes| {
        let sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        f32::from(sample) / 32768.0
    }));
}

/// Convert little-endian i32 bytes to f32 in [-1, 1]
#[allow(clippy::cast_precision_loss)]
pub fn i32_bytes_to_f32(input: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(input.chunks_exact(4).map(|bytes| {
        let sample = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        sample as f32 / 2_147_483_648.0
    }));
}

/// Reinterpret little-endian f32 bytes as samples
pub fn f32_from_bytes(input: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        input
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
    );
}

/// Convert f32 samples to i16 with the volume folded into the scaling
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16_with_volume(input: &[f32], out: &mut Vec<i16>, volume: f32) {
    out.clear();
    out.extend(input.iter().map(|&sample| {
        let scaled = sample * volume * 32767.0;
        scaled.clamp(-32768.0, 32767.0) as i16
    }));
}

/// Volume kernel for the S16 pass-through path
#[allow(clippy::cast_possible_truncation)]
pub fn apply_volume_i16(samples: &mut [i16], volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in samples {
        let scaled = f32::from(*sample) * volume;
        *sample = scaled.clamp(-32768.0, 32767.0) as i16;
    }
}
