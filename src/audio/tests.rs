use crate::audio::convert::*;
use crate::audio::props::AudioProps;
use crate::audio::resample::Resampler;
use crate::audio::{AudioFormat, SampleEncoding, FRAME_SAMPLES};
use crate::types::PlayState;

#[test]
fn test_frame_constant() {
    // 40 ms at 48 kHz
    assert_eq!(FRAME_SAMPLES, 1920);
}

#[test]
fn test_encoding_widths() {
    assert_eq!(SampleEncoding::S16.bytes_per_sample(), 2);
    assert_eq!(SampleEncoding::S32.bytes_per_sample(), 4);
    assert_eq!(SampleEncoding::F32.bits_per_sample(), 32);
}

#[test]
fn test_i16_bytes_roundtrip() {
    let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 12345];
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let mut out = Vec::new();
    i16_from_bytes(&bytes, &mut out);
    assert_eq!(out, samples);
}

#[test]
fn test_i16_to_f32_range() {
    let bytes: Vec<u8> = [i16::MIN, 0, i16::MAX]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let mut out = Vec::new();
    i16_bytes_to_f32(&bytes, &mut out);
    assert!((out[0] + 1.0).abs() < 1e-4);
    assert!(out[1].abs() < 1e-6);
    assert!((out[2] - 1.0).abs() < 1e-4);
}

#[test]
fn test_i32_to_f32_range() {
    let bytes: Vec<u8> = [i32::MIN, 0, i32::MAX]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let mut out = Vec::new();
    i32_bytes_to_f32(&bytes, &mut out);
    assert!((out[0] + 1.0).abs() < 1e-6);
    assert!((out[2] - 1.0).abs() < 1e-6);
}

#[test]
fn test_volume_folded_into_f32_to_i16() {
    let input = vec![0.5f32; 8];
    let mut full = Vec::new();
    let mut half = Vec::new();
    f32_to_i16_with_volume(&input, &mut full, 1.0);
    f32_to_i16_with_volume(&input, &mut half, 0.5);
    for (a, b) in full.iter().zip(&half) {
        let ratio = f64::from(*b) / f64::from(*a);
        assert!((ratio - 0.5).abs() < 0.01, "ratio {ratio}");
    }
}

#[test]
fn test_volume_kernel_half_magnitude() {
    // A sine at half volume must land within 1% of half magnitude.
    let sine: Vec<i16> = (0..1920)
        .map(|i| {
            let t = i as f32 / 48_000.0;
            (f32::sin(2.0 * std::f32::consts::PI * 440.0 * t) * 16_000.0) as i16
        })
        .collect();
    let mut halved = sine.clone();
    apply_volume_i16(&mut halved, 0.5);
    for (orig, half) in sine.iter().zip(&halved) {
        if orig.abs() > 100 {
            let ratio = f64::from(*half) / f64::from(*orig);
            assert!((ratio - 0.5).abs() < 0.01, "ratio {ratio}");
        }
    }
}

#[test]
fn test_volume_kernel_unity_is_identity() {
    let mut samples = vec![100i16, -2000, 31000];
    let original = samples.clone();
    apply_volume_i16(&mut samples, 1.0);
    assert_eq!(samples, original);
}

#[test]
fn test_f32_to_i16_clamps() {
    let input = vec![2.0f32, -2.0];
    let mut out = Vec::new();
    f32_to_i16_with_volume(&input, &mut out, 1.0);
    assert_eq!(out[0], i16::MAX);
    assert_eq!(out[1], i16::MIN);
}

#[test]
fn test_resampler_ratio() {
    let mut resampler = Resampler::new(44_100, 2).unwrap();
    let input = vec![0.1f32; 44_100 * 2]; // one second, stereo
    let mut out = Vec::new();
    resampler.process(&input, &mut out).unwrap();
    // Expect roughly one second at 48 kHz; the fixed-chunk tail stays
    // buffered, so allow a chunk of slack.
    let frames_out = out.len() / 2;
    assert!(
        (44_000..=48_000).contains(&frames_out),
        "unexpected output frames {frames_out}"
    );
    assert!(resampler.pending_frames() < 4096);
}

#[test]
fn test_resampler_carries_partial_chunks() {
    let mut resampler = Resampler::new(44_100, 2).unwrap();
    let mut out = Vec::new();
    resampler.process(&[0.0f32; 100], &mut out).unwrap();
    // Not enough for a chunk yet.
    assert!(out.is_empty());
    assert_eq!(resampler.pending_frames(), 50);
}

#[test]
fn test_props_volume_rounding() {
    let props = AudioProps::new();
    props.set_volume(0.119);
    assert!((props.volume() - 0.12).abs() < 1e-9);
    props.set_volume(-3.0);
    assert!(props.volume().abs() < 1e-9);
}

#[test]
fn test_props_drop_ring_one_shot() {
    let props = AudioProps::new();
    assert!(!props.take_drop_ring());
    props.request_drop_ring();
    assert!(props.take_drop_ring());
    assert!(!props.take_drop_ring());
}

#[test]
fn test_props_reset_preserves_stream_scope() {
    let props = AudioProps::new();
    props.set_format(AudioFormat {
        sample_rate: 44_100,
        channels: 2,
        encoding: SampleEncoding::S16,
    });
    props.set_total_samples(1000);
    props.set_volume(0.5);
    props.set_play_state(PlayState::Paused);

    props.reset_task();
    assert!(props.format().is_none());
    assert_eq!(props.total_samples(), 0);
    // Stream-scoped settings survive retirement.
    assert!((props.volume() - 0.5).abs() < 1e-9);
    assert_eq!(props.play_state(), PlayState::Paused);
}

#[test]
fn test_props_state_update_signals() {
    let props = AudioProps::new();
    assert!(!props.state_update().is_set());
    props.set_play_state(PlayState::Paused);
    assert!(props.state_update().is_set());
}
