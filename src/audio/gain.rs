//! Gain scaling for captured PCM.

/// Scale `samples` in place, rounding and saturating at the i16 range.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = scale(*sample, gain);
    }
}

fn scale(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Capture gain for the current playback state.
///
/// While the speaker is playing, the microphone is attenuated so the far
/// end does not hear itself.
pub fn echo_gain(playback_active: bool, suppression: f32) -> f32 {
    if playback_active { suppression } else { 1.0 }
}
