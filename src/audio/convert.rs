//! Sample format conversion between the modem's wire format and host devices.
//!
//! The modem speaks 8 kHz mono i16 little endian. Host devices that refuse
//! that format are driven at their native rate and channel count, with the
//! conversion done here.

use crate::defaults::BYTES_PER_SAMPLE;

/// Encode samples as little-endian bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decodes a little-endian i16 byte stream delivered in arbitrary chunks.
///
/// An odd trailing byte is held until the next chunk completes it.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut samples = Vec::with_capacity(bytes.len().div_ceil(BYTES_PER_SAMPLE));
        let mut rest = bytes;

        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    samples.push(i16::from_le_bytes([low, high]));
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }

        let mut pairs = rest.chunks_exact(BYTES_PER_SAMPLE);
        samples.extend(pairs.by_ref().map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
        self.carry = pairs.remainder().first().copied();
        samples
    }

    pub fn reset(&mut self) {
        self.carry = None;
    }
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Average interleaved channels down to mono.
pub fn mix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Duplicate mono samples across `channels` interleaved channels.
pub fn expand_channels(mono: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return mono.to_vec();
    }
    mono.iter()
        .flat_map(|&s| std::iter::repeat_n(s, channels))
        .collect()
}

/// Linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Device-native capture to modem format.
pub fn to_modem_format(samples: &[i16], channels: usize, native_rate: u32) -> Vec<i16> {
    let mono = mix_to_mono(samples, channels);
    resample(&mono, native_rate, crate::defaults::SAMPLE_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_bytes_layout() {
        assert_eq!(samples_to_le_bytes(&[0x0102, -1]), vec![0x02, 0x01, 0xFF, 0xFF]);
    }

    #[test]
    fn test_decoder_whole_chunk() {
        let mut decoder = PcmDecoder::new();
        assert_eq!(decoder.decode(&[0x10, 0x27, 0xF0, 0xD8]), vec![10000, -10000]);
    }

    #[test]
    fn test_decoder_carries_odd_byte() {
        let mut decoder = PcmDecoder::new();
        assert_eq!(decoder.decode(&[0x10, 0x27, 0xF0]), vec![10000]);
        assert_eq!(decoder.decode(&[0xD8]), vec![-10000]);
    }

    #[test]
    fn test_decoder_single_bytes() {
        let bytes = samples_to_le_bytes(&[1, -2, 300]);
        let mut decoder = PcmDecoder::new();
        let decoded: Vec<i16> = bytes.iter().flat_map(|b| decoder.decode(&[*b])).collect();
        assert_eq!(decoded, vec![1, -2, 300]);
    }

    #[test]
    fn test_decoder_empty_chunk_keeps_carry() {
        let mut decoder = PcmDecoder::new();
        decoder.decode(&[0x01]);
        assert!(decoder.decode(&[]).is_empty());
        assert_eq!(decoder.decode(&[0x00]), vec![1]);
    }

    #[test]
    fn test_mix_stereo_to_mono() {
        assert_eq!(mix_to_mono(&[100, 300, -200, 0], 2), vec![200, -100]);
    }

    #[test]
    fn test_expand_mono_to_stereo() {
        assert_eq!(expand_channels(&[1, 2], 2), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300];
        assert_eq!(resample(&samples, 8000, 8000), samples);
    }

    #[test]
    fn test_resample_upsample_interpolates() {
        let resampled = resample(&[0, 1000, 2000], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn test_native_48k_stereo_to_modem_format() {
        let native = vec![0i16; 960 * 2]; // 20 ms stereo at 48 kHz
        assert_eq!(to_modem_format(&native, 2, 48000).len(), 160);
    }
}
