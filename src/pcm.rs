//! PCM sample conversions shared by capture and playback.
//!
//! The wire carries signed 16-bit little-endian PCM; devices work in
//! floats. Quantization clamps to [-1, 1] and scales asymmetrically
//! (32767 up, 32768 down) so both ends of the two's-complement range are
//! reachable.

/// Float samples in [-1, 1] to s16-le bytes.
pub fn quantize(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let sample = sample.clamp(-1.0, 1.0);
        let value = if sample < 0.0 {
            (sample * 32768.0) as i16
        } else {
            (sample * 32767.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Inverse of [`quantize`]: s16-le bytes to floats in [-1, 1]. A trailing
/// odd byte is ignored.
pub fn dequantize(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Input level for UI display: RMS of the block, scaled up for visual
/// effect and clamped to [0, 1].
pub fn level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square =
        samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    (mean_square.sqrt() * LEVEL_GAIN).min(1.0)
}

const LEVEL_GAIN: f32 = 4.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_maps_to_i16_range() {
        assert_eq!(quantize(&[1.0]), 32767i16.to_le_bytes().to_vec());
        assert_eq!(quantize(&[-1.0]), (-32768i16).to_le_bytes().to_vec());
        assert_eq!(quantize(&[0.0]), 0i16.to_le_bytes().to_vec());
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        assert_eq!(quantize(&[2.5]), quantize(&[1.0]));
        assert_eq!(quantize(&[-7.0]), quantize(&[-1.0]));
    }

    #[test]
    fn round_trip_error_is_bounded() {
        // The asymmetric scaling costs up to two steps of the 16-bit grid
        // near positive full scale.
        let tolerance = 2.0 / 32767.0 + 1.0 / 32768.0;
        let mut x = -1.0f32;
        while x <= 1.0 {
            let back = dequantize(&quantize(&[x]));
            assert_eq!(back.len(), 1);
            assert!(
                (back[0] - x).abs() <= tolerance,
                "x = {}, back = {}",
                x,
                back[0]
            );
            x += 0.00137;
        }
    }

    #[test]
    fn dequantize_ignores_trailing_odd_byte() {
        let mut bytes = quantize(&[0.25, -0.25]);
        bytes.push(0xFF);
        assert_eq!(dequantize(&bytes).len(), 2);
    }

    #[test]
    fn level_is_zero_for_silence_and_capped_at_one() {
        assert_eq!(level(&[]), 0.0);
        assert_eq!(level(&[0.0; 128]), 0.0);
        assert_eq!(level(&[1.0; 128]), 1.0);
        let quiet = level(&[0.01; 128]);
        assert!(quiet > 0.0 && quiet < 0.1);
    }
}
