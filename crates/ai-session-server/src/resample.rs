//! Linear-interpolation upsampling (spec.md §9 design notes: "linear
//! interpolation between adjacent samples when input_sr < target_sr; no
//! anti-aliasing required since signal is voice-band").

/// Upsample little-endian 16-bit mono PCM from `input_sr` to `target_sr`.
/// A no-op (returns the input unchanged) when `input_sr >= target_sr`,
/// since this crate never needs to downsample.
pub fn linear_upsample(pcm_le16: &[u8], input_sr: u32, target_sr: u32) -> Vec<u8> {
    if input_sr >= target_sr || pcm_le16.len() < 4 {
        return pcm_le16.to_vec();
    }

    let samples: Vec<i16> = pcm_le16
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    if samples.len() < 2 {
        return pcm_le16.to_vec();
    }

    let ratio = target_sr as f64 / input_sr as f64;
    let out_len = (samples.len() as f64 * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len * 2);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let i0 = src_pos.floor() as usize;
        let i1 = (i0 + 1).min(samples.len() - 1);
        let frac = src_pos - i0 as f64;
        let a = samples[i0.min(samples.len() - 1)] as f64;
        let b = samples[i1] as f64;
        let interpolated = (a + (b - a) * frac).round() as i16;
        out.extend_from_slice(&interpolated.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_sample_count_for_8k_to_16k() {
        let samples: Vec<i16> = vec![0, 1000, 2000, 1000, 0, -1000];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let upsampled = linear_upsample(&pcm, 8000, 16000);
        assert_eq!(upsampled.len() / 2, 12);
    }

    #[test]
    fn is_a_no_op_when_already_at_or_above_target() {
        let pcm = vec![1, 2, 3, 4];
        assert_eq!(linear_upsample(&pcm, 16000, 8000), pcm);
        assert_eq!(linear_upsample(&pcm, 16000, 16000), pcm);
    }
}
