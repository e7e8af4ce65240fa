//! Sample-rate conversion and channel downmix.
//!
//! Devices rarely run at the provider rates, so captured audio is brought to
//! 16kHz mono before framing and model audio is lifted from 24kHz to the
//! output device rate before playback. Linear interpolation is enough for
//! speech at these ratios.

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate mono samples across `channels` interleaved channels
pub fn upmix_from_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(n as usize))
            .collect(),
    }
}

/// Resample mono audio from `from_rate` to `to_rate` by linear interpolation.
///
/// Output length is `round(len * to_rate / from_rate)`.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

/// Streaming resampler that carries fractional position across calls.
///
/// Capture callbacks deliver arbitrary block sizes; converting each block
/// independently would click at block boundaries.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    ratio: f64,
    /// Position of the next output sample relative to `prev`
    position: f64,
    /// Last input sample of the previous block
    prev: Option<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            ratio: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            position: 0.0,
            prev: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        // Logical input = [prev, input...]; index 0 is prev when present
        let offset = usize::from(self.prev.is_some());
        let sample_at = |i: usize| -> f32 {
            if offset == 1 && i == 0 {
                self.prev.unwrap_or(0.0)
            } else {
                input[i - offset]
            }
        };
        let total = input.len() + offset;

        let mut out = Vec::with_capacity((input.len() as f64 / self.ratio) as usize + 1);
        let mut pos = self.position;
        while (pos.floor() as usize) + 1 < total {
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            out.push(sample_at(idx) * (1.0 - frac) + sample_at(idx + 1) * frac);
            pos += self.ratio;
        }

        // Re-anchor so the last input sample becomes index 0 next time
        self.position = pos - (total - 1) as f64;
        self.prev = input.last().copied();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.5, -0.5, 0.2, 0.4], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.0).abs() < 1e-6);
        assert!((mono[1] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_upmix_duplicates() {
        assert_eq!(upmix_from_mono(&[0.1, 0.2], 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_resample_lengths() {
        let input = vec![0.25f32; 4800];
        assert_eq!(resample_linear(&input, 48_000, 16_000).len(), 1600);
        assert_eq!(resample_linear(&input, 24_000, 48_000).len(), 9600);
        assert_eq!(resample_linear(&input, 16_000, 16_000).len(), 4800);
    }

    #[test]
    fn test_resample_preserves_dc() {
        let out = resample_linear(&vec![0.5f32; 300], 24_000, 44_100);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_stream_resampler_matches_block_total() {
        let mut rs = StreamResampler::new(48_000, 16_000);
        let mut produced = 0;
        for _ in 0..10 {
            produced += rs.process(&vec![0.1f32; 480]).len();
        }
        // 4800 input samples at 3:1 -> ~1600 outputs
        assert!((1598..=1601).contains(&produced), "produced {}", produced);
    }
}
