use base64::Engine;

use crate::error::{LiveError, LiveResult};

/// Uplink (microphone) sample rate expected by the provider
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Downlink (model voice) sample rate delivered by the provider
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame (~256ms at 16kHz)
pub const FRAME_SAMPLES: usize = 4096;

/// Scale between normalized float samples and PCM16
const PCM16_SCALE: f32 = 32_768.0;

/// Mono PCM16 audio tagged with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Signed 16-bit samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Quantize normalized float samples in [-1, 1]
    pub fn from_float(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(float_to_pcm16(samples), sample_rate)
    }

    /// Decode a base64 wire payload.
    ///
    /// Fails when the payload is not base64 or its byte length is odd.
    pub fn from_base64(data: &str, sample_rate: u32) -> LiveResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
        Ok(Self::new(le_bytes_to_pcm16(&bytes)?, sample_rate))
    }

    /// Encode as base64 over little-endian PCM16 bytes
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(pcm16_to_le_bytes(&self.samples))
    }

    pub fn to_float(&self) -> Vec<f32> {
        pcm16_to_float(&self.samples)
    }

    pub fn mime_type(&self) -> String {
        pcm_mime_type(self.sample_rate)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Convert float samples to PCM16, rounding and saturating at the range ends
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (s * PCM16_SCALE).round();
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Reinterpret little-endian bytes as PCM16 samples
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> LiveResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Audio(format!(
            "PCM16 payload has odd byte length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// `audio/pcm;rate=16000` style mime type
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Whether the mime type names raw 16-bit PCM (`audio/pcm` or `audio/l16`)
pub fn is_pcm_mime(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("audio/pcm") || essence.eq_ignore_ascii_case("audio/l16")
}

/// Extract the `rate=` parameter from a PCM mime type.
///
/// Returns `None` for non-PCM types and for rates that are unparsable or
/// zero. A PCM type without a rate parameter yields `default_rate`.
pub fn parse_pcm_rate(mime_type: &str, default_rate: u32) -> Option<u32> {
    if !is_pcm_mime(mime_type) {
        return None;
    }

    for param in mime_type.split(';').skip(1).map(str::trim) {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("rate") {
                return value.trim().parse().ok().filter(|rate| *rate > 0);
            }
        }
    }

    Some(default_rate).filter(|rate| *rate > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_pcm16_saturates() {
        let pcm = float_to_pcm16(&[1.0, -1.0, 0.0, 2.5, -3.0]);
        assert_eq!(pcm, vec![i16::MAX, i16::MIN, 0, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_odd_byte_length_rejected() {
        assert!(le_bytes_to_pcm16(&[0, 1, 2]).is_err());
        assert_eq!(le_bytes_to_pcm16(&[0x01, 0x00, 0xff, 0xff]).unwrap(), vec![1, -1]);
    }

    #[test]
    fn test_parse_pcm_rate() {
        assert_eq!(parse_pcm_rate("audio/pcm;rate=24000", 16000), Some(24000));
        assert_eq!(parse_pcm_rate("audio/pcm; rate=16000", 24000), Some(16000));
        assert_eq!(parse_pcm_rate("audio/pcm", 24000), Some(24000));
        assert_eq!(parse_pcm_rate("image/png", 24000), None);
        assert_eq!(parse_pcm_rate("audio/pcm;rate=0", 24000), None);
        assert_eq!(parse_pcm_rate("audio/pcm;rate=fast", 24000), None);
        assert!(is_pcm_mime("audio/L16;rate=8000"));
    }

    #[test]
    fn test_duration() {
        let frame = AudioFrame::new(vec![0; 2400], OUTPUT_SAMPLE_RATE);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
        assert_eq!(frame.byte_len(), 4800);
    }
}
