// Tests for capture backends and PCM frame handling
//
// These tests verify the audio types the uplink and downlink are built on.

use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use treez_live::audio::codec::{float_to_pcm16, le_bytes_to_pcm16, parse_pcm_rate};
use treez_live::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, CaptureBlock, ChannelBackend,
    SilenceBackend,
};

#[test]
fn test_audio_frame_round_trip_within_quantization() -> Result<()> {
    let originals: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.013).sin() * 0.9).collect();

    let frame = AudioFrame::from_float(&originals, 16000);
    let decoded = AudioFrame::from_base64(&frame.to_base64(), 16000)?;
    let restored = decoded.to_float();

    assert_eq!(restored.len(), originals.len());
    for (a, b) in originals.iter().zip(&restored) {
        assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
    }
    Ok(())
}

#[test]
fn test_full_scale_saturates_instead_of_wrapping() {
    let pcm = float_to_pcm16(&[1.0, -1.0, 1.5, -1.5]);
    assert_eq!(pcm, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
}

#[test]
fn test_odd_byte_payload_is_rejected() {
    assert!(le_bytes_to_pcm16(&[0x01, 0x02, 0x03]).is_err());
}

#[test]
fn test_audio_frame_metadata() {
    let frame = AudioFrame::new(vec![0; 24000], 24000);

    assert_eq!(frame.mime_type(), "audio/pcm;rate=24000");
    assert_eq!(frame.byte_len(), 48000);
    assert!((frame.duration_secs() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_pcm_rate_parsing() {
    assert_eq!(parse_pcm_rate("audio/pcm;rate=24000", 16000), Some(24000));
    assert_eq!(parse_pcm_rate("audio/pcm", 24000), Some(24000));
    assert_eq!(parse_pcm_rate("audio/mpeg", 24000), None);
    assert_eq!(parse_pcm_rate("audio/pcm;rate=0", 24000), None);
}

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.target_sample_rate, 16000, "Provider input is 16kHz");
    assert_eq!(config.target_channels, 1, "Default should be mono");
    assert_eq!(config.frame_samples, 4096);
    assert_eq!(config.frame_duration(), Duration::from_millis(256));
}

#[test]
fn test_audio_source_parsing() {
    assert_eq!("mic".parse::<AudioSource>().unwrap(), AudioSource::Microphone);
    assert_eq!("silence".parse::<AudioSource>().unwrap(), AudioSource::Silence);
    assert_eq!(
        "take.wav".parse::<AudioSource>().unwrap(),
        AudioSource::File("take.wav".to_string())
    );
}

#[tokio::test]
async fn test_silence_backend_emits_frames() -> Result<()> {
    let config = AudioBackendConfig {
        frame_samples: 160,
        ..Default::default()
    };
    let mut backend = SilenceBackend::new(config);

    let mut rx = backend.start().await?;
    assert!(backend.is_capturing());

    let block = timeout(Duration::from_secs(1), rx.recv()).await?.expect("silence frame");
    assert_eq!(block.samples.len(), 160);
    assert_eq!(block.sample_rate, 16000);
    assert!(block.samples.iter().all(|s| *s == 0.0));

    backend.stop().await?;
    assert!(!backend.is_capturing());
    Ok(())
}

#[tokio::test]
async fn test_zero_frame_samples_is_clamped() -> Result<()> {
    let config = AudioBackendConfig {
        frame_samples: 0,
        ..Default::default()
    };
    assert_eq!(config.frame_len(), 1);
    assert!(config.frame_duration() > Duration::ZERO);

    // Must not panic building its ticker
    let mut backend = SilenceBackend::new(config);
    let mut rx = backend.start().await?;
    let block = timeout(Duration::from_secs(1), rx.recv()).await?.expect("silence frame");
    assert_eq!(block.samples.len(), 1);

    backend.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_channel_backend_hands_out_feed_once() -> Result<()> {
    let (mut backend, tx) = ChannelBackend::new(4);

    let mut rx = backend.start().await?;
    tx.send(CaptureBlock {
        samples: vec![0.5; 8],
        sample_rate: 48000,
        channels: 2,
    })
    .await?;

    let block = rx.recv().await.expect("fed block");
    assert_eq!(block.channels, 2);
    assert!(backend.start().await.is_err());
    Ok(())
}

#[test]
fn test_factory_creates_silence_backend() -> Result<()> {
    let backend = AudioBackendFactory::create(AudioSource::Silence, AudioBackendConfig::default())?;
    assert_eq!(backend.name(), "silence");
    Ok(())
}

#[test]
fn test_factory_rejects_missing_file() {
    let result = AudioBackendFactory::create(
        AudioSource::File("/nonexistent/input.wav".to_string()),
        AudioBackendConfig::default(),
    );
    assert!(result.is_err());
}
