pub mod backend;
pub mod codec;
pub mod file;
pub mod resample;

#[cfg(feature = "device")]
pub mod device;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioSource, CaptureBlock, ChannelBackend, SilenceBackend,
};
pub use codec::{AudioFrame, FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use file::{AudioFile, FileBackend};
pub use resample::StreamResampler;

#[cfg(feature = "device")]
pub use device::{DeviceOutput, MicrophoneBackend};
