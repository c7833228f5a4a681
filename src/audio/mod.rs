pub mod backend;
pub mod chunk;
pub mod file;
pub mod resample;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use chunk::{ChunkConfig, FrameChunker, FRAME_BYTES, FRAME_INTERVAL};
pub use file::{AudioFile, FileBackend};
pub use resample::{downsample, float_to_pcm16, pcm16_to_float, to_pcm16_bytes, TARGET_SAMPLE_RATE};
