use tokio::sync::mpsc;

use crate::error::{VoiceError, VoiceResult};

/// One capture callback's worth of audio at the device's native format
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw float samples in [-1, 1] (interleaved if `channels > 1`)
    pub samples: Vec<f32>,
    /// Device sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Mono frame with a zero timestamp, handy for tests and synthetic sources
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    /// Duration of this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1000 / self.sample_rate as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Preferred device sample rate; the device default is used when unsupported
    pub preferred_sample_rate: Option<u32>,
    /// Callback buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
    /// Capacity of the frame channel between the capture thread and the session
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: None,
            buffer_duration_ms: 100, // ~ one ScriptProcessor buffer
            channel_capacity: 256,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device (feature `microphone`)
/// - File: replay a WAV file at real-time pace (testing/batch input)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver that will receive audio frames. Fails with
    /// `PermissionDenied` or `DeviceUnavailable`. A device that fails after
    /// capture started delivers the error through the channel; a channel that
    /// simply closes means the source ran out of input.
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<VoiceResult<AudioFrame>>>;

    /// Release the device; calling this when already stopped is a no-op
    async fn stop(&mut self) -> VoiceResult<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> VoiceResult<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::MicrophoneBackend;
                    Ok(Box::new(MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = config;
                    Err(VoiceError::DeviceUnavailable(
                        "built without the `microphone` feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(&path, config)
                    .map_err(|e| VoiceError::DeviceUnavailable(format!("{:#}", e)))?;
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
    /// WAV file replayed as if it were live input
    File(String),
}
