use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::VoiceResult;

/// A WAV file decoded to float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples (channels averaged)
    pub fn mono_samples(&self) -> Vec<f32> {
        super::resample::downmix_to_mono(&self.samples, self.channels)
    }
}

/// Replays a WAV file through the capture interface
///
/// Frames of `buffer_duration_ms` are emitted at real-time pace unless
/// `realtime` is switched off. The channel closes when the file is exhausted.
pub struct FileBackend {
    name: String,
    file: AudioFile,
    config: AudioBackendConfig,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;
        Ok(Self::from_file(file, config))
    }

    pub fn from_file(file: AudioFile, config: AudioBackendConfig) -> Self {
        Self {
            name: format!("file:{}", file.path),
            file,
            config,
            realtime: true,
            task: None,
        }
    }

    /// Emit frames as fast as the session consumes them
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<VoiceResult<AudioFrame>>> {
        self.stop().await?;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let sample_rate = self.file.sample_rate;
        let channels = self.file.channels.max(1);
        let buffer_ms = self.config.buffer_duration_ms.max(1);
        let per_frame = (sample_rate as u64 * buffer_ms / 1000).max(1) as usize * channels as usize;
        let samples = self.file.samples.clone();
        let realtime = self.realtime;

        info!("Replaying {} ({} samples)", self.name, samples.len());

        let task = tokio::spawn(async move {
            let mut timestamp_ms = 0u64;
            for chunk in samples.chunks(per_frame) {
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels,
                    timestamp_ms,
                };
                timestamp_ms += frame.duration_ms();

                if tx.send(Ok(frame)).await.is_err() {
                    debug!("Capture receiver dropped, ending file replay");
                    return;
                }
                if realtime {
                    tokio::time::sleep(Duration::from_millis(buffer_ms)).await;
                }
            }
            debug!("File replay finished at {}ms", timestamp_ms);
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Stopped file replay: {}", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
