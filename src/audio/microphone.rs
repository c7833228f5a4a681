// Microphone capture via cpal
//
// cpal streams are not Send, so each capture owns a dedicated thread that
// builds the stream, reports whether that worked, and then parks until it is
// told to stop. Dropping the stream on that thread releases the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::{VoiceError, VoiceResult};

/// Default input device backend
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }
}

fn classify(message: String) -> VoiceError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        VoiceError::PermissionDenied(message)
    } else {
        VoiceError::DeviceUnavailable(message)
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: mpsc::Sender<VoiceResult<AudioFrame>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let mut captured: u64 = 0;
    let mut dropped: u64 = 0;
    let err_tx = tx.clone();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
            let timestamp_ms = captured * 1000 / sample_rate.max(1) as u64;
            captured += (samples.len() / channels.max(1) as usize) as u64;

            let frame = AudioFrame {
                samples,
                sample_rate,
                channels,
                timestamp_ms,
            };

            // Never block the audio thread
            if tx.try_send(Ok(frame)).is_err() {
                dropped += 1;
                if dropped % 50 == 1 {
                    warn!("Capture channel full or closed, dropped {} buffers", dropped);
                }
            }
        },
        move |err| {
            error!("Audio stream error: {}", err);
            let failure = classify(format!("capture stopped: {}", err));
            if err_tx.try_send(Err(failure)).is_err() {
                warn!("Capture channel full or closed, stream error not delivered");
            }
        },
        None,
    )
}

fn open_stream(
    config: &AudioBackendConfig,
    tx: mpsc::Sender<VoiceResult<AudioFrame>>,
) -> VoiceResult<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device available".to_string()))?;

    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let default_config = device
        .default_input_config()
        .map_err(|e| classify(format!("{}: {}", name, e)))?;

    let sample_format = default_config.sample_format();
    let mut stream_config: StreamConfig = default_config.into();

    if let Some(rate) = config.preferred_sample_rate {
        let supported = device
            .supported_input_configs()
            .map(|mut configs| {
                configs.any(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
            })
            .unwrap_or(false);
        if supported {
            stream_config.sample_rate = cpal::SampleRate(rate);
        } else {
            info!("{}Hz not supported by {}, using {}Hz", rate, name, stream_config.sample_rate.0);
        }
    }

    let frames = (stream_config.sample_rate.0 as u64 * config.buffer_duration_ms / 1000) as u32;
    if frames > 0 {
        stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
    }

    let built = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx.clone()),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx.clone()),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, tx.clone()),
        other => {
            return Err(VoiceError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    // Some hosts reject a fixed buffer size; retry with the default
    let stream = match built {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Fixed buffer rejected ({}), retrying with default size", e);
            stream_config.buffer_size = cpal::BufferSize::Default;
            match sample_format {
                SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx),
                SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx),
                _ => build_stream::<u16>(&device, &stream_config, tx),
            }
            .map_err(|e| classify(format!("{}: {}", name, e)))?
        }
    };

    stream
        .play()
        .map_err(|e| classify(format!("{}: {}", name, e)))?;

    info!(
        "Microphone capture started on {} ({}Hz, {} channels)",
        name, stream_config.sample_rate.0, stream_config.channels
    );

    Ok((stream, stream_config.sample_rate.0, stream_config.channels))
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<VoiceResult<AudioFrame>>> {
        if self.thread.is_some() {
            return Err(VoiceError::DeviceUnavailable(
                "microphone already in use by this session".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (init_tx, init_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("iat-capture".to_string())
            .spawn(move || match open_stream(&config, tx) {
                Ok((stream, _, _)) => {
                    let _ = init_tx.send(Ok(()));
                    // Park until stop() or the backend is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!("Microphone released");
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                }
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        match init_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::DeviceUnavailable(
                "capture thread exited during setup".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if thread.join().is_err() {
                    error!("Capture thread panicked");
                }
            })
            .await
            .map_err(|e| VoiceError::DeviceUnavailable(format!("join capture thread: {}", e)))?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}
