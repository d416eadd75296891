use crate::backend::MixerHandle;
use crate::config::PetalSoundDesc;
use crate::error::{PetalSoundError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// System audio output that renders a [`MixerHandle`] from the cpal callback.
pub struct OutputDevice {
    mixer: MixerHandle,
    sample_rate: u32,
    channels: u16,
    block_size: usize,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
}

impl OutputDevice {
    pub fn new(mixer: MixerHandle, desc: &PetalSoundDesc) -> Self {
        Self {
            mixer,
            sample_rate: desc.sample_rate,
            channels: desc.channels,
            block_size: desc.block_size,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open the default output device and start pulling audio from the mixer.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            PetalSoundError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            PetalSoundError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config)?,
            format => {
                return Err(PetalSoundError::AudioFormat(format!(
                    "Unsupported sample format {:?}",
                    format
                )));
            }
        };

        stream.play().map_err(|e| {
            PetalSoundError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;

        log::info!(
            "Output device started: {} Hz, {} channels, block size {}",
            self.sample_rate,
            self.channels,
            self.block_size
        );

        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Output device stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames rendered since the device was started.
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn mixer(&self) -> &MixerHandle {
        &self.mixer
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mixer = self.mixer.clone();
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        data.fill(T::from_sample(0.0f32));
                        return;
                    }

                    scratch.resize(data.len(), 0.0);

                    // Never block the device thread on the engine
                    let frames = match mixer.try_lock() {
                        Some(mut mixer) => mixer.render(&mut scratch),
                        None => {
                            log::warn!("Mixer busy, rendering silence");
                            scratch.fill(0.0);
                            0
                        }
                    };

                    for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*sample);
                    }

                    frames_processed.fetch_add(frames, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PetalSoundError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
