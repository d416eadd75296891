//! Configuration for PetalSound

use crate::audio_data::LoadOptions;
use crate::backend::DistanceModel;
use crate::error::{PetalSoundError, Result};
use std::time::Duration;

/// Where streaming buffers get refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingMode {
    /// Refill inside [`PetalSoundEngine::update`](crate::PetalSoundEngine::update).
    #[default]
    Cooperative,
    /// Refill on a dedicated thread every `background_interval`.
    Background,
}

#[derive(Debug, Clone)]
pub struct PetalSoundDesc {
    /// Upper bound on the voices requested from the backend at init.
    pub max_voices: usize,
    /// Buffers in each streaming sound's ring.
    pub stream_buffer_count: usize,
    /// Amount of audio held by one streaming buffer.
    pub stream_buffer_duration: Duration,
    pub scheduling: SchedulingMode,
    /// Sleep between refill passes of the background thread.
    pub background_interval: Duration,
    /// Minimum time between two reactivation attempts.
    pub reactivation_interval: Duration,
    /// Output device sample rate
    pub sample_rate: u32,
    /// Output device channels
    pub channels: u16,
    /// Output device block size in frames
    pub block_size: usize,
    pub distance_model: DistanceModel,
    pub doppler_factor: f32,
    pub speed_of_sound: f32,
    /// Applied when decoding static sounds
    pub load_options: LoadOptions,
}

impl Default for PetalSoundDesc {
    fn default() -> Self {
        Self {
            max_voices: 32,
            stream_buffer_count: 4,
            stream_buffer_duration: Duration::from_millis(250),
            scheduling: SchedulingMode::Cooperative,
            background_interval: Duration::from_millis(10),
            reactivation_interval: Duration::from_millis(100),
            sample_rate: 48000,
            channels: 2,
            block_size: 1024,
            distance_model: DistanceModel::InverseClamped,
            doppler_factor: 1.0,
            speed_of_sound: 343.3,
            load_options: LoadOptions::default(),
        }
    }
}

impl PetalSoundDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_voices(mut self, max: usize) -> Self {
        self.max_voices = max;
        self
    }

    pub fn stream_buffer_count(mut self, count: usize) -> Self {
        self.stream_buffer_count = count;
        self
    }

    pub fn stream_buffer_duration(mut self, duration: Duration) -> Self {
        self.stream_buffer_duration = duration;
        self
    }

    pub fn scheduling(mut self, mode: SchedulingMode) -> Self {
        self.scheduling = mode;
        self
    }

    pub fn background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = interval;
        self
    }

    pub fn reactivation_interval(mut self, interval: Duration) -> Self {
        self.reactivation_interval = interval;
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn distance_model(mut self, model: DistanceModel) -> Self {
        self.distance_model = model;
        self
    }

    pub fn doppler_factor(mut self, factor: f32) -> Self {
        self.doppler_factor = factor;
        self
    }

    pub fn speed_of_sound(mut self, speed: f32) -> Self {
        self.speed_of_sound = speed;
        self
    }

    pub fn load_options(mut self, options: LoadOptions) -> Self {
        self.load_options = options;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_voices == 0 {
            return Err(PetalSoundError::Configuration(
                "max_voices must be at least 1".to_string(),
            ));
        }
        if self.stream_buffer_count < 2 {
            return Err(PetalSoundError::Configuration(format!(
                "stream_buffer_count must be at least 2 (got {})",
                self.stream_buffer_count
            )));
        }
        if self.stream_buffer_duration.is_zero() {
            return Err(PetalSoundError::Configuration(
                "stream_buffer_duration must be non-zero".to_string(),
            ));
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(PetalSoundError::Configuration(
                "sample_rate and channels must be non-zero".to_string(),
            ));
        }
        if self.speed_of_sound <= 0.0 {
            return Err(PetalSoundError::Configuration(
                "speed_of_sound must be positive".to_string(),
            ));
        }
        if self.doppler_factor < 0.0 {
            return Err(PetalSoundError::Configuration(
                "doppler_factor must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_desc_is_valid() {
        assert!(PetalSoundDesc::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let desc = PetalSoundDesc::new()
            .max_voices(2)
            .stream_buffer_count(3)
            .scheduling(SchedulingMode::Background);
        assert_eq!(desc.max_voices, 2);
        assert_eq!(desc.stream_buffer_count, 3);
        assert_eq!(desc.scheduling, SchedulingMode::Background);
    }

    #[test]
    fn rejects_single_stream_buffer() {
        let desc = PetalSoundDesc::new().stream_buffer_count(1);
        assert!(matches!(
            desc.validate(),
            Err(PetalSoundError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_empty_pool() {
        assert!(PetalSoundDesc::new().max_voices(0).validate().is_err());
    }
}
