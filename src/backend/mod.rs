//! The low-level audio backend the engine drives.
//!
//! The backend model follows the classic "source + buffer queue" design:
//! a fixed number of voices, each rendering either one attached buffer
//! (optionally looping) or a queue of buffers that it consumes in order.
//! Consumed buffers count as *processed* until they are unqueued.
//!
//! [`SoftwareMixer`] is the in-process implementation; [`OutputDevice`]
//! connects it to the system output through cpal.

mod output;
mod software;

use crate::audio_data::BufferFormat;
use crate::error::Result;
use crate::math::Vec3;
pub use output::OutputDevice;
pub use software::{MixerHandle, SoftwareMixer};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VoiceId({})", self.0)
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

/// State of a backend voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Initial,
    Playing,
    Paused,
    /// Stopped explicitly, or ran out of queued audio
    Stopped,
}

/// How gain falls off with distance from the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceModel {
    None,
    Inverse,
    #[default]
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
}

/// One property of a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceParam {
    Gain(f32),
    MinGain(f32),
    MaxGain(f32),
    Pitch(f32),
    Position(Vec3),
    Velocity(Vec3),
    Direction(Vec3),
    /// Position is relative to the listener instead of world space
    Relative(bool),
    RolloffFactor(f32),
    ReferenceDistance(f32),
    MaxDistance(f32),
    /// Degrees
    ConeInnerAngle(f32),
    /// Degrees
    ConeOuterAngle(f32),
    ConeOuterGain(f32),
    /// Loop the attached buffer. Has no effect on queued playback.
    Looping(bool),
}

/// Listener state as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerParams {
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for ListenerParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            forward: -Vec3::Z,
            up: Vec3::Y,
        }
    }
}

/// Operations the engine needs from an audio backend.
///
/// All calls are expected to be fast and non-blocking; the engine makes them
/// while holding its state lock.
pub trait AudioBackend: Send {
    fn create_voice(&mut self) -> Result<VoiceId>;
    fn destroy_voice(&mut self, voice: VoiceId);

    fn create_buffer(&mut self) -> Result<BufferId>;
    fn destroy_buffer(&mut self, buffer: BufferId);
    /// Replace the contents of `buffer`. Fails if the buffer is queued on a voice.
    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()>;

    fn set_param(&mut self, voice: VoiceId, param: VoiceParam) -> Result<()>;
    fn voice_state(&self, voice: VoiceId) -> VoiceState;

    fn play(&mut self, voice: VoiceId);
    fn pause(&mut self, voice: VoiceId);
    fn stop(&mut self, voice: VoiceId);
    /// Stop and move the cursor back to the start of the queue.
    fn rewind(&mut self, voice: VoiceId);

    /// Attach a single buffer, replacing the queue. `None` detaches everything.
    fn attach_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) -> Result<()>;
    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId) -> Result<()>;
    /// Remove the oldest processed buffer from the queue.
    fn unqueue_buffer(&mut self, voice: VoiceId) -> Option<BufferId>;
    fn buffers_processed(&self, voice: VoiceId) -> usize;
    fn buffers_queued(&self, voice: VoiceId) -> usize;

    /// Offset of the playback cursor within the buffer currently playing.
    fn byte_offset(&self, voice: VoiceId) -> usize;
    fn set_byte_offset(&mut self, voice: VoiceId, offset: usize) -> Result<()>;

    fn set_listener(&mut self, listener: &ListenerParams);
    fn set_master_gain(&mut self, gain: f32);
    fn set_distance_model(&mut self, model: DistanceModel);
    fn set_doppler_factor(&mut self, factor: f32);
    fn set_speed_of_sound(&mut self, speed: f32);
}
