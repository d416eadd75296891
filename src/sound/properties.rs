use crate::backend::{AudioBackend, VoiceId, VoiceParam};
use crate::math::Vec3;

/// Cached spatial and playback state of a sound.
///
/// Setters on the engine always update these values; they reach the backend
/// immediately when the sound holds a voice, otherwise on the next grant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundProperties {
    pub position: Vec3,
    pub direction: Vec3,
    pub velocity: Vec3,
    pub relative_to_listener: bool,
    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub pitch: f32,
    pub rolloff_factor: f32,
    pub reference_distance: f32,
    pub max_distance: f32,
    /// Degrees
    pub cone_inner_angle: f32,
    /// Degrees
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    /// Higher wins when voices run out
    pub priority: u8,
    pub looping: bool,
    /// Return the voice to the pool as soon as the sound is stopped
    pub give_up_voice_on_stop: bool,
}

impl Default for SoundProperties {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::ZERO,
            velocity: Vec3::ZERO,
            relative_to_listener: false,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            pitch: 1.0,
            rolloff_factor: 1.0,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            priority: 0,
            looping: false,
            give_up_voice_on_stop: false,
        }
    }
}

impl SoundProperties {
    /// Distance used to rank sounds against each other.
    pub fn distance_to(&self, listener_position: Vec3) -> f32 {
        if self.relative_to_listener {
            self.position.length()
        } else {
            self.position.distance(listener_position)
        }
    }

    /// Every backend parameter except looping, which depends on the storage.
    pub(crate) fn voice_params(&self) -> [VoiceParam; 14] {
        [
            VoiceParam::Gain(self.gain),
            VoiceParam::MinGain(self.min_gain),
            VoiceParam::MaxGain(self.max_gain),
            VoiceParam::Pitch(self.pitch),
            VoiceParam::Position(self.position),
            VoiceParam::Velocity(self.velocity),
            VoiceParam::Direction(self.direction),
            VoiceParam::Relative(self.relative_to_listener),
            VoiceParam::RolloffFactor(self.rolloff_factor),
            VoiceParam::ReferenceDistance(self.reference_distance),
            VoiceParam::MaxDistance(self.max_distance),
            VoiceParam::ConeInnerAngle(self.cone_inner_angle),
            VoiceParam::ConeOuterAngle(self.cone_outer_angle),
            VoiceParam::ConeOuterGain(self.cone_outer_gain),
        ]
    }

    pub(crate) fn apply_all(&self, backend: &mut dyn AudioBackend, voice: VoiceId) {
        for param in self.voice_params() {
            push_param(backend, voice, param);
        }
    }
}

/// Push one parameter, logging instead of failing.
pub(crate) fn push_param(backend: &mut dyn AudioBackend, voice: VoiceId, param: VoiceParam) {
    if let Err(e) = backend.set_param(voice, param) {
        log::warn!("Failed to set {:?} on {}: {}", param, voice, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_distance_ignores_listener() {
        let props = SoundProperties {
            position: Vec3::new(3.0, 4.0, 0.0),
            relative_to_listener: true,
            ..Default::default()
        };
        assert_eq!(props.distance_to(Vec3::new(100.0, 0.0, 0.0)), 5.0);

        let world = SoundProperties {
            relative_to_listener: false,
            ..props
        };
        assert_eq!(world.distance_to(Vec3::new(3.0, 0.0, 0.0)), 4.0);
    }
}
