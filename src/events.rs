//! Event types for PetalSound

use crate::sound::SoundId;

/// Events emitted by the engine. Drained with
/// [`PetalSoundEngine::poll_events`](crate::PetalSoundEngine::poll_events).
#[derive(Debug, Clone, PartialEq)]
pub enum PetalSoundEvent {
    SoundStarted {
        sound_id: SoundId,
    },
    /// Playback reached the end of a non-looping sound.
    SoundFinished {
        sound_id: SoundId,
    },
    /// A looping sound wrapped. For streaming sounds this fires when the
    /// buffer fill wraps, slightly ahead of the audible loop point.
    SoundLooped {
        sound_id: SoundId,
        loop_count: u32,
    },
    FadeCompleted {
        sound_id: SoundId,
    },
    /// `sound_id` lost its voice so that `by` could play.
    VoiceStolen {
        sound_id: SoundId,
        by: SoundId,
    },
    SoundReactivated {
        sound_id: SoundId,
    },
    /// A streaming voice ran dry and was restarted.
    BufferUnderrun {
        sound_id: SoundId,
    },
    SoundDestroyed {
        sound_id: SoundId,
    },
}

impl PetalSoundEvent {
    pub fn sound_id(&self) -> SoundId {
        match self {
            Self::SoundStarted { sound_id }
            | Self::SoundFinished { sound_id }
            | Self::SoundLooped { sound_id, .. }
            | Self::FadeCompleted { sound_id }
            | Self::VoiceStolen { sound_id, .. }
            | Self::SoundReactivated { sound_id }
            | Self::BufferUnderrun { sound_id }
            | Self::SoundDestroyed { sound_id } => *sound_id,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::BufferUnderrun { .. } | Self::VoiceStolen { .. })
    }
}
