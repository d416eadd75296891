use crate::backend::{AudioBackend, VoiceId, VoiceParam, VoiceState};
use crate::cache::StaticAsset;
use crate::error::Result;
use crate::sound::properties::push_param;

/// Playback of a shared, fully decoded buffer.
pub(crate) struct StaticPlayback {
    pub asset_name: String,
    pub asset: StaticAsset,
    /// Where to continue once a voice is granted again
    resume_offset: usize,
    /// Byte offset seen on the previous tick, for loop detection
    last_offset: usize,
}

/// What a static sound did since the previous tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StaticTick {
    pub looped: bool,
    pub voice_stopped: bool,
}

impl StaticPlayback {
    pub fn new(asset_name: String, asset: StaticAsset) -> Self {
        Self {
            asset_name,
            asset,
            resume_offset: 0,
            last_offset: 0,
        }
    }

    pub fn attach(
        &mut self,
        voice: VoiceId,
        backend: &mut dyn AudioBackend,
        looping: bool,
    ) -> Result<()> {
        backend.attach_buffer(voice, Some(self.asset.buffer))?;
        push_param(backend, voice, VoiceParam::Looping(looping));
        if self.resume_offset > 0 {
            backend.set_byte_offset(voice, self.resume_offset)?;
        }
        self.last_offset = self.resume_offset;
        Ok(())
    }

    /// Remember the audible position and free the voice of our buffer.
    pub fn detach(&mut self, voice: VoiceId, backend: &mut dyn AudioBackend) {
        self.resume_offset = match backend.voice_state(voice) {
            VoiceState::Playing | VoiceState::Paused => backend.byte_offset(voice),
            VoiceState::Initial | VoiceState::Stopped => self.resume_offset,
        };
        backend.stop(voice);
        if let Err(e) = backend.attach_buffer(voice, None) {
            log::warn!("Failed to detach buffer from {}: {}", voice, e);
        }
    }

    /// Start the voice, continuing from a pending seek if there is one.
    pub fn play(&mut self, voice: VoiceId, backend: &mut dyn AudioBackend) -> Result<()> {
        let state = backend.voice_state(voice);
        if state == VoiceState::Stopped || state == VoiceState::Initial {
            backend.rewind(voice);
            if self.resume_offset > 0 {
                backend.set_byte_offset(voice, self.resume_offset)?;
            }
            self.last_offset = self.resume_offset;
        }
        self.resume_offset = 0;
        backend.play(voice);
        Ok(())
    }

    pub fn rewind(&mut self, voice: Option<VoiceId>, backend: &mut dyn AudioBackend) {
        if let Some(voice) = voice {
            backend.rewind(voice);
        }
        self.resume_offset = 0;
        self.last_offset = 0;
    }

    pub fn update(
        &mut self,
        voice: VoiceId,
        backend: &dyn AudioBackend,
        looping: bool,
    ) -> StaticTick {
        let offset = backend.byte_offset(voice);
        let looped = looping && offset < self.last_offset;
        self.last_offset = offset;
        StaticTick {
            looped,
            voice_stopped: backend.voice_state(voice) == VoiceState::Stopped,
        }
    }

    pub fn length_secs(&self) -> f32 {
        self.asset.duration_secs()
    }

    pub fn position_secs(&self, voice: Option<VoiceId>, backend: &dyn AudioBackend) -> f32 {
        let offset = match voice {
            Some(voice) if backend.voice_state(voice) != VoiceState::Initial => {
                backend.byte_offset(voice)
            }
            _ => self.resume_offset,
        };
        offset as f32 / self.asset.bytes_per_second()
    }

    /// Move to `seconds`; the caller has checked it lies inside the sound.
    pub fn seek(
        &mut self,
        seconds: f32,
        voice: Option<VoiceId>,
        backend: &mut dyn AudioBackend,
    ) -> Result<()> {
        let align = self.asset.format.block_align();
        let bytes = (seconds * self.asset.bytes_per_second()) as usize;
        let offset = (bytes - bytes % align).min(self.asset.byte_len);

        match voice {
            Some(voice) if backend.voice_state(voice) != VoiceState::Initial => {
                if backend.voice_state(voice) == VoiceState::Stopped {
                    backend.rewind(voice);
                    self.resume_offset = offset;
                }
                backend.set_byte_offset(voice, offset)?;
            }
            _ => self.resume_offset = offset,
        }
        self.last_offset = offset;
        Ok(())
    }
}
