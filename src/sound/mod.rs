//! Logical sounds and their storage strategies.

mod fade;
mod properties;
mod static_playback;
mod stream_feeder;

use crate::backend::{AudioBackend, VoiceId, VoiceParam, VoiceState};
use crate::error::Result;
use crate::math::{Quat, TransformSource, Vec3, quat_changed, vec_changed};
pub(crate) use fade::{Fade, FadeStep};
pub use fade::FadeAction;
pub use properties::SoundProperties;
pub(crate) use properties::push_param;
pub(crate) use static_playback::StaticPlayback;
pub(crate) use stream_feeder::StreamFeeder;
use std::sync::Arc;

/// Handle to a sound owned by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundId(pub u64);

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SoundId({})", self.0)
    }
}

/// Addresses a sound either by handle or by its unique name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundRef<'a> {
    Id(SoundId),
    Name(&'a str),
}

impl From<SoundId> for SoundRef<'_> {
    fn from(id: SoundId) -> Self {
        SoundRef::Id(id)
    }
}

impl<'a> From<&'a str> for SoundRef<'a> {
    fn from(name: &'a str) -> Self {
        SoundRef::Name(name)
    }
}

impl<'a> From<&'a String> for SoundRef<'a> {
    fn from(name: &'a String) -> Self {
        SoundRef::Name(name)
    }
}

impl std::fmt::Display for SoundRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoundRef::Id(id) => write!(f, "{}", id),
            SoundRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    /// Decoded once into a shared buffer
    Static,
    /// Read incrementally through a ring of buffers
    Streaming,
}

/// What the application asked the sound to do, independent of whether it
/// currently holds a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Invoked with the id of the sound that finished or looped.
pub type SoundCallback = Arc<dyn Fn(SoundId) + Send + Sync>;

/// Options for [`PetalSoundEngine::create_sound`](crate::PetalSoundEngine::create_sound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoundOptions {
    pub streaming: bool,
    pub looping: bool,
    /// Request a voice right away instead of on first play
    pub preload: bool,
    pub priority: u8,
    /// Destroy the sound once it finishes playing
    pub temporary: bool,
}

impl SoundOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }
}

/// Snapshot of a sound returned by
/// [`PetalSoundEngine::sound_info`](crate::PetalSoundEngine::sound_info).
#[derive(Debug, Clone, PartialEq)]
pub struct SoundInfo {
    pub id: SoundId,
    pub name: String,
    pub file: String,
    pub kind: SoundKind,
    pub state: PlayState,
    pub has_voice: bool,
    pub fading: bool,
    pub temporary: bool,
    pub properties: SoundProperties,
    pub cue_points: Vec<f32>,
    pub loop_count: u32,
}

pub(crate) enum SoundStorage {
    Static(StaticPlayback),
    Streaming(StreamFeeder),
}

#[derive(Default)]
pub(crate) struct CallbackSlot {
    callback: Option<SoundCallback>,
    enabled: bool,
}

impl CallbackSlot {
    pub fn set(&mut self, callback: Option<SoundCallback>) {
        self.enabled = callback.is_some();
        self.callback = callback;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The callback, if one is registered and enabled.
    pub fn get(&self) -> Option<SoundCallback> {
        if self.enabled {
            self.callback.clone()
        } else {
            None
        }
    }
}

/// What a sound's storage reported during one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SoundTick {
    pub loops: u32,
    pub finished: bool,
    pub underrun: bool,
}

pub(crate) struct Sound {
    pub id: SoundId,
    pub name: String,
    pub file: String,
    pub props: SoundProperties,
    pub state: PlayState,
    pub voice: Option<VoiceId>,
    pub storage: SoundStorage,
    pub fade: Fade,
    pub cue_points: Vec<f32>,
    pub on_finished: CallbackSlot,
    pub on_looped: CallbackSlot,
    pub transform: Option<Arc<dyn TransformSource>>,
    last_transform: Option<(Vec3, Quat)>,
    pub temporary: bool,
    pub loop_count: u32,
}

impl Sound {
    pub fn new(
        id: SoundId,
        name: String,
        file: String,
        storage: SoundStorage,
        options: &SoundOptions,
    ) -> Self {
        Self {
            id,
            name,
            file,
            props: SoundProperties {
                priority: options.priority,
                looping: options.looping,
                ..Default::default()
            },
            state: PlayState::Initial,
            voice: None,
            storage,
            fade: Fade::default(),
            cue_points: Vec::new(),
            on_finished: CallbackSlot::default(),
            on_looped: CallbackSlot::default(),
            transform: None,
            last_transform: None,
            temporary: options.temporary,
            loop_count: 0,
        }
    }

    pub fn kind(&self) -> SoundKind {
        match self.storage {
            SoundStorage::Static(_) => SoundKind::Static,
            SoundStorage::Streaming(_) => SoundKind::Streaming,
        }
    }

    pub fn info(&self) -> SoundInfo {
        SoundInfo {
            id: self.id,
            name: self.name.clone(),
            file: self.file.clone(),
            kind: self.kind(),
            state: self.state,
            has_voice: self.voice.is_some(),
            fading: self.fade.is_active(),
            temporary: self.temporary,
            properties: self.props,
            cue_points: self.cue_points.clone(),
            loop_count: self.loop_count,
        }
    }

    pub fn distance_to(&self, listener_position: Vec3) -> f32 {
        self.props.distance_to(listener_position)
    }

    /// Take ownership of `voice`, re-apply every cached property and load
    /// the storage onto it. Returns the loop wraps hit while priming.
    pub fn attach_voice(&mut self, voice: VoiceId, backend: &mut dyn AudioBackend) -> Result<u32> {
        self.voice = Some(voice);
        self.props.apply_all(backend, voice);
        let looping = self.props.looping;
        match &mut self.storage {
            SoundStorage::Static(playback) => {
                playback.attach(voice, backend, looping)?;
                Ok(0)
            }
            SoundStorage::Streaming(feeder) => Ok(feeder.prime(voice, backend, looping)?.loops),
        }
    }

    /// Give the voice up, remembering where playback was.
    pub fn detach_voice(&mut self, backend: &mut dyn AudioBackend) -> Option<VoiceId> {
        let voice = self.voice.take()?;
        match &mut self.storage {
            SoundStorage::Static(playback) => playback.detach(voice, backend),
            SoundStorage::Streaming(feeder) => feeder.detach(voice, backend),
        }
        Some(voice)
    }

    /// Whether the held voice stopped because everything was played: a
    /// non-looping static sound, or a non-looping stream past its end.
    pub fn playback_ended(&self, backend: &dyn AudioBackend) -> bool {
        let Some(voice) = self.voice else {
            return false;
        };
        if self.props.looping || backend.voice_state(voice) != VoiceState::Stopped {
            return false;
        }
        match &self.storage {
            SoundStorage::Static(_) => true,
            SoundStorage::Streaming(feeder) => feeder.end_of_stream(),
        }
    }

    /// Start or resume the held voice. Returns loop wraps hit while priming.
    pub fn start_voice(&mut self, backend: &mut dyn AudioBackend) -> Result<u32> {
        let Some(voice) = self.voice else {
            return Ok(0);
        };
        let looping = self.props.looping;
        match &mut self.storage {
            SoundStorage::Static(playback) => {
                playback.play(voice, backend)?;
                Ok(0)
            }
            SoundStorage::Streaming(feeder) => Ok(feeder.play(voice, backend, looping)?.loops),
        }
    }

    pub fn pause_voice(&mut self, backend: &mut dyn AudioBackend) {
        if let Some(voice) = self.voice {
            backend.pause(voice);
        }
    }

    /// Stop the voice and move playback back to the start.
    pub fn rewind(&mut self, backend: &mut dyn AudioBackend) {
        match &mut self.storage {
            SoundStorage::Static(playback) => playback.rewind(self.voice, backend),
            SoundStorage::Streaming(feeder) => feeder.rewind(self.voice, backend),
        }
        self.fade.cancel();
    }

    /// Push a parameter to the voice, if there is one.
    pub fn push(&self, backend: &mut dyn AudioBackend, param: VoiceParam) {
        if let Some(voice) = self.voice {
            push_param(backend, voice, param);
        }
    }

    /// Follow the attached transform. Only pushes when it moved.
    pub fn sync_transform(&mut self, backend: &mut dyn AudioBackend) {
        let Some(source) = &self.transform else {
            return;
        };
        let position = source.derived_position();
        let orientation = source.derived_orientation();

        let changed = match self.last_transform {
            Some((last_position, last_orientation)) => {
                vec_changed(last_position, position) || quat_changed(last_orientation, orientation)
            }
            None => true,
        };
        if !changed {
            return;
        }

        self.last_transform = Some((position, orientation));
        self.props.position = position;
        self.props.direction = orientation * (-Vec3::Z);
        self.push(backend, VoiceParam::Position(position));
        self.push(backend, VoiceParam::Direction(self.props.direction));
    }

    pub fn set_transform(&mut self, source: Option<Arc<dyn TransformSource>>) {
        self.transform = source;
        self.last_transform = None;
    }

    /// Advance the fade by `dt` seconds and push the new gain.
    pub fn advance_fade(&mut self, dt: f32, backend: &mut dyn AudioBackend) -> Option<FadeStep> {
        let step = self.fade.advance(dt)?;
        self.props.gain = step.gain;
        self.push(backend, VoiceParam::Gain(step.gain));
        Some(step)
    }

    /// Refill streaming buffers or check a static sound for loop and end.
    pub fn update_storage(&mut self, backend: &mut dyn AudioBackend) -> Result<SoundTick> {
        let Some(voice) = self.voice else {
            return Ok(SoundTick::default());
        };
        let looping = self.props.looping;
        let wants_playback = self.state == PlayState::Playing;

        match &mut self.storage {
            SoundStorage::Static(playback) => {
                let tick = playback.update(voice, backend, looping);
                Ok(SoundTick {
                    loops: tick.looped as u32,
                    finished: tick.voice_stopped && wants_playback && !looping,
                    underrun: false,
                })
            }
            SoundStorage::Streaming(feeder) => {
                let tick = feeder.update(voice, backend, looping, wants_playback)?;
                Ok(SoundTick {
                    loops: tick.loops,
                    finished: tick.finished && wants_playback,
                    underrun: tick.underrun,
                })
            }
        }
    }

    pub fn set_looping(&mut self, looping: bool, backend: &mut dyn AudioBackend) {
        self.props.looping = looping;
        // Streaming voices never loop in the backend; the feeder wraps the stream
        if let SoundStorage::Static(_) = self.storage {
            self.push(backend, VoiceParam::Looping(looping));
        }
    }

    pub fn length_secs(&self) -> Option<f32> {
        match &self.storage {
            SoundStorage::Static(playback) => Some(playback.length_secs()),
            SoundStorage::Streaming(feeder) => feeder.length_secs(),
        }
    }

    pub fn position_secs(&self, backend: &dyn AudioBackend) -> f32 {
        match &self.storage {
            SoundStorage::Static(playback) => playback.position_secs(self.voice, backend),
            SoundStorage::Streaming(feeder) => feeder.position_secs(self.voice, backend),
        }
    }

    /// Move playback to `seconds`. The caller validates the range.
    pub fn seek(&mut self, seconds: f32, backend: &mut dyn AudioBackend) -> Result<()> {
        let looping = self.props.looping;
        match &mut self.storage {
            SoundStorage::Static(playback) => playback.seek(seconds, self.voice, backend),
            SoundStorage::Streaming(feeder) => feeder.seek(seconds, self.voice, backend, looping),
        }
    }
}
