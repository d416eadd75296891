mod notifications;
mod state;
#[cfg(test)]
mod tests;

use crate::audio_data::{StreamOpener, SymphoniaOpener};
use crate::backend::{AudioBackend, DistanceModel, MixerHandle, OutputDevice, SoftwareMixer, VoiceParam};
use crate::config::{PetalSoundDesc, SchedulingMode};
use crate::error::Result;
use crate::events::PetalSoundEvent;
use crate::math::{Quat, TransformSource, Vec3};
use crate::scheduler::StreamingThread;
use crate::sound::{
    FadeAction, SoundCallback, SoundId, SoundInfo, SoundOptions, SoundProperties, SoundRef,
};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use state::EngineState;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of the engine's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub sounds: usize,
    pub active_sounds: usize,
    pub queued_sounds: usize,
    pub paused_sounds: usize,
    pub free_voices: usize,
    pub voice_count: usize,
    pub cached_buffers: usize,
}

/// The sound manager.
///
/// `PetalSoundEngine` owns every sound, the voice pool, the static buffer
/// cache and the listener. Create sounds by name, drive it with
/// [`update`](Self::update) once per frame, and drain
/// [`poll_events`](Self::poll_events) to learn what happened.
///
/// # Architecture
///
/// - **Caller thread**: creates and controls sounds, calls `update`
/// - **Streaming thread** (optional): refills streaming buffers on its own cadence
/// - **Device thread** (with an [`OutputDevice`]): renders the software mixer
///
/// All mutable state lives behind one lock. Finished and loop callbacks run
/// after that lock is released.
pub struct PetalSoundEngine {
    state: Arc<Mutex<EngineState>>,
    events_tx: Sender<PetalSoundEvent>,
    events_rx: Receiver<PetalSoundEvent>,
    streaming_thread: Option<StreamingThread>,
    output: Option<OutputDevice>,
}

impl PetalSoundEngine {
    /// Create an engine on top of `backend`, loading assets through `opener`.
    ///
    /// Up to `desc.max_voices` voices are created immediately. In
    /// [`SchedulingMode::Background`] the streaming thread is started too.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is invalid, the backend cannot
    /// create a single voice, or the streaming thread fails to spawn.
    pub fn new(
        desc: PetalSoundDesc,
        backend: Box<dyn AudioBackend>,
        opener: Arc<dyn StreamOpener>,
    ) -> Result<Self> {
        desc.validate()?;
        let scheduling = desc.scheduling;
        let interval = desc.background_interval;

        let state = Arc::new(Mutex::new(EngineState::new(desc, backend, opener)?));
        let (events_tx, events_rx) = unbounded();

        let streaming_thread = match scheduling {
            SchedulingMode::Cooperative => None,
            SchedulingMode::Background => {
                let state = Arc::clone(&state);
                let events = events_tx.clone();
                Some(StreamingThread::spawn(interval, move || {
                    let notes = {
                        let mut state = state.lock();
                        state.refill_all();
                        state.take_notifications()
                    };
                    if !notes.is_empty() {
                        notes.dispatch(&events);
                    }
                })?)
            }
        };

        log::info!(
            "PetalSound engine initialized ({:?} scheduling)",
            scheduling
        );

        Ok(Self {
            state,
            events_tx,
            events_rx,
            streaming_thread,
            output: None,
        })
    }

    /// Create an engine that renders through the software mixer to the
    /// default output device and reads files with symphonia.
    pub fn with_default_output(desc: PetalSoundDesc) -> Result<Self> {
        let mixer = MixerHandle::new(
            SoftwareMixer::new(desc.sample_rate, desc.channels).with_max_voices(desc.max_voices),
        );
        let mut output = OutputDevice::new(mixer.clone(), &desc);
        let mut engine = Self::new(desc, Box::new(mixer), Arc::new(SymphoniaOpener))?;
        output.start()?;
        engine.output = Some(output);
        Ok(engine)
    }

    /// Run `f` under the lock, then deliver what it produced.
    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let (result, notes) = {
            let mut state = self.state.lock();
            let result = f(&mut *state);
            (result, state.take_notifications())
        };
        notes.dispatch(&self.events_tx);
        result
    }

    /// Like [`with_state`](Self::with_state) for a sound addressed by id or name.
    fn with_sound<'a, T>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        f: impl FnOnce(&mut EngineState, SoundId) -> Result<T>,
    ) -> Result<T> {
        let sound = sound.into();
        self.with_state(|state| {
            let id = state.resolve(sound)?;
            f(state, id)
        })
    }

    fn modify<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        change: impl FnOnce(&mut SoundProperties) -> Option<VoiceParam>,
    ) -> Result<()> {
        self.with_sound(sound, |state, id| state.modify(id, change))
    }

    // ---- Sounds ----

    /// Creates a sound named `name` playing `file`.
    ///
    /// Static sounds decode `file` once into a buffer shared with every other
    /// static sound of the same file. Streaming sounds open their own stream.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSound`](crate::PetalSoundError::DuplicateSound) if the
    /// name is taken, or a loading error if `file` cannot be opened or decoded.
    pub fn create_sound(&self, name: &str, file: &str, options: SoundOptions) -> Result<SoundId> {
        self.with_state(|state| state.create_sound(name, file, options))
    }

    /// Looks up a sound by name.
    pub fn get_sound(&self, name: &str) -> Option<SoundId> {
        self.state.lock().get_sound(name)
    }

    pub fn sound_info<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<SoundInfo> {
        let sound = sound.into();
        let state = self.state.lock();
        state.sound_info(state.resolve(sound)?)
    }

    pub fn sound_names(&self) -> Vec<String> {
        self.state.lock().sound_names()
    }

    /// Destroys a sound, returning its voice and releasing its buffers.
    pub fn destroy_sound<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| state.destroy_sound(id))
    }

    // ---- Transport ----

    /// Starts or resumes a sound. Playing an already playing sound does nothing.
    ///
    /// If no voice can be found the sound waits on the reactivation queue and
    /// starts once one frees up.
    pub fn play<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| state.play(id))
    }

    pub fn pause<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| state.pause(id))
    }

    /// Stops a sound and rewinds it. With
    /// [`set_give_up_voice_on_stop`](Self::set_give_up_voice_on_stop) the voice
    /// goes straight back to the pool.
    pub fn stop<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| state.stop(id))
    }

    pub fn pause_all(&self) {
        let _ = self.with_state(|state| {
            state.pause_all();
            Ok(())
        });
    }

    /// Resumes every sound paused through `pause` or `pause_all`.
    pub fn resume_all(&self) {
        let _ = self.with_state(|state| {
            state.resume_all();
            Ok(())
        });
    }

    pub fn stop_all(&self) {
        let _ = self.with_state(|state| {
            state.stop_all();
            Ok(())
        });
    }

    /// Ramps the gain linearly to 1.0 (`fade_in`) or 0.0 over `duration`
    /// seconds, then runs `action`. Fading in a sound that is not playing
    /// starts it.
    pub fn start_fade<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        fade_in: bool,
        duration: f32,
        action: FadeAction,
    ) -> Result<()> {
        self.with_sound(sound, |state, id| {
            state.start_fade(id, fade_in, duration, action)
        })
    }

    // ---- Properties ----

    pub fn properties<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<SoundProperties> {
        self.with_sound(sound, |state, id| state.properties(id))
    }

    pub fn set_position<'a>(&self, sound: impl Into<SoundRef<'a>>, position: Vec3) -> Result<()> {
        self.modify(sound, |p| {
            p.position = position;
            Some(VoiceParam::Position(position))
        })
    }

    pub fn set_direction<'a>(&self, sound: impl Into<SoundRef<'a>>, direction: Vec3) -> Result<()> {
        self.modify(sound, |p| {
            p.direction = direction;
            Some(VoiceParam::Direction(direction))
        })
    }

    pub fn set_velocity<'a>(&self, sound: impl Into<SoundRef<'a>>, velocity: Vec3) -> Result<()> {
        self.modify(sound, |p| {
            p.velocity = velocity;
            Some(VoiceParam::Velocity(velocity))
        })
    }

    /// Interpret the position in listener space instead of world space.
    pub fn set_relative_to_listener<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        relative: bool,
    ) -> Result<()> {
        self.modify(sound, |p| {
            p.relative_to_listener = relative;
            Some(VoiceParam::Relative(relative))
        })
    }

    pub fn set_gain<'a>(&self, sound: impl Into<SoundRef<'a>>, gain: f32) -> Result<()> {
        let gain = gain.max(0.0);
        self.modify(sound, |p| {
            p.gain = gain;
            Some(VoiceParam::Gain(gain))
        })
    }

    pub fn set_min_gain<'a>(&self, sound: impl Into<SoundRef<'a>>, gain: f32) -> Result<()> {
        let gain = gain.clamp(0.0, 1.0);
        self.modify(sound, |p| {
            p.min_gain = gain;
            Some(VoiceParam::MinGain(gain))
        })
    }

    pub fn set_max_gain<'a>(&self, sound: impl Into<SoundRef<'a>>, gain: f32) -> Result<()> {
        let gain = gain.clamp(0.0, 1.0);
        self.modify(sound, |p| {
            p.max_gain = gain;
            Some(VoiceParam::MaxGain(gain))
        })
    }

    /// Non-positive pitches are ignored.
    pub fn set_pitch<'a>(&self, sound: impl Into<SoundRef<'a>>, pitch: f32) -> Result<()> {
        self.modify(sound, |p| {
            if pitch <= 0.0 {
                log::warn!("Ignoring invalid pitch {}", pitch);
                return None;
            }
            p.pitch = pitch;
            Some(VoiceParam::Pitch(pitch))
        })
    }

    pub fn set_rolloff_factor<'a>(&self, sound: impl Into<SoundRef<'a>>, rolloff: f32) -> Result<()> {
        let rolloff = rolloff.max(0.0);
        self.modify(sound, |p| {
            p.rolloff_factor = rolloff;
            Some(VoiceParam::RolloffFactor(rolloff))
        })
    }

    pub fn set_reference_distance<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        distance: f32,
    ) -> Result<()> {
        let distance = distance.max(0.0);
        self.modify(sound, |p| {
            p.reference_distance = distance;
            Some(VoiceParam::ReferenceDistance(distance))
        })
    }

    pub fn set_max_distance<'a>(&self, sound: impl Into<SoundRef<'a>>, distance: f32) -> Result<()> {
        let distance = distance.max(0.0);
        self.modify(sound, |p| {
            p.max_distance = distance;
            Some(VoiceParam::MaxDistance(distance))
        })
    }

    /// Sets the sound cone. Angles are in degrees.
    pub fn set_cone<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        inner_angle: f32,
        outer_angle: f32,
        outer_gain: f32,
    ) -> Result<()> {
        let inner = inner_angle.clamp(0.0, 360.0);
        let outer = outer_angle.clamp(0.0, 360.0);
        let outer_gain = outer_gain.clamp(0.0, 1.0);
        self.with_sound(sound, |state, id| {
            state.modify(id, |p| {
                p.cone_inner_angle = inner;
                Some(VoiceParam::ConeInnerAngle(inner))
            })?;
            state.modify(id, |p| {
                p.cone_outer_angle = outer;
                Some(VoiceParam::ConeOuterAngle(outer))
            })?;
            state.modify(id, |p| {
                p.cone_outer_gain = outer_gain;
                Some(VoiceParam::ConeOuterGain(outer_gain))
            })
        })
    }

    /// Higher priorities keep their voice when voices run out.
    pub fn set_priority<'a>(&self, sound: impl Into<SoundRef<'a>>, priority: u8) -> Result<()> {
        self.modify(sound, |p| {
            p.priority = priority;
            None
        })
    }

    pub fn set_looping<'a>(&self, sound: impl Into<SoundRef<'a>>, looping: bool) -> Result<()> {
        self.with_sound(sound, |state, id| state.set_looping(id, looping))
    }

    pub fn set_give_up_voice_on_stop<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        give_up: bool,
    ) -> Result<()> {
        self.modify(sound, |p| {
            p.give_up_voice_on_stop = give_up;
            None
        })
    }

    /// Make the sound follow `source`. Checked on every update.
    pub fn attach_transform<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        source: Arc<dyn TransformSource>,
    ) -> Result<()> {
        self.with_sound(sound, |state, id| state.attach_transform(id, Some(source)))
    }

    pub fn detach_transform<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| state.attach_transform(id, None))
    }

    // ---- Callbacks ----

    /// Called when a non-looping sound reaches its end. Registering enables it.
    pub fn set_finished_callback<'a, F>(&self, sound: impl Into<SoundRef<'a>>, callback: F) -> Result<()>
    where
        F: Fn(SoundId) + Send + Sync + 'static,
    {
        let callback: SoundCallback = Arc::new(callback);
        self.with_sound(sound, |state, id| {
            state.set_finished_callback(id, Some(callback))
        })
    }

    /// Called each time a looping sound wraps. Streaming sounds report the
    /// wrap when the stream is read, slightly ahead of the audible loop.
    pub fn set_loop_callback<'a, F>(&self, sound: impl Into<SoundRef<'a>>, callback: F) -> Result<()>
    where
        F: Fn(SoundId) + Send + Sync + 'static,
    {
        let callback: SoundCallback = Arc::new(callback);
        self.with_sound(sound, |state, id| state.set_loop_callback(id, Some(callback)))
    }

    pub fn clear_callbacks<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| {
            state.set_finished_callback(id, None)?;
            state.set_loop_callback(id, None)
        })
    }

    pub fn enable_finished_callback<'a>(
        &self,
        sound: impl Into<SoundRef<'a>>,
        enabled: bool,
    ) -> Result<()> {
        self.with_sound(sound, |state, id| state.enable_finished_callback(id, enabled))
    }

    pub fn enable_loop_callback<'a>(&self, sound: impl Into<SoundRef<'a>>, enabled: bool) -> Result<()> {
        self.with_sound(sound, |state, id| state.enable_loop_callback(id, enabled))
    }

    // ---- Position ----

    /// Current playback position in seconds.
    pub fn play_position<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<f32> {
        self.with_sound(sound, |state, id| state.play_position(id))
    }

    /// # Errors
    ///
    /// Returns [`InvalidPosition`](crate::PetalSoundError::InvalidPosition) if
    /// `seconds` is negative or past the end of the sound.
    pub fn set_play_position<'a>(&self, sound: impl Into<SoundRef<'a>>, seconds: f32) -> Result<()> {
        self.with_sound(sound, |state, id| state.set_play_position(id, seconds))
    }

    /// Where a looping streaming sound restarts after reaching its end.
    ///
    /// # Errors
    ///
    /// Static sounds always loop their whole buffer and return
    /// [`Unsupported`](crate::PetalSoundError::Unsupported).
    pub fn set_loop_offset<'a>(&self, sound: impl Into<SoundRef<'a>>, seconds: f32) -> Result<()> {
        self.with_sound(sound, |state, id| state.set_loop_offset(id, seconds))
    }

    /// Appends a cue point and returns its index.
    pub fn add_cue_point<'a>(&self, sound: impl Into<SoundRef<'a>>, seconds: f32) -> Result<usize> {
        self.with_sound(sound, |state, id| state.add_cue_point(id, seconds))
    }

    pub fn remove_cue_point<'a>(&self, sound: impl Into<SoundRef<'a>>, index: usize) -> Result<f32> {
        self.with_sound(sound, |state, id| state.remove_cue_point(id, index))
    }

    pub fn clear_cue_points<'a>(&self, sound: impl Into<SoundRef<'a>>) -> Result<()> {
        self.with_sound(sound, |state, id| state.clear_cue_points(id))
    }

    /// Seeks to cue point `index`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCuePoint`](crate::PetalSoundError::InvalidCuePoint)
    /// if there is no such cue point.
    pub fn set_cue_point<'a>(&self, sound: impl Into<SoundRef<'a>>, index: usize) -> Result<()> {
        self.with_sound(sound, |state, id| state.set_cue_point(id, index))
    }

    // ---- Global ----

    pub fn set_master_volume(&self, gain: f32) {
        self.state.lock().set_master_volume(gain);
    }

    pub fn master_volume(&self) -> f32 {
        self.state.lock().master_volume()
    }

    pub fn set_distance_model(&self, model: DistanceModel) {
        self.state.lock().set_distance_model(model);
    }

    pub fn set_doppler_factor(&self, factor: f32) {
        self.state.lock().set_doppler_factor(factor);
    }

    pub fn set_speed_of_sound(&self, speed: f32) -> Result<()> {
        self.state.lock().set_speed_of_sound(speed)
    }

    pub fn config(&self) -> PetalSoundDesc {
        self.state.lock().desc().clone()
    }

    // ---- Listener ----

    pub fn set_listener_position(&self, position: Vec3) {
        self.state.lock().set_listener_position(position);
    }

    pub fn set_listener_orientation(&self, orientation: Quat) {
        self.state.lock().set_listener_orientation(orientation);
    }

    pub fn set_listener_velocity(&self, velocity: Vec3) {
        self.state.lock().set_listener_velocity(velocity);
    }

    /// Turns the listener to face `target`.
    pub fn listener_look_at(&self, target: Vec3) {
        self.state.lock().listener_look_at(target);
    }

    pub fn listener_pose(&self) -> (Vec3, Quat) {
        self.state.lock().listener_pose()
    }

    /// Make the listener follow `source` (a camera, usually).
    pub fn attach_listener_transform(&self, source: Arc<dyn TransformSource>) {
        self.state.lock().attach_listener_transform(Some(source));
    }

    pub fn detach_listener_transform(&self) {
        self.state.lock().attach_listener_transform(None);
    }

    // ---- Update ----

    /// Advance the engine by `dt`: follow transforms, step fades, refill
    /// streams (in cooperative mode), reactivate queued sounds and update the
    /// listener.
    pub fn update(&self, dt: Duration) {
        let refill = self.streaming_thread.is_none();
        let _ = self.with_state(|state| {
            state.update(dt, refill);
            Ok(())
        });
    }

    /// Drains every event emitted since the last call.
    pub fn poll_events(&self) -> Vec<PetalSoundEvent> {
        self.events_rx.try_iter().collect()
    }

    /// A receiver for consuming events on another thread.
    pub fn events(&self) -> Receiver<PetalSoundEvent> {
        self.events_rx.clone()
    }

    // ---- Statistics ----

    /// Sounds currently holding a voice, in the order they got it.
    pub fn active_sounds(&self) -> Vec<SoundId> {
        self.state.lock().active_sounds()
    }

    /// Sounds waiting for a voice.
    pub fn queued_sounds(&self) -> Vec<SoundId> {
        self.state.lock().queued_sounds()
    }

    pub fn paused_sounds(&self) -> Vec<SoundId> {
        self.state.lock().paused_sounds()
    }

    pub fn free_voices(&self) -> usize {
        self.state.lock().free_voices()
    }

    pub fn voice_count(&self) -> usize {
        self.state.lock().voice_count()
    }

    /// Whether a static buffer for `file` is currently cached.
    pub fn is_cached(&self, file: &str) -> bool {
        self.state.lock().is_cached(file)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            sounds: state.sound_count(),
            active_sounds: state.active_sounds().len(),
            queued_sounds: state.queued_sounds().len(),
            paused_sounds: state.paused_sounds().len(),
            free_voices: state.free_voices(),
            voice_count: state.voice_count(),
            cached_buffers: state.cached_buffers(),
        }
    }

    pub fn output_device(&self) -> Option<&OutputDevice> {
        self.output.as_ref()
    }

    // ---- Shutdown ----

    /// Stop the streaming thread, then every sound, and release all voices
    /// and buffers. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut thread) = self.streaming_thread.take() {
            thread.stop();
        }
        let _ = self.with_state(|state| {
            state.shutdown();
            Ok(())
        });
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
    }
}

impl Drop for PetalSoundEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
