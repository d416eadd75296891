use crate::allocator::{SoundMap, VoicePool, VoiceRequest};
use crate::audio_data::StreamOpener;
use crate::backend::{AudioBackend, DistanceModel, VoiceParam};
use crate::cache::StaticBufferCache;
use crate::config::PetalSoundDesc;
use crate::engine::notifications::Notifications;
use crate::error::{PetalSoundError, Result};
use crate::events::PetalSoundEvent;
use crate::listener::Listener;
use crate::math::{Quat, TransformSource, Vec3};
use crate::sound::{
    Fade, FadeAction, PlayState, Sound, SoundCallback, SoundId, SoundInfo, SoundOptions,
    SoundProperties, SoundRef, SoundStorage, StaticPlayback, StreamFeeder,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn unknown(id: SoundId) -> PetalSoundError {
    PetalSoundError::UnknownSound(id.to_string())
}

/// Everything the engine mutates, guarded by one lock.
pub(crate) struct EngineState {
    desc: PetalSoundDesc,
    backend: Box<dyn AudioBackend>,
    opener: Arc<dyn StreamOpener>,
    sounds: SoundMap,
    names: HashMap<String, SoundId>,
    pool: VoicePool,
    cache: StaticBufferCache,
    listener: Listener,
    paused: Vec<SoundId>,
    next_id: u64,
    since_reactivation: Duration,
    notes: Notifications,
    shut_down: bool,
}

impl EngineState {
    pub fn new(
        desc: PetalSoundDesc,
        mut backend: Box<dyn AudioBackend>,
        opener: Arc<dyn StreamOpener>,
    ) -> Result<Self> {
        let pool = VoicePool::new(backend.as_mut(), desc.max_voices)?;
        let listener = Listener::default();

        backend.set_listener(&listener.params());
        backend.set_master_gain(listener.master_gain());
        backend.set_distance_model(desc.distance_model);
        backend.set_doppler_factor(desc.doppler_factor);
        backend.set_speed_of_sound(desc.speed_of_sound);

        Ok(Self {
            desc,
            backend,
            opener,
            sounds: SoundMap::new(),
            names: HashMap::new(),
            pool,
            cache: StaticBufferCache::new(),
            listener,
            paused: Vec::new(),
            next_id: 1,
            since_reactivation: Duration::ZERO,
            notes: Notifications::default(),
            shut_down: false,
        })
    }

    pub fn take_notifications(&mut self) -> Notifications {
        std::mem::take(&mut self.notes)
    }

    pub fn desc(&self) -> &PetalSoundDesc {
        &self.desc
    }

    pub fn resolve(&self, sound: SoundRef<'_>) -> Result<SoundId> {
        match sound {
            SoundRef::Id(id) if self.sounds.contains_key(&id) => Ok(id),
            SoundRef::Name(name) => self
                .names
                .get(name)
                .copied()
                .ok_or_else(|| PetalSoundError::UnknownSound(sound.to_string())),
            SoundRef::Id(id) => Err(unknown(id)),
        }
    }

    fn sound(&self, id: SoundId) -> Result<&Sound> {
        self.sounds.get(&id).ok_or_else(|| unknown(id))
    }

    // ---- Lifecycle ----

    pub fn create_sound(
        &mut self,
        name: &str,
        file: &str,
        options: SoundOptions,
    ) -> Result<SoundId> {
        if self.shut_down {
            return Err(PetalSoundError::Engine("Engine has been shut down".to_string()));
        }
        if self.names.contains_key(name) {
            return Err(PetalSoundError::DuplicateSound(name.to_string()));
        }

        let storage = if options.streaming {
            let stream = self.opener.open(file)?;
            SoundStorage::Streaming(StreamFeeder::new(
                stream,
                self.backend.as_mut(),
                self.desc.stream_buffer_count,
                self.desc.stream_buffer_duration,
            )?)
        } else {
            let asset = self.cache.acquire(
                file,
                self.opener.as_ref(),
                self.backend.as_mut(),
                &self.desc.load_options,
            )?;
            SoundStorage::Static(StaticPlayback::new(file.to_string(), asset))
        };

        let id = SoundId(self.next_id);
        self.next_id += 1;
        let sound = Sound::new(id, name.to_string(), file.to_string(), storage, &options);
        log::debug!(
            "Created {:?} sound '{}' ({}) from '{}'",
            sound.kind(),
            name,
            id,
            file
        );
        self.sounds.insert(id, sound);
        self.names.insert(name.to_string(), id);

        if options.preload {
            let request = self.pool.request_voice(
                id,
                &mut self.sounds,
                self.backend.as_mut(),
                self.listener.position(),
            )?;
            self.finish_ended();
            self.report_grant(id, request);
        }
        Ok(id)
    }

    pub fn destroy_sound(&mut self, id: SoundId) -> Result<()> {
        self.sound(id)?;
        self.pool.release_voice(id, &mut self.sounds, self.backend.as_mut());
        self.pool.dequeue(id);
        self.paused.retain(|p| *p != id);

        let Some(mut sound) = self.sounds.remove(&id) else {
            return Err(unknown(id));
        };
        self.names.remove(&sound.name);
        match &mut sound.storage {
            SoundStorage::Static(playback) => {
                self.cache.release(&playback.asset_name, self.backend.as_mut());
            }
            SoundStorage::Streaming(feeder) => feeder.release(self.backend.as_mut()),
        }
        log::debug!("Destroyed sound '{}' ({})", sound.name, id);
        self.notes.event(PetalSoundEvent::SoundDestroyed { sound_id: id });
        Ok(())
    }

    pub fn get_sound(&self, name: &str) -> Option<SoundId> {
        self.names.get(name).copied()
    }

    pub fn sound_info(&self, id: SoundId) -> Result<SoundInfo> {
        self.sound(id).map(Sound::info)
    }

    pub fn sound_names(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }

    // ---- Transport ----

    /// Emit the events of a voice request and count loop wraps from priming.
    fn report_grant(&mut self, id: SoundId, request: VoiceRequest) {
        if let VoiceRequest::Granted {
            stolen_from, loops, ..
        } = request
        {
            if let Some(victim) = stolen_from {
                self.notes.event(PetalSoundEvent::VoiceStolen {
                    sound_id: victim,
                    by: id,
                });
            }
            self.report_loops(id, loops);
        }
    }

    fn report_loops(&mut self, id: SoundId, loops: u32) {
        let Some(sound) = self.sounds.get_mut(&id) else {
            return;
        };
        for _ in 0..loops {
            sound.loop_count += 1;
            log::debug!("{} looped ({} times)", id, sound.loop_count);
            self.notes.event(PetalSoundEvent::SoundLooped {
                sound_id: id,
                loop_count: sound.loop_count,
            });
            self.notes.callback(sound.on_looped.get(), id);
        }
    }

    pub fn play(&mut self, id: SoundId) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        if sound.state == PlayState::Playing
            && (sound.voice.is_some() || self.pool.is_queued(id))
        {
            return Ok(());
        }
        sound.state = PlayState::Playing;
        self.paused.retain(|p| *p != id);

        let request = self.pool.request_voice(
            id,
            &mut self.sounds,
            self.backend.as_mut(),
            self.listener.position(),
        )?;
        self.finish_ended();
        if request == VoiceRequest::Unavailable {
            // Waits for a voice like a sound that lost one
            self.pool.enqueue(id);
            log::debug!("{} queued, no voice available", id);
            return Ok(());
        }
        self.report_grant(id, request);

        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        let loops = sound.start_voice(self.backend.as_mut())?;
        self.report_loops(id, loops);
        log::debug!("Playing {}", id);
        self.notes.event(PetalSoundEvent::SoundStarted { sound_id: id });
        Ok(())
    }

    pub fn pause(&mut self, id: SoundId) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        if sound.state != PlayState::Playing {
            return Ok(());
        }
        sound.state = PlayState::Paused;
        sound.pause_voice(self.backend.as_mut());
        self.pool.dequeue(id);
        if !self.paused.contains(&id) {
            self.paused.push(id);
        }
        log::debug!("Paused {}", id);
        Ok(())
    }

    pub fn stop(&mut self, id: SoundId) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.state = PlayState::Stopped;
        sound.rewind(self.backend.as_mut());
        let give_up = sound.props.give_up_voice_on_stop;

        self.pool.dequeue(id);
        self.paused.retain(|p| *p != id);
        if give_up {
            self.pool.release_voice(id, &mut self.sounds, self.backend.as_mut());
        }
        log::debug!("Stopped {}", id);
        Ok(())
    }

    /// Natural end of a non-looping sound.
    fn finish(&mut self, id: SoundId) {
        let Some(sound) = self.sounds.get_mut(&id) else {
            return;
        };
        sound.state = PlayState::Stopped;
        sound.rewind(self.backend.as_mut());
        let give_up = sound.props.give_up_voice_on_stop;
        let temporary = sound.temporary;
        log::debug!("{} finished", id);
        self.notes.event(PetalSoundEvent::SoundFinished { sound_id: id });
        self.notes.callback(sound.on_finished.get(), id);

        if temporary {
            if let Err(e) = self.destroy_sound(id) {
                log::warn!("Failed to destroy temporary sound {}: {}", id, e);
            }
        } else if give_up {
            self.pool.release_voice(id, &mut self.sounds, self.backend.as_mut());
        }
    }

    /// Complete sounds whose exhausted voice was taken before an update
    /// could see their end.
    fn finish_ended(&mut self) {
        for id in self.pool.take_finished() {
            self.finish(id);
        }
    }

    pub fn pause_all(&mut self) {
        let playing: Vec<SoundId> = self
            .sounds
            .values()
            .filter(|s| s.state == PlayState::Playing)
            .map(|s| s.id)
            .collect();
        for id in playing {
            if let Err(e) = self.pause(id) {
                log::warn!("Failed to pause {}: {}", id, e);
            }
        }
    }

    pub fn resume_all(&mut self) {
        for id in std::mem::take(&mut self.paused) {
            if let Err(e) = self.play(id) {
                log::warn!("Failed to resume {}: {}", id, e);
            }
        }
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<SoundId> = self.sounds.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.stop(id) {
                log::warn!("Failed to stop {}: {}", id, e);
            }
        }
    }

    // ---- Fades ----

    pub fn start_fade(
        &mut self,
        id: SoundId,
        fade_in: bool,
        duration: f32,
        action: FadeAction,
    ) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.fade = Fade::start(fade_in, duration, sound.props.gain, action);
        if fade_in {
            sound.props.gain = sound.fade.start_gain();
            sound.push(self.backend.as_mut(), VoiceParam::Gain(sound.props.gain));
        }
        let start_playback = fade_in && sound.state != PlayState::Playing;
        log::debug!(
            "{} fading {} over {:.2}s",
            id,
            if fade_in { "in" } else { "out" },
            duration
        );

        if start_playback {
            self.play(id)?;
        }
        if duration <= 0.0 {
            self.advance_fade(id, 0.0);
        }
        Ok(())
    }

    fn advance_fade(&mut self, id: SoundId, dt: f32) {
        let Some(sound) = self.sounds.get_mut(&id) else {
            return;
        };
        let Some(step) = sound.advance_fade(dt, self.backend.as_mut()) else {
            return;
        };
        let Some(action) = step.completed else {
            return;
        };

        self.notes.event(PetalSoundEvent::FadeCompleted { sound_id: id });
        let result = match action {
            FadeAction::None => Ok(()),
            FadeAction::Pause => self.pause(id),
            FadeAction::Stop => self.stop(id),
        };
        if let Err(e) = result {
            log::warn!("Fade action {:?} on {} failed: {}", action, id, e);
        }
    }

    // ---- Properties ----

    /// Update a cached property and push the matching parameter to the voice.
    pub fn modify(
        &mut self,
        id: SoundId,
        change: impl FnOnce(&mut SoundProperties) -> Option<VoiceParam>,
    ) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        if let Some(param) = change(&mut sound.props) {
            sound.push(self.backend.as_mut(), param);
        }
        Ok(())
    }

    pub fn set_looping(&mut self, id: SoundId, looping: bool) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.set_looping(looping, self.backend.as_mut());
        Ok(())
    }

    pub fn properties(&self, id: SoundId) -> Result<SoundProperties> {
        self.sound(id).map(|s| s.props)
    }

    pub fn attach_transform(
        &mut self,
        id: SoundId,
        source: Option<Arc<dyn TransformSource>>,
    ) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.set_transform(source);
        sound.sync_transform(self.backend.as_mut());
        Ok(())
    }

    pub fn set_finished_callback(
        &mut self,
        id: SoundId,
        callback: Option<SoundCallback>,
    ) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.on_finished.set(callback);
        Ok(())
    }

    pub fn set_loop_callback(
        &mut self,
        id: SoundId,
        callback: Option<SoundCallback>,
    ) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.on_looped.set(callback);
        Ok(())
    }

    pub fn enable_finished_callback(&mut self, id: SoundId, enabled: bool) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.on_finished.set_enabled(enabled);
        Ok(())
    }

    pub fn enable_loop_callback(&mut self, id: SoundId, enabled: bool) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.on_looped.set_enabled(enabled);
        Ok(())
    }

    // ---- Position, cue points and loop offset ----

    pub fn play_position(&self, id: SoundId) -> Result<f32> {
        Ok(self.sound(id)?.position_secs(self.backend.as_ref()))
    }

    pub fn set_play_position(&mut self, id: SoundId, seconds: f32) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        let length = sound.length_secs();
        let out_of_range = seconds < 0.0 || length.is_some_and(|length| seconds >= length);
        if out_of_range || !seconds.is_finite() {
            return Err(PetalSoundError::InvalidPosition {
                position: seconds,
                length: length.unwrap_or(0.0),
            });
        }
        sound.seek(seconds, self.backend.as_mut())
    }

    pub fn set_loop_offset(&mut self, id: SoundId, seconds: f32) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        let length = sound.length_secs();
        let SoundStorage::Streaming(feeder) = &mut sound.storage else {
            return Err(PetalSoundError::Unsupported(
                "Loop offsets are only supported on streaming sounds".to_string(),
            ));
        };
        if seconds < 0.0 || length.is_some_and(|length| seconds >= length) {
            return Err(PetalSoundError::InvalidPosition {
                position: seconds,
                length: length.unwrap_or(0.0),
            });
        }
        feeder.set_loop_offset(seconds);
        Ok(())
    }

    pub fn add_cue_point(&mut self, id: SoundId, seconds: f32) -> Result<usize> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.cue_points.push(seconds);
        Ok(sound.cue_points.len() - 1)
    }

    pub fn remove_cue_point(&mut self, id: SoundId, index: usize) -> Result<f32> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        let count = sound.cue_points.len();
        if index >= count {
            return Err(PetalSoundError::InvalidCuePoint { index, count });
        }
        Ok(sound.cue_points.remove(index))
    }

    pub fn clear_cue_points(&mut self, id: SoundId) -> Result<()> {
        let sound = self.sounds.get_mut(&id).ok_or_else(|| unknown(id))?;
        sound.cue_points.clear();
        Ok(())
    }

    pub fn set_cue_point(&mut self, id: SoundId, index: usize) -> Result<()> {
        let sound = self.sound(id)?;
        let count = sound.cue_points.len();
        let seconds = *sound
            .cue_points
            .get(index)
            .ok_or(PetalSoundError::InvalidCuePoint { index, count })?;
        self.set_play_position(id, seconds)
    }

    // ---- Global and listener ----

    pub fn set_master_volume(&mut self, gain: f32) {
        self.listener.set_master_gain(gain, self.backend.as_mut());
    }

    pub fn master_volume(&self) -> f32 {
        self.listener.master_gain()
    }

    pub fn set_distance_model(&mut self, model: DistanceModel) {
        self.desc.distance_model = model;
        self.backend.set_distance_model(model);
    }

    pub fn set_doppler_factor(&mut self, factor: f32) {
        self.desc.doppler_factor = factor.max(0.0);
        self.backend.set_doppler_factor(self.desc.doppler_factor);
    }

    pub fn set_speed_of_sound(&mut self, speed: f32) -> Result<()> {
        if speed <= 0.0 {
            return Err(PetalSoundError::Configuration(format!(
                "Speed of sound must be positive (got {})",
                speed
            )));
        }
        self.desc.speed_of_sound = speed;
        self.backend.set_speed_of_sound(speed);
        Ok(())
    }

    pub fn set_listener_position(&mut self, position: Vec3) {
        self.listener.set_position(position, self.backend.as_mut());
    }

    pub fn set_listener_orientation(&mut self, orientation: Quat) {
        self.listener.set_orientation(orientation, self.backend.as_mut());
    }

    pub fn set_listener_velocity(&mut self, velocity: Vec3) {
        self.listener.set_velocity(velocity, self.backend.as_mut());
    }

    pub fn listener_look_at(&mut self, target: Vec3) {
        self.listener.look_at(target, self.backend.as_mut());
    }

    pub fn listener_pose(&self) -> (Vec3, Quat) {
        (self.listener.position(), self.listener.orientation())
    }

    pub fn attach_listener_transform(&mut self, source: Option<Arc<dyn TransformSource>>) {
        self.listener.attach_transform(source);
        self.listener.update(self.backend.as_mut());
    }

    // ---- Update ----

    /// Per-frame tick. Streaming refills happen here only in cooperative mode.
    pub fn update(&mut self, dt: Duration, refill: bool) {
        let backend = self.backend.as_mut();
        for sound in self.sounds.values_mut() {
            sound.sync_transform(backend);
        }

        let seconds = dt.as_secs_f32();
        for id in self.pool.active().to_vec() {
            self.advance_fade(id, seconds);
            if refill {
                self.update_storage(id);
            }
        }

        self.since_reactivation += dt;
        if self.since_reactivation >= self.desc.reactivation_interval {
            self.since_reactivation = Duration::ZERO;
            self.reactivate();
        }

        self.listener.update(self.backend.as_mut());
    }

    /// One refill pass over every active sound.
    pub fn refill_all(&mut self) {
        for id in self.pool.active().to_vec() {
            self.update_storage(id);
        }
    }

    fn update_storage(&mut self, id: SoundId) {
        let Some(sound) = self.sounds.get_mut(&id) else {
            return;
        };
        if !matches!(sound.state, PlayState::Playing | PlayState::Paused) {
            return;
        }
        let tick = match sound.update_storage(self.backend.as_mut()) {
            Ok(tick) => tick,
            Err(e) => {
                log::warn!("Refill of {} failed: {}", id, e);
                return;
            }
        };

        self.report_loops(id, tick.loops);
        if tick.underrun {
            self.notes.event(PetalSoundEvent::BufferUnderrun { sound_id: id });
        }
        if tick.finished {
            self.finish(id);
        }
    }

    /// Hand a voice back to the most deserving queued sound, if any.
    pub fn reactivate(&mut self) {
        let result = self.pool.reactivate_queued(
            &mut self.sounds,
            self.backend.as_mut(),
            self.listener.position(),
        );
        self.finish_ended();
        let (id, request) = match result {
            Ok(Some(granted)) => granted,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Reactivation failed: {}", e);
                return;
            }
        };

        self.report_grant(id, request);
        let Some(sound) = self.sounds.get_mut(&id) else {
            return;
        };
        match sound.start_voice(self.backend.as_mut()) {
            Ok(loops) => {
                log::debug!("Reactivated {}", id);
                self.report_loops(id, loops);
                self.notes.event(PetalSoundEvent::SoundReactivated { sound_id: id });
            }
            Err(e) => log::warn!("Failed to resume reactivated {}: {}", id, e),
        }
    }

    // ---- Statistics ----

    pub fn active_sounds(&self) -> Vec<SoundId> {
        self.pool.active().to_vec()
    }

    pub fn queued_sounds(&self) -> Vec<SoundId> {
        self.pool.queued().to_vec()
    }

    pub fn paused_sounds(&self) -> Vec<SoundId> {
        self.paused.clone()
    }

    pub fn free_voices(&self) -> usize {
        self.pool.free_count()
    }

    pub fn voice_count(&self) -> usize {
        self.pool.voice_count()
    }

    pub fn sound_count(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_cached(&self, file: &str) -> bool {
        self.cache.contains(file)
    }

    pub fn cached_buffers(&self) -> usize {
        self.cache.len()
    }

    // ---- Shutdown ----

    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.stop_all();
        self.pool.shutdown(&mut self.sounds, self.backend.as_mut());
        for (_, mut sound) in self.sounds.drain() {
            if let SoundStorage::Streaming(feeder) = &mut sound.storage {
                feeder.release(self.backend.as_mut());
            }
        }
        self.names.clear();
        self.paused.clear();
        self.cache.clear(self.backend.as_mut());
        log::info!("PetalSound engine shut down");
    }
}
