//! Voice pool and allocator.
//!
//! A small, fixed set of backend voices is shared by any number of sounds.
//! When the pool runs dry a request may take a voice away from another
//! sound, in this order:
//!
//! 1. an active sound that is stopped or whose voice has run dry,
//! 2. the lowest-priority active sound below the requester (farthest first
//!    among equals),
//! 3. the farthest active sound, whatever its priority, if the requester is
//!    closer to the listener.
//!
//! Sounds that lose their voice while they still want to play wait on the
//! reactivation queue until [`VoicePool::reactivate_queued`] hands them a
//! voice again. A sound whose voice had already played everything is not
//! queued; it is reported through [`VoicePool::take_finished`] instead.

use crate::backend::{AudioBackend, VoiceId, VoiceState};
use crate::error::{PetalSoundError, Result};
use crate::math::Vec3;
use crate::sound::{PlayState, Sound, SoundId};
use std::cmp::Ordering;
use std::collections::HashMap;

pub(crate) type SoundMap = HashMap<SoundId, Sound>;

/// Outcome of [`VoicePool::request_voice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoiceRequest {
    /// The sound already had this voice
    Held(VoiceId),
    Granted {
        voice: VoiceId,
        /// Sound the voice was taken from
        stolen_from: Option<SoundId>,
        /// Loop wraps hit while loading a streaming sound
        loops: u32,
    },
    /// Every rule failed
    Unavailable,
}

pub(crate) struct VoicePool {
    voices: Vec<VoiceId>,
    free: Vec<VoiceId>,
    active: Vec<SoundId>,
    queue: Vec<SoundId>,
    /// Victims that had reached their end when their voice was taken
    finished: Vec<SoundId>,
}

impl VoicePool {
    /// Create up to `max_voices` voices. A backend that runs out early
    /// leaves a smaller pool; one without any voice is an error.
    pub fn new(backend: &mut dyn AudioBackend, max_voices: usize) -> Result<Self> {
        let mut voices = Vec::with_capacity(max_voices);
        for _ in 0..max_voices {
            match backend.create_voice() {
                Ok(voice) => voices.push(voice),
                Err(e) => {
                    log::warn!(
                        "Backend provided only {} of {} voices: {}",
                        voices.len(),
                        max_voices,
                        e
                    );
                    break;
                }
            }
        }
        if voices.is_empty() {
            return Err(PetalSoundError::Backend(
                "Backend could not create any voice".to_string(),
            ));
        }

        log::info!("Voice pool created with {} voices", voices.len());
        Ok(Self {
            free: voices.iter().rev().copied().collect(),
            voices,
            active: Vec::new(),
            queue: Vec::new(),
            finished: Vec::new(),
        })
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn active(&self) -> &[SoundId] {
        &self.active
    }

    pub fn queued(&self) -> &[SoundId] {
        &self.queue
    }

    pub fn is_queued(&self, id: SoundId) -> bool {
        self.queue.contains(&id)
    }

    /// Sounds that lost an exhausted voice since the last call. The caller
    /// completes them as if their end had been seen by an update.
    pub fn take_finished(&mut self) -> Vec<SoundId> {
        std::mem::take(&mut self.finished)
    }

    pub fn enqueue(&mut self, id: SoundId) {
        if !self.queue.contains(&id) && !self.active.contains(&id) {
            self.queue.push(id);
        }
    }

    pub fn dequeue(&mut self, id: SoundId) {
        self.queue.retain(|queued| *queued != id);
    }

    /// Get a voice for `requester`, preempting another sound if needed.
    pub fn request_voice(
        &mut self,
        requester: SoundId,
        sounds: &mut SoundMap,
        backend: &mut dyn AudioBackend,
        listener: Vec3,
    ) -> Result<VoiceRequest> {
        let mut stolen_from = None;

        loop {
            let sound = sounds
                .get_mut(&requester)
                .ok_or_else(|| PetalSoundError::UnknownSound(requester.to_string()))?;
            if let Some(voice) = sound.voice {
                return Ok(VoiceRequest::Held(voice));
            }

            if let Some(voice) = self.free.pop() {
                let loops = match sound.attach_voice(voice, backend) {
                    Ok(loops) => loops,
                    Err(e) => {
                        sound.detach_voice(backend);
                        self.free.push(voice);
                        return Err(e);
                    }
                };
                self.active.push(requester);
                self.dequeue(requester);
                log::debug!("{} granted {}", requester, voice);
                return Ok(VoiceRequest::Granted {
                    voice,
                    stolen_from,
                    loops,
                });
            }

            let Some(victim) = self.find_victim(requester, sounds, backend, listener) else {
                log::debug!("No voice available for {}", requester);
                return Ok(VoiceRequest::Unavailable);
            };
            self.steal(victim, sounds, backend);
            stolen_from = Some(victim);
        }
    }

    fn find_victim(
        &self,
        requester: SoundId,
        sounds: &SoundMap,
        backend: &dyn AudioBackend,
        listener: Vec3,
    ) -> Option<SoundId> {
        let wanted = sounds.get(&requester)?;
        let priority = wanted.props.priority;
        let distance = wanted.distance_to(listener);

        let candidates = self
            .active
            .iter()
            .filter(|id| **id != requester)
            .filter_map(|id| sounds.get(id).map(|s| (*id, s)));

        // A sound that is not playing, or whose voice ran out, gives up first
        if let Some((id, _)) = candidates.clone().find(|(_, s)| {
            matches!(s.state, PlayState::Initial | PlayState::Stopped)
                || s.voice
                    .is_some_and(|v| backend.voice_state(v) == VoiceState::Stopped)
        }) {
            return Some(id);
        }

        let farthest_first = |a: &(SoundId, f32), b: &(SoundId, f32)| {
            b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal)
        };

        // Lowest priority strictly below ours, farthest among equals
        let lowest = candidates
            .clone()
            .filter(|(_, s)| s.props.priority < priority)
            .min_by(|(_, a), (_, b)| {
                a.props.priority.cmp(&b.props.priority).then_with(|| {
                    b.distance_to(listener)
                        .partial_cmp(&a.distance_to(listener))
                        .unwrap_or(Ordering::Equal)
                })
            });
        if let Some((id, _)) = lowest {
            return Some(id);
        }

        // Farthest sound of any priority, if we are closer
        let mut by_distance: Vec<(SoundId, f32)> = candidates
            .map(|(id, s)| (id, s.distance_to(listener)))
            .collect();
        by_distance.sort_by(farthest_first);
        by_distance
            .first()
            .filter(|(_, farthest)| distance < *farthest)
            .map(|(id, _)| *id)
    }

    /// Take the voice away from `victim` and return it to the free list.
    fn steal(&mut self, victim: SoundId, sounds: &mut SoundMap, backend: &mut dyn AudioBackend) {
        self.active.retain(|id| *id != victim);
        let Some(sound) = sounds.get_mut(&victim) else {
            return;
        };
        let ended = sound.playback_ended(backend);
        if let Some(voice) = sound.detach_voice(backend) {
            log::debug!("Stole {} from {}", voice, victim);
            self.free.push(voice);
        }
        if sound.state != PlayState::Playing {
            return;
        }
        if ended {
            self.finished.push(victim);
        } else {
            self.enqueue(victim);
        }
    }

    /// Stop `id` and return its voice to the pool. No-op without a voice.
    pub fn release_voice(
        &mut self,
        id: SoundId,
        sounds: &mut SoundMap,
        backend: &mut dyn AudioBackend,
    ) {
        self.active.retain(|active| *active != id);
        let Some(sound) = sounds.get_mut(&id) else {
            return;
        };
        if sound.voice.is_none() {
            return;
        }
        sound.rewind(backend);
        if let Some(voice) = sound.detach_voice(backend) {
            log::debug!("{} released {}", id, voice);
            self.free.push(voice);
        }
    }

    /// Try to give a voice back to the most deserving queued sound.
    ///
    /// The queue is ordered by priority, then by distance to the listener.
    /// Only the head is attempted. Returns the sound that got a voice.
    pub fn reactivate_queued(
        &mut self,
        sounds: &mut SoundMap,
        backend: &mut dyn AudioBackend,
        listener: Vec3,
    ) -> Result<Option<(SoundId, VoiceRequest)>> {
        self.queue.retain(|id| {
            sounds
                .get(id)
                .is_some_and(|s| s.voice.is_none() && s.state == PlayState::Playing)
        });
        if self.queue.is_empty() {
            return Ok(None);
        }

        self.queue.sort_by(|a, b| {
            let (a, b) = (&sounds[a], &sounds[b]);
            b.props.priority.cmp(&a.props.priority).then_with(|| {
                a.distance_to(listener)
                    .partial_cmp(&b.distance_to(listener))
                    .unwrap_or(Ordering::Equal)
            })
        });

        let head = self.queue[0];
        match self.request_voice(head, sounds, backend, listener)? {
            request @ VoiceRequest::Granted { .. } => Ok(Some((head, request))),
            VoiceRequest::Held(_) => {
                self.dequeue(head);
                Ok(None)
            }
            VoiceRequest::Unavailable => Ok(None),
        }
    }

    /// Release every voice held by a sound, then destroy the pool.
    pub fn shutdown(&mut self, sounds: &mut SoundMap, backend: &mut dyn AudioBackend) {
        for id in std::mem::take(&mut self.active) {
            self.release_voice(id, sounds, backend);
        }
        self.queue.clear();
        self.finished.clear();
        for voice in self.voices.drain(..) {
            backend.destroy_voice(voice);
        }
        self.free.clear();
    }

    /// Every voice is either free or held by exactly one active sound.
    #[cfg(test)]
    fn check_invariants(&self, sounds: &SoundMap) {
        let mut held: Vec<VoiceId> = self
            .active
            .iter()
            .filter_map(|id| sounds[id].voice)
            .collect();
        let before = held.len();
        held.sort();
        held.dedup();
        assert_eq!(before, held.len(), "voice held by two sounds");
        assert!(held.iter().all(|v| !self.free.contains(v)));
        assert_eq!(held.len() + self.free.len(), self.voices.len());
        assert!(self.queue.iter().all(|id| !self.active.contains(id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::{LoadOptions, MemoryOpener};
    use crate::backend::SoftwareMixer;
    use crate::cache::StaticBufferCache;
    use crate::sound::{SoundOptions, SoundStorage, StaticPlayback};

    struct Harness {
        mixer: SoftwareMixer,
        cache: StaticBufferCache,
        opener: MemoryOpener,
        sounds: SoundMap,
        pool: VoicePool,
    }

    impl Harness {
        fn new(voices: usize) -> Self {
            let mut mixer = SoftwareMixer::new(8000, 2);
            let opener = MemoryOpener::new();
            opener.insert_i16("tone", &[1000i16; 8000], 1, 8000);
            let pool = VoicePool::new(&mut mixer, voices).unwrap();
            Self {
                mixer,
                cache: StaticBufferCache::new(),
                opener,
                sounds: SoundMap::new(),
                pool,
            }
        }

        fn add(&mut self, id: u64, priority: u8, position: Vec3) -> SoundId {
            let id = SoundId(id);
            let asset = self
                .cache
                .acquire("tone", &self.opener, &mut self.mixer, &LoadOptions::default())
                .unwrap();
            let options = SoundOptions::new().priority(priority);
            let mut sound = Sound::new(
                id,
                format!("sound{}", id.0),
                "tone".into(),
                SoundStorage::Static(StaticPlayback::new("tone".into(), asset)),
                &options,
            );
            sound.props.position = position;
            self.sounds.insert(id, sound);
            id
        }

        fn play(&mut self, id: SoundId) -> VoiceRequest {
            let result = self
                .pool
                .request_voice(id, &mut self.sounds, &mut self.mixer, Vec3::ZERO)
                .unwrap();
            let sound = self.sounds.get_mut(&id).unwrap();
            sound.state = PlayState::Playing;
            sound.start_voice(&mut self.mixer).unwrap();
            self.pool.check_invariants(&self.sounds);
            result
        }
    }

    #[test]
    fn request_is_idempotent() {
        let mut h = Harness::new(2);
        let a = h.add(1, 5, Vec3::ZERO);
        let first = h.play(a);
        let VoiceRequest::Granted { voice, .. } = first else {
            panic!("expected a grant, got {:?}", first);
        };
        assert_eq!(h.play(a), VoiceRequest::Held(voice));
        assert_eq!(h.pool.free_count(), 1);
    }

    #[test]
    fn lowest_priority_sound_is_preempted() {
        let mut h = Harness::new(2);
        let a = h.add(1, 5, Vec3::ZERO);
        let b = h.add(2, 1, Vec3::ZERO);
        let c = h.add(3, 10, Vec3::ZERO);

        h.play(a);
        h.play(b);
        assert_eq!(h.pool.free_count(), 0);

        let result = h.play(c);
        assert!(matches!(
            result,
            VoiceRequest::Granted {
                stolen_from: Some(id),
                ..
            } if id == b
        ));
        assert_eq!(h.pool.active(), &[a, c]);
        assert_eq!(h.pool.queued(), &[b]);
        assert!(h.sounds[&b].voice.is_none());
    }

    #[test]
    fn priority_ties_are_broken_by_distance() {
        let mut h = Harness::new(2);
        let near = h.add(1, 1, Vec3::new(1.0, 0.0, 0.0));
        let far = h.add(2, 1, Vec3::new(50.0, 0.0, 0.0));
        let important = h.add(3, 9, Vec3::new(100.0, 0.0, 0.0));
        h.play(near);
        h.play(far);

        h.play(important);
        assert!(h.pool.is_queued(far));
        assert!(h.sounds[&near].voice.is_some());
    }

    #[test]
    fn stopped_voice_is_taken_first() {
        let mut h = Harness::new(2);
        let a = h.add(1, 9, Vec3::ZERO);
        let b = h.add(2, 9, Vec3::ZERO);
        let c = h.add(3, 0, Vec3::new(500.0, 0.0, 0.0));
        h.play(a);
        h.play(b);

        // b stops but keeps its voice
        let voice = h.sounds[&b].voice.unwrap();
        h.mixer.stop(voice);
        h.sounds.get_mut(&b).unwrap().state = PlayState::Stopped;

        let result = h.play(c);
        assert!(matches!(
            result,
            VoiceRequest::Granted { stolen_from: Some(id), .. } if id == b
        ));
        // Stopped sounds do not want their voice back
        assert!(!h.pool.is_queued(b));
    }

    #[test]
    fn closer_sound_of_equal_priority_wins() {
        let mut h = Harness::new(1);
        let far = h.add(1, 3, Vec3::new(40.0, 0.0, 0.0));
        let near = h.add(2, 3, Vec3::new(2.0, 0.0, 0.0));
        let farther = h.add(3, 3, Vec3::new(90.0, 0.0, 0.0));
        h.play(far);

        assert!(matches!(h.play(near), VoiceRequest::Granted { .. }));
        assert_eq!(h.play(farther), VoiceRequest::Unavailable);
        assert!(h.sounds[&farther].voice.is_none());
    }

    #[test]
    fn closer_sound_takes_voice_of_farther_higher_priority() {
        let mut h = Harness::new(1);
        let far = h.add(1, 200, Vec3::new(100.0, 0.0, 0.0));
        let near = h.add(2, 10, Vec3::ZERO);
        h.play(far);

        let result = h.play(near);
        assert!(matches!(
            result,
            VoiceRequest::Granted { stolen_from: Some(id), .. } if id == far
        ));
        assert_eq!(h.pool.active(), &[near]);
        assert_eq!(h.pool.queued(), &[far]);
    }

    #[test]
    fn exhausted_victim_is_finished_instead_of_queued() {
        let mut h = Harness::new(1);
        let shot = h.add(1, 9, Vec3::ZERO);
        let next = h.add(2, 1, Vec3::ZERO);
        h.play(shot);

        // One second of tone, played past its end with no update in between
        h.mixer.advance(9000);
        let result = h.play(next);

        assert!(matches!(
            result,
            VoiceRequest::Granted { stolen_from: Some(id), .. } if id == shot
        ));
        assert!(!h.pool.is_queued(shot));
        assert_eq!(h.pool.take_finished(), vec![shot]);
        assert!(h.pool.take_finished().is_empty());
    }

    #[test]
    fn looping_victim_is_queued_even_when_its_voice_stopped() {
        let mut h = Harness::new(1);
        let ambience = h.add(1, 9, Vec3::ZERO);
        let next = h.add(2, 1, Vec3::ZERO);
        h.sounds.get_mut(&ambience).unwrap().props.looping = true;
        h.play(ambience);

        let voice = h.sounds[&ambience].voice.unwrap();
        h.mixer.stop(voice);
        h.play(next);

        assert!(h.pool.is_queued(ambience));
        assert!(h.pool.take_finished().is_empty());
    }

    #[test]
    fn release_returns_the_voice() {
        let mut h = Harness::new(1);
        let a = h.add(1, 0, Vec3::ZERO);
        h.play(a);
        h.pool.release_voice(a, &mut h.sounds, &mut h.mixer);
        assert_eq!(h.pool.free_count(), 1);
        assert!(h.pool.active().is_empty());
        h.pool.check_invariants(&h.sounds);

        // Releasing again is a no-op
        h.pool.release_voice(a, &mut h.sounds, &mut h.mixer);
        assert_eq!(h.pool.free_count(), 1);
    }

    #[test]
    fn reactivation_prefers_priority_then_distance() {
        let mut h = Harness::new(1);
        let low = h.add(1, 1, Vec3::ZERO);
        let mid_far = h.add(2, 5, Vec3::new(30.0, 0.0, 0.0));
        let mid_near = h.add(3, 5, Vec3::new(3.0, 0.0, 0.0));
        let top = h.add(4, 9, Vec3::ZERO);

        for id in [low, mid_far, mid_near] {
            h.sounds.get_mut(&id).unwrap().state = PlayState::Playing;
            h.pool.enqueue(id);
        }
        h.play(top);
        h.pool.release_voice(top, &mut h.sounds, &mut h.mixer);
        h.sounds.get_mut(&top).unwrap().state = PlayState::Stopped;

        let reactivated = h
            .pool
            .reactivate_queued(&mut h.sounds, &mut h.mixer, Vec3::ZERO)
            .unwrap();
        assert_eq!(reactivated.map(|(id, _)| id), Some(mid_near));
        assert_eq!(h.pool.queued(), &[mid_far, low]);
        h.pool.check_invariants(&h.sounds);

        // One per call, and the pool is full again
        let again = h
            .pool
            .reactivate_queued(&mut h.sounds, &mut h.mixer, Vec3::ZERO)
            .unwrap();
        assert_eq!(again, None);
    }

    #[test]
    fn shutdown_destroys_every_voice() {
        let mut h = Harness::new(3);
        let a = h.add(1, 0, Vec3::ZERO);
        h.play(a);
        h.pool.shutdown(&mut h.sounds, &mut h.mixer);
        assert_eq!(h.mixer.voice_count(), 0);
        assert!(h.sounds[&a].voice.is_none());
    }
}
