//! Software mixer: a pure Rust implementation of the voice/buffer-queue backend.
//!
//! Voices are rendered with nearest-sample stepping, distance and cone
//! attenuation, equal-power panning and Doppler pitch shift.

use crate::audio_data::BufferFormat;
use crate::backend::{
    AudioBackend, BufferId, DistanceModel, ListenerParams, VoiceId, VoiceParam, VoiceState,
};
use crate::error::{PetalSoundError, Result};
use crate::math::Vec3;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_4, SQRT_2};
use std::sync::Arc;

const DEFAULT_MAX_VOICES: usize = 256;

struct SoftBuffer {
    format: BufferFormat,
    sample_rate: u32,
    data: Vec<u8>,
}

impl SoftBuffer {
    fn frames(&self) -> usize {
        self.data.len() / self.format.block_align()
    }
}

#[derive(Debug, Clone, Copy)]
struct VoiceParams {
    gain: f32,
    min_gain: f32,
    max_gain: f32,
    pitch: f32,
    position: Vec3,
    velocity: Vec3,
    direction: Vec3,
    relative: bool,
    rolloff: f32,
    reference_distance: f32,
    max_distance: f32,
    cone_inner: f32,
    cone_outer: f32,
    cone_outer_gain: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            relative: false,
            rolloff: 1.0,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            cone_inner: 360.0,
            cone_outer: 360.0,
            cone_outer_gain: 0.0,
        }
    }
}

#[derive(Default)]
struct SoftVoice {
    state: VoiceState,
    queue: VecDeque<BufferId>,
    /// Index of the buffer playing; everything before it is processed
    current: usize,
    /// Frame position within the current buffer
    cursor: f64,
    looping: bool,
    params: VoiceParams,
}

impl SoftVoice {
    fn processed(&self) -> usize {
        self.current.min(self.queue.len())
    }
}

/// Per-voice gains and rate for one render call.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Spatial {
    left: f32,
    right: f32,
    doppler: f32,
}

/// In-process mixer implementing [`AudioBackend`].
///
/// Call [`render`](Self::render) to pull mixed, interleaved f32 frames at the
/// device rate. The cpal [`OutputDevice`](super::OutputDevice) does this from
/// the device callback; tests do it directly to simulate playback time.
pub struct SoftwareMixer {
    sample_rate: u32,
    channels: u16,
    max_voices: usize,
    voices: HashMap<VoiceId, SoftVoice>,
    buffers: HashMap<BufferId, SoftBuffer>,
    listener: ListenerParams,
    master_gain: f32,
    distance_model: DistanceModel,
    doppler_factor: f32,
    speed_of_sound: f32,
    next_voice: u32,
    next_buffer: u32,
    scratch: Vec<f32>,
}

impl SoftwareMixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            max_voices: DEFAULT_MAX_VOICES,
            voices: HashMap::new(),
            buffers: HashMap::new(),
            listener: ListenerParams::default(),
            master_gain: 1.0,
            distance_model: DistanceModel::default(),
            doppler_factor: 1.0,
            speed_of_sound: 343.3,
            next_voice: 1,
            next_buffer: 1,
            scratch: Vec::new(),
        }
    }

    /// Limit how many voices `create_voice` hands out, like a hardware device would.
    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn listener(&self) -> ListenerParams {
        self.listener
    }

    /// Render `frames` frames into an internal scratch buffer and discard them.
    pub fn advance(&mut self, frames: usize) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(frames * self.channels as usize, 0.0);
        self.render(&mut scratch);
        self.scratch = scratch;
    }

    /// Mix every playing voice into `output` (interleaved, `channels()` wide).
    /// Returns the number of frames written.
    pub fn render(&mut self, output: &mut [f32]) -> usize {
        output.fill(0.0);
        let out_channels = self.channels as usize;
        let frames = output.len() / out_channels;

        let Self {
            sample_rate,
            voices,
            buffers,
            listener,
            master_gain,
            distance_model,
            doppler_factor,
            speed_of_sound,
            ..
        } = self;

        for voice in voices.values_mut() {
            if voice.state != VoiceState::Playing {
                continue;
            }
            let spatial = spatialize(
                &voice.params,
                listener,
                *distance_model,
                *doppler_factor,
                *speed_of_sound,
            );
            render_voice(
                voice,
                buffers,
                spatial,
                *master_gain,
                *sample_rate,
                output,
                out_channels,
            );
        }

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        frames
    }

    fn voice(&self, voice: VoiceId) -> Result<&SoftVoice> {
        self.voices
            .get(&voice)
            .ok_or_else(|| PetalSoundError::Backend(format!("Unknown voice {}", voice)))
    }

    fn voice_mut(&mut self, voice: VoiceId) -> Result<&mut SoftVoice> {
        self.voices
            .get_mut(&voice)
            .ok_or_else(|| PetalSoundError::Backend(format!("Unknown voice {}", voice)))
    }
}

fn render_voice(
    voice: &mut SoftVoice,
    buffers: &HashMap<BufferId, SoftBuffer>,
    spatial: Spatial,
    master_gain: f32,
    device_rate: u32,
    output: &mut [f32],
    out_channels: usize,
) {
    let frames = output.len() / out_channels;
    let mut frame = 0;

    while frame < frames {
        let Some(buffer) = voice
            .queue
            .get(voice.current)
            .and_then(|id| buffers.get(id))
        else {
            voice.state = VoiceState::Stopped;
            voice.cursor = 0.0;
            return;
        };

        let total = buffer.frames();
        if voice.cursor as usize >= total {
            voice.cursor -= total as f64;
            if voice.cursor < 0.0 {
                voice.cursor = 0.0;
            }
            voice.current += 1;
            if voice.current >= voice.queue.len() {
                if voice.looping && total > 0 {
                    voice.current = 0;
                } else {
                    voice.state = VoiceState::Stopped;
                    voice.cursor = 0.0;
                    return;
                }
            }
            continue;
        }

        let step = buffer.sample_rate as f64 / device_rate as f64
            * voice.params.pitch.max(0.0) as f64
            * spatial.doppler as f64;
        if step <= 0.0 {
            return;
        }

        // Render as many frames as fit in this buffer
        while frame < frames {
            let index = voice.cursor as usize;
            if index >= total {
                break;
            }
            let (left, right) = if buffer.format.channels() == 1 {
                let s = buffer.format.sample(&buffer.data, index);
                (s * spatial.left, s * spatial.right)
            } else {
                let l = buffer.format.sample(&buffer.data, index * 2);
                let r = buffer.format.sample(&buffer.data, index * 2 + 1);
                (l * spatial.left, r * spatial.right)
            };

            let at = frame * out_channels;
            if out_channels == 1 {
                output[at] += (left + right) * 0.5 * master_gain;
            } else {
                output[at] += left * master_gain;
                output[at + 1] += right * master_gain;
            }

            voice.cursor += step;
            frame += 1;
        }
    }
}

/// Gain factor from the distance model, before min/max gain clamping.
fn distance_gain(model: DistanceModel, distance: f32, params: &VoiceParams) -> f32 {
    let reference = params.reference_distance;
    let max = params.max_distance;
    let rolloff = params.rolloff;

    let clamped = || distance.max(reference).min(max.max(reference));
    let gain = match model {
        DistanceModel::None => 1.0,
        DistanceModel::Inverse | DistanceModel::InverseClamped => {
            let d = if model == DistanceModel::InverseClamped {
                clamped()
            } else {
                distance
            };
            let denominator = reference + rolloff * (d - reference);
            if denominator <= 0.0 {
                1.0
            } else {
                reference / denominator
            }
        }
        DistanceModel::Linear | DistanceModel::LinearClamped => {
            let d = if model == DistanceModel::LinearClamped {
                clamped()
            } else {
                distance.min(max)
            };
            if max <= reference {
                1.0
            } else {
                1.0 - rolloff * (d - reference) / (max - reference)
            }
        }
        DistanceModel::Exponent | DistanceModel::ExponentClamped => {
            let d = if model == DistanceModel::ExponentClamped {
                clamped()
            } else {
                distance
            };
            if d <= 0.0 || reference <= 0.0 {
                1.0
            } else {
                (d / reference).powf(-rolloff)
            }
        }
    };
    gain.clamp(0.0, 1.0)
}

fn cone_gain(params: &VoiceParams, to_listener: Vec3) -> f32 {
    if params.cone_inner >= 360.0 || params.direction.length_squared() <= f32::EPSILON {
        return 1.0;
    }
    let Some(to_listener) = to_listener.try_normalize() else {
        return 1.0;
    };
    let angle = params
        .direction
        .normalize()
        .dot(to_listener)
        .clamp(-1.0, 1.0)
        .acos()
        .to_degrees();
    let inner = params.cone_inner * 0.5;
    let outer = (params.cone_outer * 0.5).max(inner);
    if angle <= inner {
        1.0
    } else if angle >= outer {
        params.cone_outer_gain
    } else {
        let t = (angle - inner) / (outer - inner);
        1.0 + (params.cone_outer_gain - 1.0) * t
    }
}

fn spatialize(
    params: &VoiceParams,
    listener: &ListenerParams,
    model: DistanceModel,
    doppler_factor: f32,
    speed_of_sound: f32,
) -> Spatial {
    // Source position relative to the listener, in world orientation
    let offset = if params.relative {
        let right = listener.forward.cross(listener.up).normalize_or_zero();
        right * params.position.x + listener.up * params.position.y
            - listener.forward * params.position.z
    } else {
        params.position - listener.position
    };
    let distance = offset.length();

    let attenuation = distance_gain(model, distance, params) * cone_gain(params, -offset);
    let gain = (params.gain * attenuation).clamp(params.min_gain, params.max_gain.max(params.min_gain));

    let right_axis = listener.forward.cross(listener.up).normalize_or_zero();
    let pan = if distance > f32::EPSILON {
        (offset.dot(right_axis) / distance).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let angle = (pan + 1.0) * FRAC_PI_4;

    let doppler = if doppler_factor > 0.0 && distance > f32::EPSILON {
        let axis = offset / distance;
        let limit = speed_of_sound / doppler_factor;
        let listener_velocity = if params.relative {
            Vec3::ZERO
        } else {
            listener.velocity
        };
        let vls = listener_velocity.dot(axis).min(limit);
        let vss = params.velocity.dot(axis).min(limit);
        let numerator = speed_of_sound - doppler_factor * vls;
        let denominator = speed_of_sound - doppler_factor * vss;
        if denominator > f32::EPSILON {
            (numerator / denominator).max(0.0)
        } else {
            1.0
        }
    } else {
        1.0
    };

    Spatial {
        left: gain * angle.cos() * SQRT_2,
        right: gain * angle.sin() * SQRT_2,
        doppler,
    }
}

impl AudioBackend for SoftwareMixer {
    fn create_voice(&mut self) -> Result<VoiceId> {
        if self.voices.len() >= self.max_voices {
            return Err(PetalSoundError::Backend(format!(
                "Voice limit reached ({})",
                self.max_voices
            )));
        }
        let id = VoiceId(self.next_voice);
        self.next_voice += 1;
        self.voices.insert(id, SoftVoice::default());
        Ok(id)
    }

    fn destroy_voice(&mut self, voice: VoiceId) {
        self.voices.remove(&voice);
    }

    fn create_buffer(&mut self) -> Result<BufferId> {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            SoftBuffer {
                format: BufferFormat::Mono16,
                sample_rate: self.sample_rate,
                data: Vec::new(),
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.voices.values().any(|v| v.queue.contains(&buffer)) {
            log::warn!("Destroying {} while it is still queued on a voice", buffer);
        }
        self.buffers.remove(&buffer);
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        if self.voices.values().any(|v| v.queue.contains(&buffer)) {
            return Err(PetalSoundError::Backend(format!(
                "{} is queued and cannot be refilled",
                buffer
            )));
        }
        if sample_rate == 0 {
            return Err(PetalSoundError::Backend("Sample rate must be non-zero".into()));
        }
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| PetalSoundError::Backend(format!("Unknown buffer {}", buffer)))?;
        let aligned = data.len() - data.len() % format.block_align();
        target.format = format;
        target.sample_rate = sample_rate;
        target.data.clear();
        target.data.extend_from_slice(&data[..aligned]);
        Ok(())
    }

    fn set_param(&mut self, voice: VoiceId, param: VoiceParam) -> Result<()> {
        let voice = self.voice_mut(voice)?;
        let params = &mut voice.params;
        match param {
            VoiceParam::Gain(v) => params.gain = v.max(0.0),
            VoiceParam::MinGain(v) => params.min_gain = v.clamp(0.0, 1.0),
            VoiceParam::MaxGain(v) => params.max_gain = v.clamp(0.0, 1.0),
            VoiceParam::Pitch(v) => {
                if v <= 0.0 {
                    return Err(PetalSoundError::Backend(format!("Invalid pitch {}", v)));
                }
                params.pitch = v;
            }
            VoiceParam::Position(v) => params.position = v,
            VoiceParam::Velocity(v) => params.velocity = v,
            VoiceParam::Direction(v) => params.direction = v,
            VoiceParam::Relative(v) => params.relative = v,
            VoiceParam::RolloffFactor(v) => params.rolloff = v.max(0.0),
            VoiceParam::ReferenceDistance(v) => params.reference_distance = v.max(0.0),
            VoiceParam::MaxDistance(v) => params.max_distance = v.max(0.0),
            VoiceParam::ConeInnerAngle(v) => params.cone_inner = v.clamp(0.0, 360.0),
            VoiceParam::ConeOuterAngle(v) => params.cone_outer = v.clamp(0.0, 360.0),
            VoiceParam::ConeOuterGain(v) => params.cone_outer_gain = v.clamp(0.0, 1.0),
            VoiceParam::Looping(v) => voice.looping = v,
        }
        Ok(())
    }

    fn voice_state(&self, voice: VoiceId) -> VoiceState {
        self.voice(voice)
            .map(|v| v.state)
            .unwrap_or(VoiceState::Stopped)
    }

    fn play(&mut self, voice: VoiceId) {
        if let Ok(voice) = self.voice_mut(voice) {
            match voice.state {
                VoiceState::Playing => {}
                VoiceState::Paused => voice.state = VoiceState::Playing,
                VoiceState::Initial | VoiceState::Stopped => {
                    // A drained queue plays again from its first buffer
                    if voice.current >= voice.queue.len() {
                        voice.current = 0;
                        voice.cursor = 0.0;
                    }
                    voice.state = VoiceState::Playing;
                }
            }
        }
    }

    fn pause(&mut self, voice: VoiceId) {
        if let Ok(voice) = self.voice_mut(voice) {
            if voice.state == VoiceState::Playing {
                voice.state = VoiceState::Paused;
            }
        }
    }

    fn stop(&mut self, voice: VoiceId) {
        if let Ok(voice) = self.voice_mut(voice) {
            if voice.state != VoiceState::Initial {
                voice.state = VoiceState::Stopped;
                voice.current = voice.queue.len();
                voice.cursor = 0.0;
            }
        }
    }

    fn rewind(&mut self, voice: VoiceId) {
        if let Ok(voice) = self.voice_mut(voice) {
            voice.state = VoiceState::Initial;
            voice.current = 0;
            voice.cursor = 0.0;
        }
    }

    fn attach_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) -> Result<()> {
        if let Some(buffer) = buffer {
            if !self.buffers.contains_key(&buffer) {
                return Err(PetalSoundError::Backend(format!("Unknown buffer {}", buffer)));
            }
        }
        let voice = self.voice_mut(voice)?;
        voice.queue.clear();
        voice.queue.extend(buffer);
        voice.current = 0;
        voice.cursor = 0.0;
        voice.state = VoiceState::Initial;
        Ok(())
    }

    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId) -> Result<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(PetalSoundError::Backend(format!("Unknown buffer {}", buffer)));
        }
        let voice = self.voice_mut(voice)?;
        if voice.queue.contains(&buffer) {
            return Err(PetalSoundError::Backend(format!("{} is already queued", buffer)));
        }
        voice.queue.push_back(buffer);
        Ok(())
    }

    fn unqueue_buffer(&mut self, voice: VoiceId) -> Option<BufferId> {
        let voice = self.voice_mut(voice).ok()?;
        if voice.processed() == 0 {
            return None;
        }
        voice.current -= 1;
        voice.queue.pop_front()
    }

    fn buffers_processed(&self, voice: VoiceId) -> usize {
        self.voice(voice).map(SoftVoice::processed).unwrap_or(0)
    }

    fn buffers_queued(&self, voice: VoiceId) -> usize {
        self.voice(voice).map(|v| v.queue.len()).unwrap_or(0)
    }

    fn byte_offset(&self, voice: VoiceId) -> usize {
        let Ok(voice) = self.voice(voice) else {
            return 0;
        };
        voice
            .queue
            .get(voice.current)
            .and_then(|id| self.buffers.get(id))
            .map(|buffer| {
                (voice.cursor as usize).min(buffer.frames()) * buffer.format.block_align()
            })
            .unwrap_or(0)
    }

    fn set_byte_offset(&mut self, voice: VoiceId, offset: usize) -> Result<()> {
        let Self {
            voices, buffers, ..
        } = self;
        let voice = voices
            .get_mut(&voice)
            .ok_or_else(|| PetalSoundError::Backend(format!("Unknown voice {}", voice)))?;
        if voice.current >= voice.queue.len() {
            voice.current = 0;
        }
        let buffer = voice
            .queue
            .get(voice.current)
            .and_then(|id| buffers.get(id))
            .ok_or_else(|| PetalSoundError::Backend("No buffer attached".to_string()))?;
        let frame = offset / buffer.format.block_align();
        if frame > buffer.frames() {
            return Err(PetalSoundError::Backend(format!(
                "Byte offset {} past end of buffer",
                offset
            )));
        }
        voice.cursor = frame as f64;
        Ok(())
    }

    fn set_listener(&mut self, listener: &ListenerParams) {
        self.listener = *listener;
    }

    fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }

    fn set_distance_model(&mut self, model: DistanceModel) {
        self.distance_model = model;
    }

    fn set_doppler_factor(&mut self, factor: f32) {
        self.doppler_factor = factor.max(0.0);
    }

    fn set_speed_of_sound(&mut self, speed: f32) {
        if speed > 0.0 {
            self.speed_of_sound = speed;
        }
    }
}

/// Shared handle to a [`SoftwareMixer`].
///
/// One clone goes to the engine as its backend, another to the
/// [`OutputDevice`](super::OutputDevice) (or a test) that renders audio.
#[derive(Clone)]
pub struct MixerHandle(Arc<Mutex<SoftwareMixer>>);

impl MixerHandle {
    pub fn new(mixer: SoftwareMixer) -> Self {
        Self(Arc::new(Mutex::new(mixer)))
    }

    pub fn lock(&self) -> MutexGuard<'_, SoftwareMixer> {
        self.0.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, SoftwareMixer>> {
        self.0.try_lock()
    }

    /// See [`SoftwareMixer::advance`].
    pub fn advance(&self, frames: usize) {
        self.0.lock().advance(frames);
    }
}

impl AudioBackend for MixerHandle {
    fn create_voice(&mut self) -> Result<VoiceId> {
        self.0.lock().create_voice()
    }

    fn destroy_voice(&mut self, voice: VoiceId) {
        self.0.lock().destroy_voice(voice)
    }

    fn create_buffer(&mut self) -> Result<BufferId> {
        self.0.lock().create_buffer()
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.0.lock().destroy_buffer(buffer)
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        self.0.lock().buffer_data(buffer, format, data, sample_rate)
    }

    fn set_param(&mut self, voice: VoiceId, param: VoiceParam) -> Result<()> {
        self.0.lock().set_param(voice, param)
    }

    fn voice_state(&self, voice: VoiceId) -> VoiceState {
        self.0.lock().voice_state(voice)
    }

    fn play(&mut self, voice: VoiceId) {
        self.0.lock().play(voice)
    }

    fn pause(&mut self, voice: VoiceId) {
        self.0.lock().pause(voice)
    }

    fn stop(&mut self, voice: VoiceId) {
        self.0.lock().stop(voice)
    }

    fn rewind(&mut self, voice: VoiceId) {
        self.0.lock().rewind(voice)
    }

    fn attach_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) -> Result<()> {
        self.0.lock().attach_buffer(voice, buffer)
    }

    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId) -> Result<()> {
        self.0.lock().queue_buffer(voice, buffer)
    }

    fn unqueue_buffer(&mut self, voice: VoiceId) -> Option<BufferId> {
        self.0.lock().unqueue_buffer(voice)
    }

    fn buffers_processed(&self, voice: VoiceId) -> usize {
        self.0.lock().buffers_processed(voice)
    }

    fn buffers_queued(&self, voice: VoiceId) -> usize {
        self.0.lock().buffers_queued(voice)
    }

    fn byte_offset(&self, voice: VoiceId) -> usize {
        self.0.lock().byte_offset(voice)
    }

    fn set_byte_offset(&mut self, voice: VoiceId, offset: usize) -> Result<()> {
        self.0.lock().set_byte_offset(voice, offset)
    }

    fn set_listener(&mut self, listener: &ListenerParams) {
        self.0.lock().set_listener(listener)
    }

    fn set_master_gain(&mut self, gain: f32) {
        self.0.lock().set_master_gain(gain)
    }

    fn set_distance_model(&mut self, model: DistanceModel) {
        self.0.lock().set_distance_model(model)
    }

    fn set_doppler_factor(&mut self, factor: f32) {
        self.0.lock().set_doppler_factor(factor)
    }

    fn set_speed_of_sound(&mut self, speed: f32) {
        self.0.lock().set_speed_of_sound(speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_buffer(mixer: &mut SoftwareMixer, frames: usize, value: i16) -> BufferId {
        let data: Vec<u8> = std::iter::repeat(value.to_le_bytes())
            .take(frames)
            .flatten()
            .collect();
        let buffer = mixer.create_buffer().unwrap();
        mixer
            .buffer_data(buffer, BufferFormat::Mono16, &data, mixer.sample_rate())
            .unwrap();
        buffer
    }

    #[test]
    fn voice_limit_is_enforced() {
        let mut mixer = SoftwareMixer::new(48000, 2).with_max_voices(2);
        assert!(mixer.create_voice().is_ok());
        assert!(mixer.create_voice().is_ok());
        assert!(mixer.create_voice().is_err());
    }

    #[test]
    fn queued_buffers_become_processed_in_order() {
        let mut mixer = SoftwareMixer::new(1000, 2);
        let voice = mixer.create_voice().unwrap();
        let a = mono_buffer(&mut mixer, 100, 1000);
        let b = mono_buffer(&mut mixer, 100, 1000);
        mixer.queue_buffer(voice, a).unwrap();
        mixer.queue_buffer(voice, b).unwrap();
        mixer.play(voice);

        mixer.advance(150);
        assert_eq!(mixer.buffers_processed(voice), 1);
        assert_eq!(mixer.voice_state(voice), VoiceState::Playing);
        assert_eq!(mixer.unqueue_buffer(voice), Some(a));
        assert_eq!(mixer.unqueue_buffer(voice), None);

        mixer.advance(100);
        assert_eq!(mixer.voice_state(voice), VoiceState::Stopped);
        assert_eq!(mixer.buffers_processed(voice), 1);
    }

    #[test]
    fn looping_attached_buffer_never_stops() {
        let mut mixer = SoftwareMixer::new(1000, 2);
        let voice = mixer.create_voice().unwrap();
        let buffer = mono_buffer(&mut mixer, 100, 1000);
        mixer.attach_buffer(voice, Some(buffer)).unwrap();
        mixer.set_param(voice, VoiceParam::Looping(true)).unwrap();
        mixer.play(voice);

        mixer.advance(250);
        assert_eq!(mixer.voice_state(voice), VoiceState::Playing);
        assert_eq!(mixer.byte_offset(voice), 50 * 2);
    }

    #[test]
    fn refilling_a_queued_buffer_fails() {
        let mut mixer = SoftwareMixer::new(1000, 2);
        let voice = mixer.create_voice().unwrap();
        let buffer = mono_buffer(&mut mixer, 10, 0);
        mixer.queue_buffer(voice, buffer).unwrap();
        assert!(
            mixer
                .buffer_data(buffer, BufferFormat::Mono16, &[0, 0], 1000)
                .is_err()
        );
    }

    #[test]
    fn inverse_clamped_attenuation() {
        let params = VoiceParams::default();
        assert_eq!(distance_gain(DistanceModel::InverseClamped, 0.5, &params), 1.0);
        assert!((distance_gain(DistanceModel::InverseClamped, 2.0, &params) - 0.5).abs() < 1e-6);
        assert_eq!(distance_gain(DistanceModel::None, 100.0, &params), 1.0);
    }

    #[test]
    fn linear_clamped_reaches_zero_at_max_distance() {
        let params = VoiceParams {
            max_distance: 11.0,
            ..Default::default()
        };
        assert_eq!(distance_gain(DistanceModel::LinearClamped, 20.0, &params), 0.0);
        assert!((distance_gain(DistanceModel::LinearClamped, 6.0, &params) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn source_on_the_right_pans_right() {
        let params = VoiceParams {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let spatial = spatialize(
            &params,
            &ListenerParams::default(),
            DistanceModel::None,
            0.0,
            343.3,
        );
        assert!(spatial.right > spatial.left);
        assert!(spatial.left.abs() < 1e-5);
    }

    #[test]
    fn approaching_source_raises_pitch() {
        let params = VoiceParams {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, 20.0),
            ..Default::default()
        };
        let spatial = spatialize(
            &params,
            &ListenerParams::default(),
            DistanceModel::None,
            1.0,
            343.3,
        );
        assert!(spatial.doppler > 1.0);
    }

    #[test]
    fn cone_attenuates_behind_source() {
        let params = VoiceParams {
            direction: Vec3::Z,
            cone_inner: 90.0,
            cone_outer: 180.0,
            cone_outer_gain: 0.25,
            ..Default::default()
        };
        assert_eq!(cone_gain(&params, Vec3::Z), 1.0);
        assert_eq!(cone_gain(&params, -Vec3::Z), 0.25);
    }

    #[test]
    fn render_is_silent_without_playing_voices() {
        let mut mixer = SoftwareMixer::new(1000, 2);
        let voice = mixer.create_voice().unwrap();
        let buffer = mono_buffer(&mut mixer, 10, 10000);
        mixer.attach_buffer(voice, Some(buffer)).unwrap();
        let mut out = vec![1.0f32; 20];
        assert_eq!(mixer.render(&mut out), 10);
        assert!(out.iter().all(|s| *s == 0.0));

        mixer.play(voice);
        mixer.render(&mut out);
        assert!(out.iter().any(|s| *s != 0.0));
    }
}
