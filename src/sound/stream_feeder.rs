use crate::audio_data::{AudioStream, BufferFormat, streaming_buffer_size};
use crate::backend::{AudioBackend, BufferId, VoiceId, VoiceParam, VoiceState};
use crate::error::{PetalSoundError, Result};
use crate::sound::properties::push_param;
use std::collections::VecDeque;
use std::time::Duration;

/// Keeps a voice fed from an [`AudioStream`] through a small ring of buffers.
///
/// Buffers cycle through filled, queued on the voice, processed and refilled.
/// Each queued buffer remembers the stream offset its data came from, so the
/// audible position can be recovered when the voice is taken away.
pub(crate) struct StreamFeeder {
    stream: Box<dyn AudioStream>,
    format: BufferFormat,
    sample_rate: u32,
    buffer_size: usize,
    buffers: Vec<BufferId>,
    free: Vec<BufferId>,
    /// Queued buffers, oldest first, with the stream offset of their first byte
    queued: VecDeque<(BufferId, usize)>,
    loop_offset: usize,
    end_of_stream: bool,
    /// Stream offset to start from on the next prime
    resume_offset: usize,
    scratch: Vec<u8>,
}

/// What the feeder did during one update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FeedTick {
    /// Number of loop wraps hit while filling
    pub loops: u32,
    pub finished: bool,
    /// The voice starved and was restarted
    pub underrun: bool,
}

impl StreamFeeder {
    pub fn new(
        stream: Box<dyn AudioStream>,
        backend: &mut dyn AudioBackend,
        buffer_count: usize,
        buffer_duration: Duration,
    ) -> Result<Self> {
        let stream_format = stream.format();
        let format = BufferFormat::for_stream(&stream_format);
        if stream_format.sample_rate == 0 {
            return Err(PetalSoundError::AudioFormat(
                "Stream reports a sample rate of zero".to_string(),
            ));
        }
        let buffer_size = streaming_buffer_size(format, stream_format.sample_rate, buffer_duration);

        let mut buffers = Vec::with_capacity(buffer_count);
        for _ in 0..buffer_count {
            match backend.create_buffer() {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        backend.destroy_buffer(buffer);
                    }
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Streaming feeder: {} buffers of {} bytes ({:?}, {} Hz)",
            buffer_count,
            buffer_size,
            format,
            stream_format.sample_rate
        );

        Ok(Self {
            stream,
            format,
            sample_rate: stream_format.sample_rate,
            buffer_size,
            free: buffers.iter().rev().copied().collect(),
            buffers,
            queued: VecDeque::with_capacity(buffer_count),
            loop_offset: 0,
            end_of_stream: false,
            resume_offset: 0,
            scratch: vec![0u8; buffer_size],
        })
    }

    #[cfg(test)]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[cfg(test)]
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    fn bytes_per_second(&self) -> f32 {
        (self.format.block_align() * self.sample_rate as usize) as f32
    }

    fn align(&self, bytes: usize) -> usize {
        bytes - bytes % self.format.block_align()
    }

    pub fn length_secs(&self) -> Option<f32> {
        self.stream
            .total_bytes()
            .map(|bytes| bytes as f32 / self.bytes_per_second())
    }

    pub fn set_loop_offset(&mut self, seconds: f32) {
        self.loop_offset = self.align((seconds.max(0.0) * self.bytes_per_second()) as usize);
    }

    /// Drop everything queued on `voice` and fill the ring again from the
    /// resume offset. The voice is left ready to play.
    pub fn prime(
        &mut self,
        voice: VoiceId,
        backend: &mut dyn AudioBackend,
        looping: bool,
    ) -> Result<FeedTick> {
        self.clear_queue(voice, backend);
        push_param(backend, voice, VoiceParam::Looping(false));

        self.stream.seek(self.resume_offset)?;
        self.end_of_stream = false;

        let mut tick = FeedTick::default();
        while !self.end_of_stream {
            let Some(buffer) = self.free.pop() else {
                break;
            };
            if !self.fill(buffer, voice, backend, looping, &mut tick)? {
                break;
            }
        }
        Ok(tick)
    }

    /// One refill pass: recycle processed buffers, detect completion and
    /// restart a starved voice.
    pub fn update(
        &mut self,
        voice: VoiceId,
        backend: &mut dyn AudioBackend,
        looping: bool,
        wants_playback: bool,
    ) -> Result<FeedTick> {
        let mut tick = FeedTick::default();
        let state = backend.voice_state(voice);

        if state == VoiceState::Stopped && self.end_of_stream && !looping {
            tick.finished = true;
            return Ok(tick);
        }

        self.recycle_processed(voice, backend);

        while !self.end_of_stream {
            let Some(buffer) = self.free.pop() else {
                break;
            };
            if !self.fill(buffer, voice, backend, looping, &mut tick)? {
                break;
            }
        }

        if state == VoiceState::Stopped && wants_playback {
            if self.queued.is_empty() {
                tick.finished = true;
            } else {
                log::warn!("Streaming voice {} under-ran, restarting", voice);
                backend.play(voice);
                tick.underrun = true;
            }
        }
        Ok(tick)
    }

    fn recycle_processed(&mut self, voice: VoiceId, backend: &mut dyn AudioBackend) {
        for _ in 0..backend.buffers_processed(voice) {
            let Some(buffer) = backend.unqueue_buffer(voice) else {
                break;
            };
            match self.queued.front() {
                Some((front, _)) if *front == buffer => {
                    self.queued.pop_front();
                }
                _ => {
                    log::warn!("Unqueued {} out of order", buffer);
                    self.queued.retain(|(b, _)| *b != buffer);
                }
            }
            self.free.push(buffer);
        }
    }

    /// Fill `buffer` from the stream and queue it. Returns false (and keeps
    /// the buffer free) when there was nothing left to read.
    fn fill(
        &mut self,
        buffer: BufferId,
        voice: VoiceId,
        backend: &mut dyn AudioBackend,
        looping: bool,
        tick: &mut FeedTick,
    ) -> Result<bool> {
        let start = self.stream.position();
        let mut filled = 0;
        let mut empty_wraps = 0;

        while filled < self.buffer_size {
            let read = self.stream.read(&mut self.scratch[filled..self.buffer_size])?;
            if read > 0 {
                filled += read;
                empty_wraps = 0;
                continue;
            }
            if !looping {
                self.end_of_stream = true;
                break;
            }
            // Two wraps in a row without data means the loop region is empty
            empty_wraps += 1;
            if empty_wraps > 1 {
                log::warn!("Loop region of streaming voice {} is empty", voice);
                self.end_of_stream = true;
                break;
            }
            self.stream.seek(self.loop_offset)?;
            tick.loops += 1;
        }

        let filled = self.align(filled);
        if filled == 0 {
            self.free.push(buffer);
            return Ok(false);
        }

        backend.buffer_data(buffer, self.format, &self.scratch[..filled], self.sample_rate)?;
        backend.queue_buffer(voice, buffer)?;
        self.queued.push_back((buffer, start));
        Ok(true)
    }

    /// Byte offset in the stream of what the voice is playing right now.
    fn audible_offset(&self, voice: VoiceId, backend: &dyn AudioBackend) -> usize {
        let processed = backend.buffers_processed(voice);
        match self.queued.get(processed) {
            Some((_, start)) => {
                let offset = start + backend.byte_offset(voice);
                match self.stream.total_bytes() {
                    // Data wrapped to the loop offset inside this buffer
                    Some(total) if offset >= total && total > self.loop_offset => {
                        self.loop_offset + (offset - total) % (total - self.loop_offset)
                    }
                    _ => offset,
                }
            }
            None if self.end_of_stream => self.stream.total_bytes().unwrap_or(0),
            // Starved: everything read so far has been heard
            None => self.stream.position(),
        }
    }

    fn clear_queue(&mut self, voice: VoiceId, backend: &mut dyn AudioBackend) {
        backend.stop(voice);
        while let Some(buffer) = backend.unqueue_buffer(voice) {
            self.queued.retain(|(b, _)| *b != buffer);
            self.free.push(buffer);
        }
        for (buffer, _) in self.queued.drain(..) {
            self.free.push(buffer);
        }
        if let Err(e) = backend.attach_buffer(voice, None) {
            log::warn!("Failed to clear queue of {}: {}", voice, e);
        }
    }

    /// Remember the audible position and take our buffers off the voice.
    pub fn detach(&mut self, voice: VoiceId, backend: &mut dyn AudioBackend) {
        if backend.voice_state(voice) != VoiceState::Initial {
            self.resume_offset = self.audible_offset(voice, backend);
        }
        self.clear_queue(voice, backend);
    }

    /// Start or resume the voice. A voice with nothing queued is primed first.
    pub fn play(
        &mut self,
        voice: VoiceId,
        backend: &mut dyn AudioBackend,
        looping: bool,
    ) -> Result<FeedTick> {
        let state = backend.voice_state(voice);
        let mut tick = FeedTick::default();
        if state != VoiceState::Paused
            && state != VoiceState::Playing
            && (self.queued.is_empty() || state == VoiceState::Stopped)
        {
            tick = self.prime(voice, backend, looping)?;
        }
        backend.play(voice);
        Ok(tick)
    }

    /// Back to the start of the stream.
    pub fn rewind(&mut self, voice: Option<VoiceId>, backend: &mut dyn AudioBackend) {
        if let Some(voice) = voice {
            self.clear_queue(voice, backend);
        }
        self.resume_offset = 0;
        self.end_of_stream = false;
    }

    pub fn position_secs(&self, voice: Option<VoiceId>, backend: &dyn AudioBackend) -> f32 {
        let offset = match voice {
            Some(voice) if backend.voice_state(voice) != VoiceState::Initial => {
                self.audible_offset(voice, backend)
            }
            _ => self.resume_offset,
        };
        offset as f32 / self.bytes_per_second()
    }

    /// Restart from `seconds`. A playing voice is re-primed and keeps playing.
    pub fn seek(
        &mut self,
        seconds: f32,
        voice: Option<VoiceId>,
        backend: &mut dyn AudioBackend,
        looping: bool,
    ) -> Result<()> {
        self.resume_offset = self.align((seconds.max(0.0) * self.bytes_per_second()) as usize);
        let Some(voice) = voice else {
            return Ok(());
        };
        let state = backend.voice_state(voice);
        self.prime(voice, backend, looping)?;
        match state {
            VoiceState::Playing => backend.play(voice),
            VoiceState::Paused => {
                backend.play(voice);
                backend.pause(voice);
            }
            VoiceState::Initial | VoiceState::Stopped => {}
        }
        Ok(())
    }

    /// Destroy every buffer. The voice must already be detached.
    pub fn release(&mut self, backend: &mut dyn AudioBackend) {
        for buffer in self.buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
        self.free.clear();
        self.queued.clear();
    }
}
