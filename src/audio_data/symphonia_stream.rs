use crate::{
    audio_data::{AudioStream, StreamFormat},
    error::{PetalSoundError, Result},
};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
        io::{MediaSource, MediaSourceStream},
        meta::MetadataOptions,
        probe::Hint,
        units::Time,
    },
    default::{get_codecs, get_probe},
};

/// Incremental decoder producing signed 16-bit interleaved PCM.
///
/// Supports every container and codec enabled in symphonia's default feature
/// set (WAV, FLAC, Ogg Vorbis, MP3, ...). Packets are decoded lazily as bytes
/// are read, so a long music track never sits fully in memory.
pub struct SymphoniaStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: StreamFormat,
    total_bytes: Option<usize>,
    pending: Vec<u8>,
    pending_pos: usize,
    position: usize,
    /// Bytes still to drop after an accurate seek landed early
    skip_bytes: usize,
}

impl SymphoniaStream {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path)?;
        let extension = Path::new(path).extension().and_then(|e| e.to_str());
        Self::from_source(Box::new(file), extension)
    }

    pub fn from_source(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                PetalSoundError::AudioLoading(format!("Failed to probe audio format: {:?}", e))
            })?;

        let reader = probed.format;

        let track = reader.default_track().ok_or_else(|| {
            PetalSoundError::AudioLoading("No default audio track found".to_string())
        })?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| PetalSoundError::AudioLoading("Sample rate not found".to_string()))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| PetalSoundError::AudioLoading("Channel count not found".to_string()))?
            .count() as u16;

        let format = StreamFormat::new(channels, sample_rate, 16);
        let total_bytes = track
            .codec_params
            .n_frames
            .map(|frames| frames as usize * format.block_align());
        let track_id = track.id;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                PetalSoundError::AudioLoading(format!("Failed to create decoder: {:?}", e))
            })?;

        log::debug!(
            "Opened stream: {} channels, {} Hz, {:?} bytes",
            channels,
            sample_rate,
            total_bytes
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            format,
            total_bytes,
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
            skip_bytes: 0,
        })
    }

    /// Decode the next packet of our track into `pending`.
    /// Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => return Ok(false), // end-of-file
                Err(Error::ResetRequired) => return Ok(false),
                Err(e) => {
                    return Err(PetalSoundError::AudioLoading(format!(
                        "Error reading packet: {:?}",
                        e
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => return Ok(false),
                Err(Error::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(PetalSoundError::AudioLoading(format!(
                        "Error decoding packet: {:?}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending_pos = 0;
            self.pending
                .extend(samples.samples().iter().flat_map(|s| s.to_le_bytes()));

            if self.skip_bytes > 0 {
                let skipped = self.skip_bytes.min(self.pending.len());
                self.pending_pos = skipped;
                self.skip_bytes -= skipped;
            }

            if self.pending_pos < self.pending.len() {
                return Ok(true);
            }
        }
    }
}

impl AudioStream for SymphoniaStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.pending_pos >= self.pending.len() && !self.decode_next()? {
                break;
            }
            let available = &self.pending[self.pending_pos..];
            let count = available.len().min(buf.len() - written);
            buf[written..written + count].copy_from_slice(&available[..count]);
            self.pending_pos += count;
            written += count;
        }
        self.position += written;
        Ok(written)
    }

    fn seek(&mut self, byte_offset: usize) -> Result<()> {
        let align = self.format.block_align().max(1);
        let frame = (byte_offset / align) as u64;
        let seconds = frame as f64 / self.format.sample_rate as f64;

        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(seconds.trunc() as u64, seconds.fract()),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| PetalSoundError::AudioLoading(format!("Seek failed: {:?}", e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_bytes = seeked.required_ts.saturating_sub(seeked.actual_ts) as usize * align;
        self.position = frame as usize * align;
        Ok(())
    }

    fn total_bytes(&self) -> Option<usize> {
        self.total_bytes
    }

    fn position(&self) -> usize {
        self.position
    }
}
