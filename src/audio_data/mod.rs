//! Decoded audio streams and PCM helpers.
//!
//! Everything the engine plays arrives through [`AudioStream`]: a cursor over
//! interleaved integer PCM bytes that can be read incrementally and seeked by
//! byte offset. Streaming sounds pull from the stream every update; static
//! sounds drain it once through [`DecodedAudio::decode`].

mod load_options;
mod memory_stream;
mod opener;
mod resampler;
mod symphonia_stream;

use crate::error::{PetalSoundError, Result};
pub use load_options::{ConvertToMono, LoadOptions};
pub use memory_stream::MemoryStream;
pub use opener::{MemoryOpener, StreamOpener, SymphoniaOpener};
pub use resampler::AudioResampler;
use std::time::Duration;
pub use symphonia_stream::SymphoniaStream;

/// Layout of the PCM bytes produced by an [`AudioStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl StreamFormat {
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
        }
    }

    /// Bytes per sample frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }
}

/// Sample layouts a backend buffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    /// Unsigned 8-bit, centred on 128
    Mono8,
    /// Signed 16-bit little endian
    Mono16,
    Stereo8,
    Stereo16,
}

impl BufferFormat {
    pub fn from_layout(channels: u16, bits_per_sample: u16) -> Option<Self> {
        match (channels, bits_per_sample) {
            (1, 8) => Some(Self::Mono8),
            (1, 16) => Some(Self::Mono16),
            (2, 8) => Some(Self::Stereo8),
            (2, 16) => Some(Self::Stereo16),
            _ => None,
        }
    }

    /// Pick the buffer format for a stream, falling back to `Mono16` for
    /// layouts the backend cannot hold.
    pub fn for_stream(format: &StreamFormat) -> Self {
        Self::from_layout(format.channels, format.bits_per_sample).unwrap_or_else(|| {
            log::warn!(
                "Unsupported stream layout ({} channels, {} bits), falling back to Mono16",
                format.channels,
                format.bits_per_sample
            );
            Self::Mono16
        })
    }

    pub fn channels(self) -> u16 {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Stereo8 | Self::Stereo16 => 2,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Mono8 | Self::Stereo8 => 1,
            Self::Mono16 | Self::Stereo16 => 2,
        }
    }

    pub fn block_align(self) -> usize {
        self.channels() as usize * self.bytes_per_sample()
    }

    /// Decode the sample at `index` (counted in samples, not bytes).
    #[inline]
    pub fn sample(self, data: &[u8], index: usize) -> f32 {
        match self.bytes_per_sample() {
            1 => (data[index] as f32 - 128.0) / 128.0,
            _ => {
                let at = index * 2;
                i16::from_le_bytes([data[at], data[at + 1]]) as f32 / 32768.0
            }
        }
    }
}

/// Size in bytes of one streaming buffer holding `duration` of audio, rounded
/// down to whole sample frames and never smaller than one frame.
pub fn streaming_buffer_size(format: BufferFormat, sample_rate: u32, duration: Duration) -> usize {
    let align = format.block_align();
    let bytes = (sample_rate as f64 * align as f64 * duration.as_secs_f64()) as usize;
    (bytes - bytes % align).max(align)
}

/// Source of interleaved integer PCM.
pub trait AudioStream: Send {
    fn format(&self) -> StreamFormat;

    /// Read up to `buf.len()` bytes. Returns 0 once the stream is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move the read cursor to `byte_offset` from the start of the audio data.
    fn seek(&mut self, byte_offset: usize) -> Result<()>;

    /// Total length of the decoded audio, if the container reports it.
    fn total_bytes(&self) -> Option<usize>;

    /// Current read cursor in bytes.
    fn position(&self) -> usize;
}

/// A fully decoded sound, ready to upload into a single backend buffer.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub data: Vec<u8>,
    pub format: BufferFormat,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Drain `stream` completely, then apply the conversions in `options`.
    pub fn decode(stream: &mut dyn AudioStream, options: &LoadOptions) -> Result<Self> {
        let stream_format = stream.format();
        let format = BufferFormat::for_stream(&stream_format);
        let align = format.block_align();

        let limit = options.max_duration.map(|d| {
            let bytes = (d.as_secs_f64() * stream_format.sample_rate as f64) as usize * align;
            bytes.max(align)
        });

        let mut data = Vec::with_capacity(stream.total_bytes().unwrap_or(0));
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let wanted = match limit {
                Some(limit) if data.len() >= limit => break,
                Some(limit) => chunk.len().min(limit - data.len()),
                None => chunk.len(),
            };
            let read = stream.read(&mut chunk[..wanted])?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..read]);
        }
        data.truncate(data.len() - data.len() % align);

        if data.is_empty() {
            return Err(PetalSoundError::AudioLoading(
                "Stream contained no audio data".to_string(),
            ));
        }

        let mut decoded = Self {
            data,
            format,
            sample_rate: stream_format.sample_rate,
        };

        if options.convert_to_mono == ConvertToMono::ForceMono {
            decoded = decoded.to_mono();
        }

        if let Some(target_rate) = options.target_sample_rate {
            if target_rate != decoded.sample_rate {
                decoded = decoded.resample(target_rate)?;
            }
        }

        Ok(decoded)
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.format.block_align()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Downmix to 16-bit mono by averaging channels.
    pub fn to_mono(&self) -> Self {
        if self.format.channels() == 1 {
            return self.clone();
        }
        let channels = self.format.channels() as usize;
        let mono: Vec<f32> = pcm_to_f32(self.format, &self.data)
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self {
            data: f32_to_pcm16(&mono),
            format: BufferFormat::Mono16,
            sample_rate: self.sample_rate,
        }
    }

    /// Resample to `target_sample_rate` with rubato; the result is always 16-bit.
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        let channels = self.format.channels();
        let resampler = AudioResampler::new(self.sample_rate, target_sample_rate, channels, None)?;
        let resampled = resampler.resample_interleaved(&pcm_to_f32(self.format, &self.data))?;
        let format = if channels == 1 {
            BufferFormat::Mono16
        } else {
            BufferFormat::Stereo16
        };
        Ok(Self {
            data: f32_to_pcm16(&resampled),
            format,
            sample_rate: target_sample_rate,
        })
    }
}

/// Convert integer PCM bytes into interleaved f32 samples.
pub fn pcm_to_f32(format: BufferFormat, data: &[u8]) -> Vec<f32> {
    let count = data.len() / format.bytes_per_sample();
    (0..count).map(|i| format.sample(data, i)).collect()
}

/// Convert f32 samples into signed 16-bit little endian bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * 32767.0) as i16).to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_is_frame_aligned() {
        // 44100 * 4 / 4 = 44100, not a multiple of 4
        let size =
            streaming_buffer_size(BufferFormat::Stereo16, 44100, Duration::from_millis(250));
        assert_eq!(size % 4, 0);
        assert_eq!(size, 44100);

        let size = streaming_buffer_size(BufferFormat::Stereo16, 22050, Duration::from_millis(250));
        assert_eq!(size, 22048);
    }

    #[test]
    fn buffer_size_never_below_one_frame() {
        let size = streaming_buffer_size(BufferFormat::Stereo16, 8000, Duration::from_micros(1));
        assert_eq!(size, 4);
    }

    #[test]
    fn unknown_layout_falls_back_to_mono16() {
        let surround = StreamFormat::new(6, 48000, 16);
        assert_eq!(BufferFormat::for_stream(&surround), BufferFormat::Mono16);
        assert_eq!(
            BufferFormat::for_stream(&StreamFormat::new(2, 48000, 8)),
            BufferFormat::Stereo8
        );
    }

    #[test]
    fn pcm_round_trips_through_f32() {
        let bytes = f32_to_pcm16(&[0.0, 0.5, -0.5]);
        let samples = pcm_to_f32(BufferFormat::Mono16, &bytes);
        assert!((samples[1] - 0.5).abs() < 1e-3);
        assert!((samples[2] + 0.5).abs() < 1e-3);
        assert_eq!(pcm_to_f32(BufferFormat::Mono8, &[128, 255])[0], 0.0);
    }

    #[test]
    fn decode_honours_max_duration() {
        let format = StreamFormat::new(1, 1000, 16);
        let mut stream = MemoryStream::new(vec![0u8; 4000], format);
        let options = LoadOptions::new().max_duration(Duration::from_millis(500));
        let decoded = DecodedAudio::decode(&mut stream, &options).unwrap();
        assert_eq!(decoded.frames(), 500);
    }

    #[test]
    fn decode_downmixes_to_mono() {
        let samples: Vec<i16> = vec![1000, 3000, -1000, -3000];
        let mut stream = MemoryStream::from_i16(&samples, 2, 8000);
        let options = LoadOptions::new().convert_to_mono(ConvertToMono::ForceMono);
        let decoded = DecodedAudio::decode(&mut stream, &options).unwrap();
        assert_eq!(decoded.format, BufferFormat::Mono16);
        assert_eq!(decoded.frames(), 2);
    }

    #[test]
    fn empty_stream_is_a_loading_error() {
        let mut stream = MemoryStream::new(Vec::new(), StreamFormat::new(1, 8000, 16));
        assert!(matches!(
            DecodedAudio::decode(&mut stream, &LoadOptions::default()),
            Err(PetalSoundError::AudioLoading(_))
        ));
    }
}
