use crate::audio_data::{AudioStream, StreamFormat};
use crate::error::{PetalSoundError, Result};
use std::sync::Arc;

/// An [`AudioStream`] over PCM bytes already in memory.
///
/// The byte storage is shared, so opening the same asset many times does not
/// copy it.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    data: Arc<[u8]>,
    format: StreamFormat,
    position: usize,
}

impl MemoryStream {
    pub fn new(data: impl Into<Arc<[u8]>>, format: StreamFormat) -> Self {
        Self {
            data: data.into(),
            format,
            position: 0,
        }
    }

    /// Build a 16-bit stream from interleaved samples.
    pub fn from_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(bytes, StreamFormat::new(channels, sample_rate, 16))
    }
}

impl AudioStream for MemoryStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.position.min(self.data.len())..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }

    fn seek(&mut self, byte_offset: usize) -> Result<()> {
        if byte_offset > self.data.len() {
            return Err(PetalSoundError::AudioFormat(format!(
                "Seek to byte {} past end of stream ({} bytes)",
                byte_offset,
                self.data.len()
            )));
        }
        let align = self.format.block_align().max(1);
        self.position = byte_offset - byte_offset % align;
        Ok(())
    }

    fn total_bytes(&self) -> Option<usize> {
        Some(self.data.len())
    }

    fn position(&self) -> usize {
        self.position
    }
}
