//! Shared, reference-counted buffers for static sounds.

use crate::audio_data::{BufferFormat, DecodedAudio, LoadOptions, StreamOpener};
use crate::backend::{AudioBackend, BufferId};
use crate::error::Result;
use std::collections::HashMap;

/// A decoded asset living in one backend buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StaticAsset {
    pub buffer: BufferId,
    pub format: BufferFormat,
    pub sample_rate: u32,
    pub byte_len: usize,
}

impl StaticAsset {
    pub fn duration_secs(&self) -> f32 {
        self.byte_len as f32 / self.format.block_align() as f32 / self.sample_rate as f32
    }

    pub fn bytes_per_second(&self) -> f32 {
        (self.format.block_align() * self.sample_rate as usize) as f32
    }
}

struct CacheEntry {
    asset: StaticAsset,
    refs: usize,
}

/// Decodes each asset once and hands out the same buffer to every static
/// sound playing it. The buffer is destroyed when the last user releases it.
#[derive(Default)]
pub(crate) struct StaticBufferCache {
    entries: HashMap<String, CacheEntry>,
}

impl StaticBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(
        &mut self,
        name: &str,
        opener: &dyn StreamOpener,
        backend: &mut dyn AudioBackend,
        options: &LoadOptions,
    ) -> Result<StaticAsset> {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.refs += 1;
            log::debug!("Reusing cached buffer for '{}' ({} refs)", name, entry.refs);
            return Ok(entry.asset);
        }

        let mut stream = opener.open(name)?;
        let decoded = DecodedAudio::decode(stream.as_mut(), options)?;

        let buffer = backend.create_buffer()?;
        if let Err(e) = backend.buffer_data(buffer, decoded.format, &decoded.data, decoded.sample_rate) {
            backend.destroy_buffer(buffer);
            return Err(e);
        }

        let asset = StaticAsset {
            buffer,
            format: decoded.format,
            sample_rate: decoded.sample_rate,
            byte_len: decoded.data.len(),
        };
        log::debug!(
            "Cached '{}': {:?}, {} Hz, {:.2}s",
            name,
            asset.format,
            asset.sample_rate,
            asset.duration_secs()
        );
        self.entries
            .insert(name.to_string(), CacheEntry { asset, refs: 1 });
        Ok(asset)
    }

    /// Drop one reference. Returns true if the buffer was freed.
    pub fn release(&mut self, name: &str, backend: &mut dyn AudioBackend) -> bool {
        let Some(entry) = self.entries.get_mut(name) else {
            log::warn!("Releasing '{}' which is not cached", name);
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return false;
        }
        if let Some(entry) = self.entries.remove(name) {
            backend.destroy_buffer(entry.asset.buffer);
            log::debug!("Freed cached buffer for '{}'", name);
        }
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[cfg(test)]
    pub fn ref_count(&self, name: &str) -> usize {
        self.entries.get(name).map(|e| e.refs).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Free every buffer regardless of outstanding references.
    pub fn clear(&mut self, backend: &mut dyn AudioBackend) {
        for (_, entry) in self.entries.drain() {
            backend.destroy_buffer(entry.asset.buffer);
        }
    }
}
