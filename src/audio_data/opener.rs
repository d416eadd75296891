use crate::audio_data::{AudioStream, MemoryStream, StreamFormat, SymphoniaStream};
use crate::error::{PetalSoundError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves an asset name to a readable stream.
///
/// The engine calls this once per streaming sound and once per static asset
/// that is not already cached. PetalSound ships [`SymphoniaOpener`] for files
/// on disk and [`MemoryOpener`] for assets the host already holds in memory;
/// hosts with their own archive formats implement this trait.
pub trait StreamOpener: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn AudioStream>>;
}

/// Opens files from disk and decodes them with symphonia.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaOpener;

impl StreamOpener for SymphoniaOpener {
    fn open(&self, name: &str) -> Result<Box<dyn AudioStream>> {
        Ok(Box::new(SymphoniaStream::open(name)?))
    }
}

/// Serves PCM assets registered by name.
#[derive(Default)]
pub struct MemoryOpener {
    assets: RwLock<HashMap<String, (Arc<[u8]>, StreamFormat)>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Arc<[u8]>>, format: StreamFormat) {
        self.assets
            .write()
            .insert(name.into(), (data.into(), format));
    }

    pub fn insert_i16(&self, name: impl Into<String>, samples: &[i16], channels: u16, sample_rate: u32) {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.insert(name, bytes, StreamFormat::new(channels, sample_rate, 16));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.assets.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.assets.read().contains_key(name)
    }
}

impl StreamOpener for MemoryOpener {
    fn open(&self, name: &str) -> Result<Box<dyn AudioStream>> {
        let assets = self.assets.read();
        let (data, format) = assets.get(name).ok_or_else(|| {
            PetalSoundError::AudioLoading(format!("No in-memory asset named '{}'", name))
        })?;
        Ok(Box::new(MemoryStream::new(Arc::clone(data), *format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_opener_serves_registered_assets() {
        let opener = MemoryOpener::new();
        opener.insert_i16("beep", &[0, 100, 200], 1, 8000);
        let stream = opener.open("beep").unwrap();
        assert_eq!(stream.total_bytes(), Some(6));
        assert!(opener.open("missing").is_err());
        assert!(opener.remove("beep"));
        assert!(!opener.contains("beep"));
    }

    #[test]
    fn symphonia_opener_reports_missing_files() {
        assert!(SymphoniaOpener.open("does/not/exist.ogg").is_err());
    }
}
