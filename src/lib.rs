//! PetalSound: a voice-pooled 3D sound engine.
//!
//! Applications create many named sounds while the audio backend only offers
//! a limited number of voices. The engine hands voices to sounds on demand,
//! preempts the least important sound when they run out and brings queued
//! sounds back once voices free up. Static sounds share one decoded buffer per
//! file; streaming sounds read their file incrementally through a ring of
//! buffers.
//!
//! ```no_run
//! use petalsound::{PetalSoundDesc, PetalSoundEngine, SoundOptions};
//! use std::time::Duration;
//!
//! # fn main() -> petalsound::Result<()> {
//! let engine = PetalSoundEngine::with_default_output(PetalSoundDesc::default())?;
//! let music = engine.create_sound("music", "res/theme.ogg", SoundOptions::new().streaming(true))?;
//! engine.play(music)?;
//! loop {
//!     engine.update(Duration::from_millis(16));
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

mod allocator;
pub mod audio_data;
pub mod backend;
mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
mod listener;
pub mod math;
mod scheduler;
pub mod sound;

pub use audio_data::{LoadOptions, MemoryOpener, StreamOpener, SymphoniaOpener};
pub use backend::{AudioBackend, DistanceModel, MixerHandle, OutputDevice, SoftwareMixer};
pub use config::{PetalSoundDesc, SchedulingMode};
pub use engine::{EngineStats, PetalSoundEngine};
pub use error::{PetalSoundError, Result};
pub use events::PetalSoundEvent;
pub use math::{Pose, TransformSource};
pub use sound::{
    FadeAction, PlayState, SoundCallback, SoundId, SoundInfo, SoundKind, SoundOptions,
    SoundProperties, SoundRef,
};
