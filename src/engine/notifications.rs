use crate::events::PetalSoundEvent;
use crate::sound::{SoundCallback, SoundId};
use crossbeam_channel::Sender;

/// Events and callbacks collected under the engine lock, delivered after it
/// is released so a callback can safely call back into the engine.
#[derive(Default)]
pub(crate) struct Notifications {
    events: Vec<PetalSoundEvent>,
    callbacks: Vec<(SoundCallback, SoundId)>,
}

impl Notifications {
    pub fn event(&mut self, event: PetalSoundEvent) {
        self.events.push(event);
    }

    pub fn callback(&mut self, callback: Option<SoundCallback>, id: SoundId) {
        if let Some(callback) = callback {
            self.callbacks.push((callback, id));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.callbacks.is_empty()
    }

    pub fn dispatch(self, sender: &Sender<PetalSoundEvent>) {
        for event in self.events {
            if event.is_warning() {
                log::debug!("Event: {:?}", event);
            }
            // The engine owns the receiver, so this only fails during teardown
            let _ = sender.send(event);
        }
        for (callback, id) in self.callbacks {
            callback(id);
        }
    }
}
