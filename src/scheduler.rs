use crate::error::{PetalSoundError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Dedicated thread that runs a refill pass, sleeps, and repeats until stopped.
pub(crate) struct StreamingThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamingThread {
    pub fn spawn<F>(interval: Duration, mut pass: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("petalsound-streaming".to_string())
            .spawn(move || {
                log::debug!("Streaming thread started ({:?} interval)", interval);
                while !flag.load(Ordering::Acquire) {
                    pass();
                    thread::sleep(interval);
                }
                log::debug!("Streaming thread exiting");
            })
            .map_err(|e| PetalSoundError::Engine(format!("Failed to spawn streaming thread: {}", e)))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Streaming thread panicked");
            }
        }
    }
}

impl Drop for StreamingThread {
    fn drop(&mut self) {
        self.stop();
    }
}
