use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use engine_logging::engine_info;

use crate::Poller;

/// Keeps at most one active poller per job key.
#[derive(Default)]
pub struct PollerRegistry {
    pollers: Mutex<HashMap<String, Poller>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `poller` under `key`, stopping whichever poller held the key.
    ///
    /// The map stays locked until the new poller is running. Starting and
    /// stopping a poller never calls into the sink or back into the registry.
    pub fn start(&self, key: impl Into<String>, poller: Poller) -> Poller {
        let key = key.into();
        let mut pollers = self.lock();
        if let Some(previous) = pollers.insert(key.clone(), poller.clone()) {
            engine_info!("Replacing poller for job {}", key);
            previous.stop();
        }
        poller.start();
        poller
    }

    /// Stops and forgets the poller for `key`. Returns false if none existed.
    pub fn stop(&self, key: &str) -> bool {
        let mut pollers = self.lock();
        match pollers.remove(key) {
            Some(poller) => {
                poller.stop();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Poller> {
        self.lock().get(key).cloned()
    }

    /// Keys whose pollers are still running, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, poller)| poller.is_active())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Poller>> {
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
