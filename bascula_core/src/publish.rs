//! Fan-out of published readings.
//!
//! Two ways to consume: a `watch` receiver for async code, or a plain
//! callback for anything else. Both only see changes.

use tokio::sync::watch;

use crate::reading::WeightReading;

pub type Observer = Box<dyn Fn(&WeightReading) + Send + Sync>;

pub struct ReadingBus {
    tx: watch::Sender<WeightReading>,
    observers: Vec<Observer>,
}

impl Default for ReadingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadingBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingBus")
            .field("current", &*self.tx.borrow())
            .field("observers", &self.observers.len())
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

impl ReadingBus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WeightReading::default());
        Self {
            tx,
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WeightReading> {
        self.tx.subscribe()
    }

    pub fn observe<F>(&mut self, f: F)
    where
        F: Fn(&WeightReading) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(f));
    }

    pub fn snapshot(&self) -> WeightReading {
        self.tx.borrow().clone()
    }

    /// Publish `reading` if it differs from the last one. Returns whether
    /// anything was published.
    pub fn publish(&self, reading: &WeightReading) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if current == reading {
                false
            } else {
                *current = reading.clone();
                true
            }
        });
        if changed {
            for obs in &self.observers {
                obs(reading);
            }
        }
        changed
    }
}
