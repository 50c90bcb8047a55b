//! Cancellable timers backed by spawned sleeps.
//!
//! Each armed timer gets a fresh generation. A fired timer is only honoured
//! if its generation is still the armed one, so a sleep that completes
//! right as it is cancelled or re-armed is ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::TimerKey;

/// Notification sent by a sleep task when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fired {
    key: TimerKey,
    generation: u64,
}

#[derive(Debug)]
struct Armed {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct Timers {
    sender: mpsc::UnboundedSender<Fired>,
    armed: HashMap<TimerKey, Armed>,
    generation: u64,
}

impl Timers {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Fired>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let timers = Self {
            sender,
            armed: HashMap::new(),
            generation: 0,
        };
        (timers, receiver)
    }

    /// Arm `key` to fire after `after`, replacing a timer already armed
    /// under the same key.
    pub(crate) fn arm(&mut self, key: TimerKey, after: Duration) {
        self.cancel(key);
        self.generation += 1;
        let generation = self.generation;
        let sender = self.sender.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = sender.send(Fired { key, generation });
        });
        self.armed.insert(key, Armed { generation, task });
    }

    /// Cancel `key`. Cancelling a timer that is not armed is a no-op.
    pub(crate) fn cancel(&mut self, key: TimerKey) {
        if let Some(armed) = self.armed.remove(&key) {
            armed.task.abort();
        }
    }

    /// Accept a fired notification. Returns the key if it is still current.
    pub(crate) fn take_fired(&mut self, fired: Fired) -> Option<TimerKey> {
        match self.armed.get(&fired.key) {
            Some(armed) if armed.generation == fired.generation => {
                self.armed.remove(&fired.key);
                Some(fired.key)
            }
            _ => None,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.task.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
