use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};
use radio_types::{PlaybackState, TrackMetadata};

/// Push notifications for state and track changes.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    StateChanged(PlaybackState),
    /// Emitted when a new track becomes audible.
    TrackChanged(TrackMetadata),
}

/// Fan-out to any number of subscribers; disconnected receivers are pruned on send.
#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
