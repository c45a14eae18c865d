//! Notifier that keeps everything it receives.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::port::outbound::notifier::{ChainAlert, Event, JobEvent, MarketUpdate, Notifier};

/// Records events; clones share one log.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn market_updates(&self) -> Vec<MarketUpdate> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::MarketStateChanged(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<ChainAlert> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::ChainAlert(alert) => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn jobs(&self) -> Vec<JobEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::JobFinished(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Event) {
        self.events.lock().push(event);
    }
}
