//! Removal events.

use prune_core::ImageRecord;
use std::sync::Mutex;

/// Receives one event per image removed from a node
pub trait EventSink: Send + Sync {
    fn image_removed(&self, node: &str, image: &ImageRecord);
}

/// Emits removal events as structured log lines
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn image_removed(&self, node: &str, image: &ImageRecord) {
        tracing::info!(
            node = node,
            digest = %image.digest,
            name = image.name.as_deref().unwrap_or(""),
            reason = "ImageRemoved",
            "[Event] Removed {} from node {}",
            image,
            node
        );
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(String, ImageRecord)>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, ImageRecord)> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingEventSink {
    fn image_removed(&self, node: &str, image: &ImageRecord) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push((node.to_string(), image.clone()));
    }
}
