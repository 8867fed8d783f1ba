//! Typed publish/subscribe bus. No component may invoke another
//! directly except through its documented API; cross-component reactions
//! flow only through this bus.

use std::sync::Mutex;

use serde::Serialize;

use crate::model::{ArtifactFormat, OcrRecord, PageId, SourceFileId};

/// Every notification producers publish and consumers subscribe to.
/// `Serialize`, not `Deserialize` — events flow out to WebSocket
/// clients, never in.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Event {
    PageQueued { page_id: PageId },
    RenderStart { page_id: PageId },
    RenderDone { page_id: PageId, width: u32, height: u32, thumbnail_bytes: usize },
    RenderError { page_id: PageId, error: String },
    RenderProgress { done: usize, total: usize },
    OcrQueued { page_id: PageId },
    OcrStart { page_id: PageId },
    OcrSuccess { page_id: PageId, result: Box<OcrRecord> },
    OcrError { page_id: PageId, error: String },
    OcrCancel { page_id: PageId },
    GenStart { page_id: PageId, format: ArtifactFormat },
    GenSuccess { page_id: PageId, format: ArtifactFormat },
    GenError { page_id: PageId, format: ArtifactFormat, error: String },
    ExportStart { document_id: String, format: ArtifactFormat },
    ExportDone { document_id: String, format: ArtifactFormat },
    ExportError { document_id: String, format: ArtifactFormat, error: String },
    HealthChange { available: bool, full: bool, degraded: bool },
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Process-wide typed event bus. Subscribers are invoked synchronously, in
/// registration order, on every `publish` call.
///
/// Modeled with an explicit constructor rather than a lazily-initialized
/// global so tests can build fresh, isolated copies.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber. Returns nothing addressable because this
    /// bus does not support unsubscription — subscribers are expected to
    /// live for the process/test lifetime, matching the
    /// `broadcast::Sender` channels which are never individually revoked.
    pub fn subscribe(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("event bus subscriber lock poisoned")
            .push(Box::new(f));
    }

    pub fn publish(&self, event: Event) {
        let subs = self
            .subscribers
            .lock()
            .expect("event bus subscriber lock poisoned");
        for sub in subs.iter() {
            sub(&event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn subscribers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().unwrap().push(2));

        bus.publish(Event::PageQueued {
            page_id: PageId::new(),
        });

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn all_subscribers_receive_every_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            bus.subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(Event::HealthChange {
            available: true,
            full: false,
            degraded: false,
        });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
