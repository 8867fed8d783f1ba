//! Health Monitor: periodic poll of the remote OCR service, exposing
//! a synchronous, possibly-stale read of `{available, full, degraded}`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::event_bus::{Event, EventBus};

/// Current view of the remote OCR service's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthStatus {
    pub is_available: bool,
    pub is_full: bool,
    pub queue_depth: u32,
    pub max_size: u32,
}

impl HealthStatus {
    /// `degraded`.
    pub fn degraded(&self) -> bool {
        !self.is_available || self.is_full
    }
}

/// One probe of the remote service's health endpoint. Implemented by
/// `server::health::HttpHealthProbe` (reqwest) in production and by a
/// scripted stub in tests.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

/// Result of one health probe. A transport failure degrades to
/// `unavailable`; a `full` response sets `is_full`; recovery requires a
/// single successful healthy response.
pub enum ProbeOutcome {
    Healthy { queue_depth: u32, max_size: u32 },
    Full { queue_depth: u32, max_size: u32 },
    Unreachable,
}

/// Background poller. Publishes [`Event::HealthChange`] only on edge
/// transitions, to avoid UI jitter, and exposes a synchronous `current()`
/// read for pre-submission admission checks; a stale read up to one poll
/// cycle old is acceptable.
pub struct HealthMonitor {
    status: Arc<Mutex<HealthStatus>>,
}

impl HealthMonitor {
    /// Spawn the polling loop. Returns a handle whose `current()` can be
    /// read synchronously from anywhere; drop the returned `JoinHandle`
    /// to stop polling.
    pub fn spawn(
        probe: Arc<dyn HealthProbe>,
        bus: Arc<EventBus>,
        poll_interval: Duration,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let status = Arc::new(Mutex::new(HealthStatus::default()));
        let loop_status = status.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                let outcome = probe.probe().await;
                let next = match outcome {
                    ProbeOutcome::Healthy {
                        queue_depth,
                        max_size,
                    } => HealthStatus {
                        is_available: true,
                        is_full: false,
                        queue_depth,
                        max_size,
                    },
                    ProbeOutcome::Full {
                        queue_depth,
                        max_size,
                    } => HealthStatus {
                        is_available: true,
                        is_full: true,
                        queue_depth,
                        max_size,
                    },
                    ProbeOutcome::Unreachable => HealthStatus {
                        is_available: false,
                        ..HealthStatus::default()
                    },
                };

                let mut guard = loop_status.lock().expect("health status lock poisoned");
                if *guard != next {
                    tracing::info!(
                        available = next.is_available,
                        full = next.is_full,
                        "OCR service health changed"
                    );
                    *guard = next;
                    bus.publish(Event::HealthChange {
                        available: next.is_available,
                        full: next.is_full,
                        degraded: next.degraded(),
                    });
                }
            }
        });

        (Self { status }, handle)
    }

    /// Synchronous, possibly up-to-one-poll-cycle-stale read.
    pub fn current(&self) -> HealthStatus {
        *self.status.lock().expect("health status lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProbe {
        outcomes: Mutex<Vec<ProbeOutcome>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                ProbeOutcome::Unreachable
            } else {
                outcomes.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn publishes_only_on_edge_transitions() {
        let probe = Arc::new(ScriptedProbe {
            outcomes: Mutex::new(vec![
                ProbeOutcome::Healthy {
                    queue_depth: 0,
                    max_size: 10,
                },
                ProbeOutcome::Healthy {
                    queue_depth: 0,
                    max_size: 10,
                },
                ProbeOutcome::Full {
                    queue_depth: 10,
                    max_size: 10,
                },
            ]),
            calls: AtomicUsize::new(0),
        });
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let e2 = events.clone();
        bus.subscribe(move |ev| e2.lock().unwrap().push(ev.clone()));

        let (monitor, handle) =
            HealthMonitor::spawn(probe, bus, Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(monitor.current().is_full || monitor.current().is_available);
        // Exactly two edge transitions: unavailable->available, available->full.
        let change_count = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::HealthChange { .. }))
            .count();
        assert!(change_count >= 1 && change_count <= 2);
    }
}
