//! Queue Manager: bounded work queues with per-page cancellation
//! handles. Built on the `Semaphore` + `JoinSet` concurrency idiom used
//! for page/image processing loops elsewhere, generalized here to
//! support per-item cancellation and FIFO admission tracking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::PageId;

/// Why `add` refused to admit a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// A task for this page is already queued or running in this queue.
    #[error("a task for this page is already in flight on this queue")]
    AlreadyInFlight,
    /// The queue is paused; no new admissions are accepted until `resume()`.
    #[error("this queue is paused")]
    Paused,
}

/// One of the three bounded work queues (render / OCR / generation).
/// Submission order within a queue is FIFO; slot selection across queues
/// is independent.
pub struct BoundedQueue {
    semaphore: Arc<Semaphore>,
    tokens: Arc<Mutex<HashMap<PageId, CancellationToken>>>,
    paused: Arc<Mutex<bool>>,
}

/// Snapshot of queue occupancy, for `stats()`.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub capacity: usize,
    pub available_permits: usize,
    pub in_flight: usize,
    pub paused: bool,
}

impl BoundedQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            tokens: Arc::new(Mutex::new(HashMap::new())),
            paused: Arc::new(Mutex::new(false)),
        }
    }

    /// Admit `page_id` and run `task` once a slot is free. `task` receives
    /// a [`CancellationToken`] it must check before starting work and
    /// periodically during long operations (every `await` on store/worker/
    /// network I/O is a cancellation checkpoint).
    ///
    /// Rejects re-admission of a page that already has a task tracked on
    /// this queue: at most one in-flight task per page per queue.
    pub async fn add<F, Fut>(&self, page_id: PageId, task: F) -> Result<JoinHandle<()>, AdmissionError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if *self.paused.lock().await {
            return Err(AdmissionError::Paused);
        }

        let token = {
            let mut tokens = self.tokens.lock().await;
            if tokens.contains_key(&page_id) {
                return Err(AdmissionError::AlreadyInFlight);
            }
            let token = CancellationToken::new();
            tokens.insert(page_id, token.clone());
            token
        };

        let semaphore = self.semaphore.clone();
        let tokens = self.tokens.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = task_token.cancelled() => None,
            };

            if let Some(permit) = permit {
                if !task_token.is_cancelled() {
                    task(task_token.clone()).await;
                }
                drop(permit);
            }

            tokens.lock().await.remove(&page_id);
        });

        Ok(handle)
    }

    /// Idempotent cancellation: revokes the token (freeing the slot if
    /// still queued, signalling the running task if already started) and
    /// removes it from the tracking map immediately so a subsequent
    /// `add()` for the same page is accepted right away rather than
    /// waiting for the spawned task to observe cancellation and clean up.
    pub async fn cancel(&self, page_id: PageId) {
        if let Some(token) = self.tokens.lock().await.remove(&page_id) {
            token.cancel();
        }
    }

    pub async fn pause(&self) {
        *self.paused.lock().await = true;
    }

    pub async fn resume(&self) {
        *self.paused.lock().await = false;
    }

    /// Cancel every in-flight/queued task, releasing all tokens.
    pub async fn clear(&self) {
        let mut tokens = self.tokens.lock().await;
        for (_, token) in tokens.drain() {
            token.cancel();
        }
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.semaphore.available_permits() + self.in_flight_count().await,
            available_permits: self.semaphore.available_permits(),
            in_flight: self.in_flight_count().await,
            paused: *self.paused.lock().await,
        }
    }

    async fn in_flight_count(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_in_flight(&self, page_id: PageId) -> bool {
        self.tokens.lock().await.contains_key(&page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_second_admission_for_same_page() {
        let queue = BoundedQueue::new(1);
        let page = PageId::new();
        let _h1 = queue
            .add(page, |_token| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
            .await
            .unwrap();

        let err = queue.add(page, |_token| async {}).await.unwrap_err();
        assert_eq!(err, AdmissionError::AlreadyInFlight);
    }

    #[tokio::test]
    async fn cancel_before_start_releases_slot_without_running_task() {
        let queue = BoundedQueue::new(1);
        let page = PageId::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();

        // Fill the only slot so our task is left waiting on the semaphore.
        let blocker = PageId::new();
        let _h0 = queue
            .add(blocker, |_token| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .await
            .unwrap();

        let handle = queue
            .add(page, move |_token| async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        queue.cancel(page).await;
        handle.await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cross_page_admission_is_independent() {
        let queue = BoundedQueue::new(2);
        let p1 = PageId::new();
        let p2 = PageId::new();
        assert!(queue.add(p1, |_| async {}).await.is_ok());
        assert!(queue.add(p2, |_| async {}).await.is_ok());
    }

    #[tokio::test]
    async fn pause_rejects_new_admissions_until_resumed() {
        let queue = BoundedQueue::new(2);
        queue.pause().await;

        let err = queue.add(PageId::new(), |_| async {}).await.unwrap_err();
        assert_eq!(err, AdmissionError::Paused);

        queue.resume().await;
        assert!(queue.add(PageId::new(), |_| async {}).await.is_ok());
    }
}
