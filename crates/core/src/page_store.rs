//! Page Store: single source of truth for the in-memory projection
//! of pages and selection. Reconciles with the Object Store on load and
//! on every state transition.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::event_bus::{Event, EventBus};
use crate::model::{LogLevel, OcrRecord, Page, PageId, PageStatus};
use crate::state_machine;
use crate::store_api::ObjectStore;

struct Projection {
    pages: Vec<Page>,
    selected: HashSet<PageId>,
}

/// Single writer that owns the in-memory page list plus the current
/// selection set. Every write method first updates the Object Store, then
/// the in-memory projection, then emits the associated event — on store
/// failure the in-memory state is left untouched.
pub struct PageStore {
    store: Arc<dyn ObjectStore>,
    bus: Arc<EventBus>,
    state: RwLock<Projection>,
}

impl PageStore {
    pub fn new(store: Arc<dyn ObjectStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            state: RwLock::new(Projection {
                pages: Vec::new(),
                selected: HashSet::new(),
            }),
        }
    }

    /// Replace the in-memory list with store rows sorted by `order`.
    /// Idempotent and emits no events.
    pub async fn load_from_store(&self) -> CoreResult<()> {
        let mut pages = self.store.get_all_pages_for_display().await?;
        pages.sort_by_key(|p| p.order);
        let mut state = self.state.write().await;
        state.pages = pages;
        state.selected.clear();
        Ok(())
    }

    /// Subscribe this store to `page:queued`, lazily inserting pages the
    /// Object Store has but the in-memory list lacks — covers an Ingestor
    /// inserting rows while this projection was paused.
    pub fn spawn_resume_hook(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(move |event| {
            if let Event::PageQueued { page_id } = event {
                let this = this.clone();
                let page_id = *page_id;
                tokio::spawn(async move {
                    let already_present = {
                        let state = this.state.read().await;
                        state.pages.iter().any(|p| p.id == page_id)
                    };
                    if already_present {
                        return;
                    }
                    if let Ok(Some(page)) = this.store.get_page(page_id).await {
                        let mut state = this.state.write().await;
                        if !state.pages.iter().any(|p| p.id == page.id) {
                            state.pages.push(page);
                            state.pages.sort_by_key(|p| p.order);
                        }
                    }
                });
            }
        });
    }

    pub async fn pages(&self) -> Vec<Page> {
        self.state.read().await.pages.clone()
    }

    pub async fn selected_ids(&self) -> HashSet<PageId> {
        self.state.read().await.selected.clone()
    }

    pub async fn pages_by_status(&self, status: PageStatus) -> Vec<Page> {
        self.state
            .read()
            .await
            .pages
            .iter()
            .filter(|p| p.status == status)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: PageId) -> Option<Page> {
        self.state
            .read()
            .await
            .pages
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Overall progress across all pages, 0-100.
    pub async fn overall_progress(&self) -> u8 {
        let state = self.state.read().await;
        if state.pages.is_empty() {
            return 0;
        }
        let sum: u32 = state.pages.iter().map(|p| p.progress as u32).sum();
        (sum / state.pages.len() as u32) as u8
    }

    pub async fn add_page(&self, page: Page) -> CoreResult<()> {
        self.store.save_page(&page).await?;
        let page_id = page.id;
        {
            let mut state = self.state.write().await;
            state.pages.push(page);
            state.pages.sort_by_key(|p| p.order);
        }
        self.bus.publish(Event::PageQueued { page_id });
        Ok(())
    }

    /// Transition `id` to `to`, validating against the state machine,
    /// resetting `progress` to 0 on entering a working state (and to
    /// 100 on entering a status that implies full progress), and
    /// recording `pre_error_status` when transitioning into `Error`.
    pub async fn update_status(&self, id: PageId, to: PageStatus) -> CoreResult<()> {
        let mut page = self
            .get(id)
            .await
            .ok_or_else(|| CoreError::StoreCorrupt(format!("page {id} not found")))?;

        let from = page.status;
        state_machine::transition(from, to)?;

        if to == PageStatus::Error {
            page.pre_error_status = Some(from);
        } else if from == PageStatus::Error && page.pre_error_status == Some(to) {
            page.pre_error_status = None;
        }

        page.status = to;
        match to {
            PageStatus::Rendering | PageStatus::Recognizing => page.progress = 0,
            _ if to.implies_full_progress() => page.progress = 100,
            _ => {}
        }

        self.store.save_page(&page).await?;
        {
            let mut state = self.state.write().await;
            if let Some(slot) = state.pages.iter_mut().find(|p| p.id == id) {
                *slot = page;
            }
        }
        Ok(())
    }

    /// Revert `id` to its pre-submit status without emitting an error —
    /// used for user-aborted OCR submissions and mid-flight cancellation.
    pub async fn revert_to(&self, id: PageId, to: PageStatus) -> CoreResult<()> {
        let mut page = self
            .get(id)
            .await
            .ok_or_else(|| CoreError::StoreCorrupt(format!("page {id} not found")))?;
        page.status = to;
        self.store.save_page(&page).await?;
        let mut state = self.state.write().await;
        if let Some(slot) = state.pages.iter_mut().find(|p| p.id == id) {
            *slot = page;
        }
        Ok(())
    }

    pub async fn append_log(&self, id: PageId, level: LogLevel, message: impl Into<String>) -> CoreResult<()> {
        let mut page = self
            .get(id)
            .await
            .ok_or_else(|| CoreError::StoreCorrupt(format!("page {id} not found")))?;
        page.append_log(level, message);
        self.store.save_page(&page).await?;
        let mut state = self.state.write().await;
        if let Some(slot) = state.pages.iter_mut().find(|p| p.id == id) {
            *slot = page;
        }
        Ok(())
    }

    /// Persists the full OCR record verbatim (so boxes/tokens survive for
    /// Doc Generator consumption) and mirrors just the recognized text
    /// onto the page row for display.
    pub async fn set_ocr_result(&self, id: PageId, record: &OcrRecord) -> CoreResult<()> {
        let mut page = self
            .get(id)
            .await
            .ok_or_else(|| CoreError::StoreCorrupt(format!("page {id} not found")))?;
        page.ocr_text = Some(record.text.clone());
        self.store.save_ocr_record(id, record).await?;
        self.store.save_page(&page).await?;
        let mut state = self.state.write().await;
        if let Some(slot) = state.pages.iter_mut().find(|p| p.id == id) {
            slot.ocr_text = page.ocr_text.take();
        }
        Ok(())
    }

    /// Delete pages and their Object Store cascade. Any in-flight task on
    /// a deleted page is cancelled by the caller before or after this
    /// call (callers own queue cancellation).
    pub async fn delete_pages(&self, ids: &[PageId]) -> CoreResult<()> {
        for id in ids {
            self.store.delete_page(*id).await?;
        }
        let mut state = self.state.write().await;
        state.pages.retain(|p| !ids.contains(&p.id));
        for id in ids {
            state.selected.remove(id);
        }
        Ok(())
    }

    /// Reorder pages so the resulting `order` values are a dense
    /// permutation of `{0, .., n-1}`.
    pub async fn reorder(&self, updates: &[(PageId, i64)]) -> CoreResult<()> {
        self.store.update_pages_order(updates).await?;
        let mut state = self.state.write().await;
        for (id, order) in updates {
            if let Some(slot) = state.pages.iter_mut().find(|p| p.id == *id) {
                slot.order = *order;
            }
        }
        state.pages.sort_by_key(|p| p.order);
        Ok(())
    }

    pub async fn clear_selection(&self) {
        self.state.write().await.selected.clear();
    }

    pub async fn select_all(&self) {
        let mut state = self.state.write().await;
        let ids: Vec<PageId> = state.pages.iter().map(|p| p.id).collect();
        state.selected = ids.into_iter().collect();
    }

    pub async fn toggle_select(&self, id: PageId) {
        let mut state = self.state.write().await;
        if !state.selected.remove(&id) {
            state.selected.insert(id);
        }
    }
}
