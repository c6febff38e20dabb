//! In-memory catalog cache.
//!
//! Holds the last category list and the shows of the category being browsed.
//! Readers always get immutable snapshots (`Arc` slices); the only writers are
//! `load_categories` and `browse_category`.
//!
//! Ordering rules:
//!   * categories — last-to-resolve wins, and every overlapping
//!     `load_categories` call returns that same final snapshot.
//!   * shows — last-request-wins: a browse whose result arrives after a newer
//!     browse was issued is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::catalog::{CatalogClient, FetchOutcome};
use crate::fallback;
use crate::model::{Category, Episode, Show};

#[derive(Debug, Clone)]
pub struct CategoriesView {
    pub categories: Arc<[Category]>,
    /// `None` until the first load completes.
    pub outcome: Option<FetchOutcome>,
    /// Bumped on every stored result.
    pub generation: u64,
    pub fetched_at: Option<DateTime<Local>>,
}

impl Default for CategoriesView {
    fn default() -> Self {
        Self {
            categories: Arc::from(Vec::new()),
            outcome: None,
            generation: 0,
            fetched_at: None,
        }
    }
}

impl CategoriesView {
    pub fn is_loaded(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ShowsView {
    pub category_id: String,
    pub shows: Arc<[Show]>,
    pub outcome: FetchOutcome,
    /// Browse ticket this view was fetched under.
    pub ticket: u64,
    pub fetched_at: DateTime<Local>,
}

/// Decrements the in-flight counter even if the load future is dropped.
struct PendingGuard<'a>(&'a watch::Sender<usize>);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct CatalogStore {
    client: CatalogClient,
    categories: watch::Sender<CategoriesView>,
    categories_pending: watch::Sender<usize>,
    shows: watch::Sender<Option<ShowsView>>,
    browse_ticket: AtomicU64,
}

impl CatalogStore {
    pub fn new(client: CatalogClient) -> Self {
        let (categories, _) = watch::channel(CategoriesView::default());
        let (categories_pending, _) = watch::channel(0usize);
        let (shows, _) = watch::channel(None);
        Self {
            client,
            categories,
            categories_pending,
            shows,
            browse_ticket: AtomicU64::new(0),
        }
    }

    /// Fetch the category list and replace the cached one.
    pub async fn load_categories(&self) -> CategoriesView {
        {
            let _pending = PendingGuard::enter(&self.categories_pending);
            let fetched = self.client.fetch_categories().await;
            self.categories.send_modify(|view| {
                view.generation += 1;
                view.categories = Arc::from(fetched.items);
                view.outcome = Some(fetched.outcome);
                view.fetched_at = Some(Local::now());
                debug!(
                    "store: categories generation {} ({:?}, {} entries)",
                    view.generation,
                    fetched.outcome,
                    view.categories.len()
                );
            });
        }

        // Overlapping loads all report whatever resolved last, bounded by one
        // request timeout when refreshes keep overlapping.
        let mut pending = self.categories_pending.subscribe();
        if timeout(self.client.timeout(), pending.wait_for(|n| *n == 0))
            .await
            .is_err()
        {
            debug!("store: categories still loading elsewhere, reporting current view");
        }
        self.categories.borrow().clone()
    }

    /// Cached category list, loading it on first use.
    pub async fn categories(&self) -> CategoriesView {
        let cached = self.categories.borrow().clone();
        if cached.is_loaded() {
            return cached;
        }
        self.load_categories().await
    }

    /// Fetch the shows of `category_id` and make them the visible list.
    ///
    /// Returns `None` when a newer browse was issued while this one was in
    /// flight; its result is discarded.
    pub async fn browse_category(&self, category_id: &str) -> Option<ShowsView> {
        let ticket = self.browse_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = self.client.fetch_shows(category_id).await;

        let view = ShowsView {
            category_id: category_id.to_string(),
            shows: Arc::from(fetched.items),
            outcome: fetched.outcome,
            ticket,
            fetched_at: Local::now(),
        };

        let applied = self.shows.send_if_modified(|current| {
            if self.browse_ticket.load(Ordering::SeqCst) != ticket {
                return false;
            }
            *current = Some(view.clone());
            true
        });

        if applied {
            info!(
                "store: browsing '{}' ({} shows, {:?})",
                category_id,
                view.shows.len(),
                view.outcome
            );
            Some(view)
        } else {
            debug!(
                "store: discarded stale browse of '{}' (ticket {})",
                category_id, ticket
            );
            None
        }
    }

    pub fn current_categories(&self) -> CategoriesView {
        self.categories.borrow().clone()
    }

    pub fn current_shows(&self) -> Option<ShowsView> {
        self.shows.borrow().clone()
    }

    pub fn subscribe_shows(&self) -> watch::Receiver<Option<ShowsView>> {
        self.shows.subscribe()
    }

    pub fn category(&self, category_id: &str) -> Option<Category> {
        self.categories
            .borrow()
            .categories
            .iter()
            .find(|c| c.category_id == category_id)
            .cloned()
    }

    pub fn show(&self, show_id: &str) -> Option<Show> {
        self.shows
            .borrow()
            .as_ref()?
            .shows
            .iter()
            .find(|s| s.show_id == show_id)
            .cloned()
    }

    pub fn episode(&self, show_id: &str, episode_id: &str) -> Option<Episode> {
        self.show(show_id)?.episode(episode_id).cloned()
    }

    /// Storage path for the category's "play sample" button.  Static, so it
    /// works before any shows have loaded.
    pub fn sample_audio_path_for(&self, category_id: &str) -> Option<&'static str> {
        fallback::sample_audio_path(category_id)
    }
}
