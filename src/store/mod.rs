//! Storage abstraction for the digest.
//!
//! The [`DigestStore`] trait covers everything the pipeline, retrieval and
//! HTTP layers need to persist or read. Two backends implement it:
//!
//! - [`SqliteStore`]: the production backend, see [`crate::migrate`]
//! - [`InMemoryStore`]: `RwLock`-guarded maps for tests and embedding
//!
//! Implementations must be `Send + Sync` to work behind `Arc<dyn DigestStore>`.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{
    CuratedItem, DigestItem, InteractionEvent, NewSource, RunRecord, Source, SourceUpdate,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend for the digest.
///
/// # Ordering contracts
///
/// - [`items_for_date`](DigestStore::items_for_date) returns insertion order.
/// - [`keyword_search`](DigestStore::keyword_search) and
///   [`recent_items`](DigestStore::recent_items) return newest date first.
/// - [`distinct_dates`](DigestStore::distinct_dates) returns newest first.
/// - [`list_sources`](DigestStore::list_sources) orders by category, then name.
#[async_trait]
pub trait DigestStore: Send + Sync {
    // ---- digest items ----

    /// Inserts items atomically and returns their new ids in input order.
    async fn insert_items(&self, items: &[CuratedItem]) -> Result<Vec<String>>;

    async fn get_item(&self, id: &str) -> Result<Option<DigestItem>>;

    async fn items_for_date(&self, date: NaiveDate) -> Result<Vec<DigestItem>>;

    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>>;

    /// Case-insensitive substring match over title and summary.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<DigestItem>>;

    async fn recent_items(&self, limit: usize) -> Result<Vec<DigestItem>>;

    /// All items carrying an embedding; the candidate set for vector scans.
    async fn embedded_items(&self) -> Result<Vec<DigestItem>>;

    async fn items_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<DigestItem>>;

    async fn set_embedding(&self, id: &str, embedding: &[f32]) -> Result<()>;

    // ---- runs ----

    async fn insert_run(&self, run: &RunRecord) -> Result<()>;

    /// Most recent runs first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;

    // ---- sources ----

    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn active_sources(&self) -> Result<Vec<Source>>;

    async fn create_source(&self, source: &NewSource) -> Result<Source>;

    /// Returns `false` when no source has that id.
    async fn update_source(&self, id: &str, update: &SourceUpdate) -> Result<bool>;

    /// Returns `false` when no source has that id.
    async fn delete_source(&self, id: &str) -> Result<bool>;

    // ---- users ----

    async fn record_interaction(&self, event: &InteractionEvent) -> Result<()>;

    /// Oldest first.
    async fn interactions_for_user(&self, user_id: &str) -> Result<Vec<InteractionEvent>>;

    async fn preference_vector(&self, user_id: &str) -> Result<Option<Vec<f32>>>;

    async fn save_preference_vector(&self, user_id: &str, vector: &[f32]) -> Result<()>;

    /// Flips the favorite flag and returns the new state.
    async fn toggle_favorite(&self, user_id: &str, item_id: &str) -> Result<bool>;

    /// Newest favorite first.
    async fn favorites(&self, user_id: &str) -> Result<Vec<DigestItem>>;

    /// Idempotent.
    async fn mark_read(&self, user_id: &str, item_id: &str) -> Result<()>;

    /// Items dated within `from..=to` that any user favorited or read,
    /// newest date first.
    async fn engaged_items(
        &self,
        engagement: Engagement,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DigestItem>>;
}

/// Which kind of user engagement [`DigestStore::engaged_items`] selects on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    Favorited,
    Read,
}

/// Case-folds text for keyword matching. Both backends fold stored text and
/// queries through this, so matching is case-insensitive beyond ASCII.
pub(crate) fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// The folded text keyword search runs against: title and summary on
/// separate lines.
pub(crate) fn search_text(title: &str, summary: &str) -> String {
    format!("{}\n{}", fold_case(title), fold_case(summary))
}
