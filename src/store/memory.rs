//! In-memory [`DigestStore`] implementation for tests and embedding.
//!
//! Uses `Vec`s and `HashMap`s behind `std::sync::RwLock`. No lock is held
//! across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::models::{
    CuratedItem, DigestItem, InteractionEvent, NewSource, RunRecord, Source, SourceUpdate,
};

use super::{fold_case, search_text, DigestStore, Engagement};

#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<Vec<DigestItem>>,
    runs: RwLock<Vec<RunRecord>>,
    sources: RwLock<Vec<Source>>,
    interactions: RwLock<Vec<InteractionEvent>>,
    preferences: RwLock<HashMap<String, Vec<f32>>>,
    favorites: RwLock<Vec<(String, String)>>,
    reads: RwLock<HashSet<(String, String)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run recorded so far, oldest first.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn is_read(&self, user_id: &str, item_id: &str) -> bool {
        self.reads
            .read()
            .map(|r| r.contains(&(user_id.to_string(), item_id.to_string())))
            .unwrap_or(false)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// Newest date first; within a date, most recently inserted first.
fn newest_first(items: &[DigestItem]) -> Vec<DigestItem> {
    let mut out: Vec<DigestItem> = items.iter().rev().cloned().collect();
    out.sort_by(|a, b| b.item.date.cmp(&a.item.date));
    out
}

#[async_trait]
impl DigestStore for InMemoryStore {
    async fn insert_items(&self, items: &[CuratedItem]) -> Result<Vec<String>> {
        let mut stored = write(&self.items)?;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = uuid::Uuid::new_v4().to_string();
            stored.push(DigestItem {
                id: id.clone(),
                item: item.clone(),
                created_at: now,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_item(&self, id: &str) -> Result<Option<DigestItem>> {
        Ok(read(&self.items)?.iter().find(|i| i.id == id).cloned())
    }

    async fn items_for_date(&self, date: NaiveDate) -> Result<Vec<DigestItem>> {
        Ok(read(&self.items)?
            .iter()
            .filter(|i| i.item.date == date)
            .cloned()
            .collect())
    }

    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = read(&self.items)?.iter().map(|i| i.item.date).collect();
        dates.sort_by(|a, b| b.cmp(a));
        dates.dedup();
        Ok(dates)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<DigestItem>> {
        let needle = fold_case(query);
        let items = read(&self.items)?;
        let matching: Vec<DigestItem> = items
            .iter()
            .filter(|i| search_text(&i.item.title, &i.item.summary).contains(&needle))
            .cloned()
            .collect();
        let mut out = newest_first(&matching);
        out.truncate(limit);
        Ok(out)
    }

    async fn recent_items(&self, limit: usize) -> Result<Vec<DigestItem>> {
        let mut out = newest_first(&read(&self.items)?);
        out.truncate(limit);
        Ok(out)
    }

    async fn embedded_items(&self) -> Result<Vec<DigestItem>> {
        Ok(read(&self.items)?
            .iter()
            .filter(|i| i.item.embedding.is_some())
            .cloned()
            .collect())
    }

    async fn items_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<DigestItem>> {
        let items = read(&self.items)?;
        let missing = items.iter().filter(|i| i.item.embedding.is_none()).cloned();
        Ok(match limit {
            Some(n) => missing.take(n).collect(),
            None => missing.collect(),
        })
    }

    async fn set_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let mut items = write(&self.items)?;
        match items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.item.embedding = Some(embedding.to_vec());
                Ok(())
            }
            None => bail!("digest item not found: {}", id),
        }
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        write(&self.runs)?.push(run.clone());
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        Ok(read(&self.runs)?.iter().rev().take(limit).cloned().collect())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources = read(&self.sources)?.clone();
        sources.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        Ok(sources)
    }

    async fn active_sources(&self) -> Result<Vec<Source>> {
        Ok(read(&self.sources)?
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn create_source(&self, source: &NewSource) -> Result<Source> {
        let mut sources = write(&self.sources)?;
        if sources.iter().any(|s| s.url == source.url) {
            bail!("source already exists: {}", source.url);
        }
        let created = Source {
            id: uuid::Uuid::new_v4().to_string(),
            url: source.url.clone(),
            name: source.name.clone(),
            category: source.category.clone(),
            is_active: true,
            created_at: Utc::now(),
        };
        sources.push(created.clone());
        Ok(created)
    }

    async fn update_source(&self, id: &str, update: &SourceUpdate) -> Result<bool> {
        let mut sources = write(&self.sources)?;
        let Some(source) = sources.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        if let Some(url) = &update.url {
            source.url = url.clone();
        }
        if let Some(name) = &update.name {
            source.name = name.clone();
        }
        if let Some(category) = &update.category {
            source.category = category.clone();
        }
        if let Some(active) = update.is_active {
            source.is_active = active;
        }
        Ok(true)
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut sources = write(&self.sources)?;
        let before = sources.len();
        sources.retain(|s| s.id != id);
        Ok(sources.len() != before)
    }

    async fn record_interaction(&self, event: &InteractionEvent) -> Result<()> {
        write(&self.interactions)?.push(event.clone());
        Ok(())
    }

    async fn interactions_for_user(&self, user_id: &str) -> Result<Vec<InteractionEvent>> {
        Ok(read(&self.interactions)?
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn preference_vector(&self, user_id: &str) -> Result<Option<Vec<f32>>> {
        Ok(read(&self.preferences)?.get(user_id).cloned())
    }

    async fn save_preference_vector(&self, user_id: &str, vector: &[f32]) -> Result<()> {
        write(&self.preferences)?.insert(user_id.to_string(), vector.to_vec());
        Ok(())
    }

    async fn toggle_favorite(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let mut favorites = write(&self.favorites)?;
        let key = (user_id.to_string(), item_id.to_string());
        if let Some(pos) = favorites.iter().position(|f| *f == key) {
            favorites.remove(pos);
            Ok(false)
        } else {
            favorites.push(key);
            Ok(true)
        }
    }

    async fn favorites(&self, user_id: &str) -> Result<Vec<DigestItem>> {
        let favorite_ids: Vec<String> = read(&self.favorites)?
            .iter()
            .rev()
            .filter(|(u, _)| u == user_id)
            .map(|(_, i)| i.clone())
            .collect();
        let items = read(&self.items)?;
        Ok(favorite_ids
            .iter()
            .filter_map(|id| items.iter().find(|i| &i.id == id).cloned())
            .collect())
    }

    async fn mark_read(&self, user_id: &str, item_id: &str) -> Result<()> {
        write(&self.reads)?.insert((user_id.to_string(), item_id.to_string()));
        Ok(())
    }

    async fn engaged_items(
        &self,
        engagement: Engagement,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DigestItem>> {
        let engaged: HashSet<String> = match engagement {
            Engagement::Favorited => {
                read(&self.favorites)?.iter().map(|(_, i)| i.clone()).collect()
            }
            Engagement::Read => read(&self.reads)?.iter().map(|(_, i)| i.clone()).collect(),
        };
        let matching: Vec<DigestItem> = read(&self.items)?
            .iter()
            .filter(|i| engaged.contains(&i.id) && i.item.date >= from && i.item.date <= to)
            .cloned()
            .collect();
        let mut out = newest_first(&matching);
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Sentiment};

    fn curated(title: &str, date: (i32, u32, u32)) -> CuratedItem {
        CuratedItem {
            title: title.into(),
            summary: format!("about {title}"),
            tldr: "tldr".into(),
            sentiment: Sentiment::Neutral,
            category: Category::Misc,
            source_url: format!("https://example.com/{title}"),
            source_name: "Example".into(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn test_keyword_search_newest_date_first() {
        let store = InMemoryStore::new();
        store
            .insert_items(&[
                curated("Rust old", (2024, 1, 1)),
                curated("Python", (2024, 1, 2)),
                curated("Rust new", (2024, 1, 3)),
            ])
            .await
            .unwrap();

        let hits = store.keyword_search("RUST", 10).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|h| h.item.title.as_str()).collect();
        assert_eq!(titles, vec!["Rust new", "Rust old"]);
    }

    #[tokio::test]
    async fn test_keyword_search_folds_non_ascii() {
        let store = InMemoryStore::new();
        store
            .insert_items(&[curated("Émile ships Ärger", (2024, 1, 1))])
            .await
            .unwrap();
        for query in ["émile", "ÉMILE", "ärger"] {
            assert_eq!(store.keyword_search(query, 10).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_engaged_items_filter_by_kind_and_window() {
        let store = InMemoryStore::new();
        let ids = store
            .insert_items(&[
                curated("before", (2024, 1, 1)),
                curated("inside", (2024, 1, 5)),
                curated("read", (2024, 1, 6)),
            ])
            .await
            .unwrap();
        store.toggle_favorite("u1", &ids[0]).await.unwrap();
        store.toggle_favorite("u1", &ids[1]).await.unwrap();
        store.mark_read("u2", &ids[2]).await.unwrap();

        let from = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let favorited = store
            .engaged_items(Engagement::Favorited, from, to, 10)
            .await
            .unwrap();
        assert_eq!(favorited.len(), 1);
        assert_eq!(favorited[0].id, ids[1]);
        let read = store.engaged_items(Engagement::Read, from, to, 10).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, ids[2]);
    }

    #[tokio::test]
    async fn test_items_for_date_keep_insertion_order() {
        let store = InMemoryStore::new();
        store
            .insert_items(&[curated("b", (2024, 2, 1)), curated("a", (2024, 2, 1))])
            .await
            .unwrap();
        let items = store
            .items_for_date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
            .await
            .unwrap();
        let titles: Vec<_> = items.iter().map(|h| h.item.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_toggle_favorite_flips() {
        let store = InMemoryStore::new();
        let ids = store
            .insert_items(&[curated("x", (2024, 1, 1))])
            .await
            .unwrap();
        assert!(store.toggle_favorite("u1", &ids[0]).await.unwrap());
        assert_eq!(store.favorites("u1").await.unwrap().len(), 1);
        assert!(!store.toggle_favorite("u1", &ids[0]).await.unwrap());
        assert!(store.favorites("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_source_url_rejected() {
        let store = InMemoryStore::new();
        let new = NewSource {
            url: "https://example.com/rss".into(),
            name: "Example".into(),
            category: "misc".into(),
        };
        store.create_source(&new).await.unwrap();
        assert!(store.create_source(&new).await.is_err());
    }
}
