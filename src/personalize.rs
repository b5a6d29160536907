//! Personalization ranker.
//!
//! A user's preference vector is a cache derived from their interaction
//! history: the weighted mean of the embeddings of items they touched,
//! L2-normalized. It is rebuilt from scratch on every refresh and never
//! required for correctness. Every path here degrades to the
//! unpersonalized ordering instead of failing.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::PersonalizationConfig;
use crate::embedding::cosine_similarity;
use crate::models::{InteractionEvent, InteractionType, ScoredItem};
use crate::store::DigestStore;

/// Pending refresh requests beyond this are dropped.
pub const REFRESH_QUEUE_CAPACITY: usize = 100;

const DWELL_BONUS_PER_MINUTE: f32 = 0.5;
const DWELL_BONUS_CAP: f32 = 2.0;

/// How much one interaction pulls the preference vector toward its item.
pub fn interaction_weight(kind: InteractionType, dwell_seconds: Option<i64>) -> f32 {
    match kind {
        InteractionType::Click => 1.0,
        InteractionType::Read => {
            let minutes = dwell_seconds.unwrap_or(0).max(0) / 60;
            2.0 + (minutes as f32 * DWELL_BONUS_PER_MINUTE).min(DWELL_BONUS_CAP)
        }
        InteractionType::Favorite => 3.0,
        InteractionType::Skip => -1.0,
    }
}

/// Derives a preference vector from `events`.
///
/// `embeddings` maps item ids to their vectors; events on items without one
/// are ignored, as are vectors whose length differs from the first one
/// seen. Returns `None` when the net weight is not positive or the mean is
/// the zero vector.
pub fn compute_preference_vector(
    events: &[InteractionEvent],
    embeddings: &HashMap<String, Vec<f32>>,
) -> Option<Vec<f32>> {
    let mut sum: Vec<f32> = Vec::new();
    let mut total_weight = 0.0f32;

    for event in events {
        let Some(vector) = embeddings.get(&event.item_id) else {
            continue;
        };
        if vector.is_empty() {
            continue;
        }
        if sum.is_empty() {
            sum = vec![0.0; vector.len()];
        } else if sum.len() != vector.len() {
            continue;
        }

        let weight = interaction_weight(event.kind, event.dwell_seconds);
        for (acc, x) in sum.iter_mut().zip(vector) {
            *acc += weight * x;
        }
        total_weight += weight;
    }

    if sum.is_empty() || total_weight <= 0.0 {
        return None;
    }

    let norm = sum.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(sum.into_iter().map(|x| (f64::from(x) / norm) as f32).collect())
}

/// Re-ranks semantic hits by `semantic * s + preference * p`.
///
/// `p` is the cosine between the item and the preference vector, or 0 when
/// that is undefined. Without a usable preference vector the hits come back
/// untouched and unannotated. Never adds or removes items; ties keep their
/// incoming order.
pub fn blend(
    mut hits: Vec<ScoredItem>,
    preference: Option<&[f32]>,
    weights: &PersonalizationConfig,
) -> Vec<ScoredItem> {
    let Some(preference) = preference.filter(|p| !p.is_empty()) else {
        return hits;
    };

    for hit in hits.iter_mut() {
        let semantic = hit.similarity.unwrap_or(0.0);
        let personal = hit
            .item
            .item
            .embedding
            .as_deref()
            .and_then(|v| cosine_similarity(v, preference))
            .unwrap_or(0.0) as f64;
        hit.combined_score =
            Some(weights.semantic_weight * semantic + weights.preference_weight * personal);
    }

    hits.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(Ordering::Equal)
    });
    hits
}

/// Rebuilds and saves the preference vector for `user_id`.
///
/// A history that yields no vector stores an empty one, which every reader
/// treats as cold start.
pub async fn refresh_preference_vector(
    store: &dyn DigestStore,
    user_id: &str,
) -> anyhow::Result<Option<Vec<f32>>> {
    let events = store.interactions_for_user(user_id).await?;

    let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    for event in &events {
        if embeddings.contains_key(&event.item_id) {
            continue;
        }
        if let Some(item) = store.get_item(&event.item_id).await? {
            if let Some(vector) = item.item.embedding {
                embeddings.insert(event.item_id.clone(), vector);
            }
        }
    }

    let vector = compute_preference_vector(&events, &embeddings);
    store
        .save_preference_vector(user_id, vector.as_deref().unwrap_or(&[]))
        .await?;

    debug!(
        user = user_id,
        events = events.len(),
        has_vector = vector.is_some(),
        "preference vector refreshed"
    );
    Ok(vector)
}

/// Loads a user's preference vector, mapping empty vectors and read errors
/// to `None`.
pub async fn load_preference(store: &dyn DigestStore, user_id: &str) -> Option<Vec<f32>> {
    match store.preference_vector(user_id).await {
        Ok(vector) => vector.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!(user = user_id, error = %e, "could not load preference vector");
            None
        }
    }
}

/// Handle to the background preference refresh worker.
#[derive(Clone)]
pub struct PreferenceRefresher {
    tx: mpsc::Sender<String>,
}

impl PreferenceRefresher {
    /// Spawns the worker on the current runtime.
    pub fn spawn(store: Arc<dyn DigestStore>) -> Self {
        Self::spawn_with_capacity(store, REFRESH_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(store: Arc<dyn DigestStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(user_id) = rx.recv().await {
                if let Err(e) = refresh_preference_vector(store.as_ref(), &user_id).await {
                    warn!(user = %user_id, error = %e, "preference refresh failed");
                }
            }
            info!("preference refresh worker stopped");
        });

        Self { tx }
    }

    /// Queues a refresh without waiting. Returns `false` if it was dropped.
    pub fn request(&self, user_id: &str) -> bool {
        match self.tx.try_send(user_id.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(user = user_id, "preference refresh queue full, dropping request");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(user = user_id, "preference refresh worker is gone");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonalizedFeed {
    pub items: Vec<ScoredItem>,
    pub personalized: bool,
}

/// Standing recommendations for `user_id`.
///
/// Embedded items the user has not interacted with, ordered by similarity
/// to their preference vector. Falls back to the most recent items with
/// `personalized = false` when there is no history, no vector, nothing
/// left to recommend, or a read fails.
pub async fn personalized_feed(
    store: &dyn DigestStore,
    user_id: &str,
    limit: usize,
) -> PersonalizedFeed {
    match recommend(store, user_id, limit).await {
        Ok(Some(items)) => PersonalizedFeed {
            items,
            personalized: true,
        },
        Ok(None) => recent_feed(store, limit).await,
        Err(e) => {
            warn!(user = user_id, error = %e, "personalized feed failed, using recent items");
            recent_feed(store, limit).await
        }
    }
}

async fn recommend(
    store: &dyn DigestStore,
    user_id: &str,
    limit: usize,
) -> anyhow::Result<Option<Vec<ScoredItem>>> {
    let events = store.interactions_for_user(user_id).await?;
    if events.is_empty() {
        return Ok(None);
    }
    let Some(preference) = load_preference(store, user_id).await else {
        return Ok(None);
    };

    let seen: std::collections::HashSet<&str> =
        events.iter().map(|e| e.item_id.as_str()).collect();

    let mut scored: Vec<ScoredItem> = store
        .embedded_items()
        .await?
        .into_iter()
        .filter(|item| !seen.contains(item.id.as_str()))
        .filter_map(|item| {
            let similarity = item
                .item
                .embedding
                .as_deref()
                .and_then(|v| cosine_similarity(v, &preference))? as f64;
            Some(ScoredItem {
                item,
                similarity: Some(similarity),
                combined_score: None,
            })
        })
        .collect();

    if scored.is_empty() {
        return Ok(None);
    }

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(limit);
    Ok(Some(scored))
}

async fn recent_feed(store: &dyn DigestStore, limit: usize) -> PersonalizedFeed {
    let items = match store.recent_items(limit).await {
        Ok(items) => items.into_iter().map(ScoredItem::unscored).collect(),
        Err(e) => {
            warn!(error = %e, "could not load recent items");
            Vec::new()
        }
    };
    PersonalizedFeed {
        items,
        personalized: false,
    }
}
