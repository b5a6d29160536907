//! Weekly engagement digest.
//!
//! Collects the items users favorited or read over the last week, breaks
//! them down by category and summarizes where attention went. Each run
//! leaves a [`RunRecord`] whose message carries the insight.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::info;

use crate::models::{DigestItem, RunRecord, RunStatus};
use crate::store::{DigestStore, Engagement};

/// Days before the run date that still count as "this week".
pub const WINDOW_DAYS: i64 = 7;

/// Items taken per engagement kind before merging.
const PER_KIND_LIMIT: usize = 10;

/// Cap on the merged set.
const MAX_ITEMS: usize = 20;

pub const QUIET_WEEK_INSIGHT: &str = "Not much activity this week.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyDigest {
    pub success: bool,
    pub articles_included: usize,
    pub insight: String,
    pub categories: BTreeMap<String, usize>,
    #[serde(skip)]
    pub items: Vec<DigestItem>,
}

/// Builds the weekly digest ending on `today` and records it as a run.
pub async fn run_weekly(store: &dyn DigestStore, today: NaiveDate) -> Result<WeeklyDigest> {
    let from = today - Duration::days(WINDOW_DAYS);

    let mut items = store
        .engaged_items(Engagement::Favorited, from, today, PER_KIND_LIMIT)
        .await?;
    for item in store
        .engaged_items(Engagement::Read, from, today, PER_KIND_LIMIT)
        .await?
    {
        if !items.iter().any(|i| i.id == item.id) {
            items.push(item);
        }
    }
    items.truncate(MAX_ITEMS);

    let counts = category_counts(&items);
    let insight = weekly_insight(&counts, items.len());

    store
        .insert_run(&RunRecord {
            run_date: today,
            status: RunStatus::Success,
            items_fetched: items.len() as i64,
            items_stored: items.len() as i64,
            error_message: Some(format!("Weekly digest: {insight}")),
        })
        .await?;

    info!(articles = items.len(), %insight, "weekly digest complete");

    Ok(WeeklyDigest {
        success: true,
        articles_included: items.len(),
        insight,
        categories: counts.iter().map(|(c, n)| (c.clone(), *n)).collect(),
        items,
    })
}

/// Per-category counts in first-seen order.
fn category_counts(items: &[DigestItem]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for item in items {
        let label = item.item.category.as_str();
        match counts.iter_mut().find(|(c, _)| c == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label.to_string(), 1)),
        }
    }
    counts
}

/// One sentence naming the dominant category. Ties go to the category seen
/// first.
pub fn weekly_insight(counts: &[(String, usize)], total: usize) -> String {
    let top = counts.iter().fold(None, |best: Option<&(String, usize)>, entry| match best {
        Some(b) if b.1 >= entry.1 => Some(b),
        _ => Some(entry),
    });
    let Some((category, count)) = top.filter(|_| total > 0) else {
        return QUIET_WEEK_INSIGHT.to_string();
    };

    let percentage = (*count as f64 * 100.0 / total as f64).round();
    format!(
        "Your focus this week: {percentage}% {}, with {total} engaged articles total.",
        category.replace('_', " ")
    )
}
