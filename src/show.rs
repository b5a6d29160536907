//! Read-only CLI views: `digest show`, `digest dates`, `digest runs` and
//! `digest search`.

use anyhow::Result;
use chrono::NaiveDate;

use crate::models::{DigestItem, RunRecord, ScoredItem};
use crate::search::{Retriever, SearchMode};
use crate::store::DigestStore;

/// Prints the digest for `date`, or the newest one.
pub async fn run_show(store: &dyn DigestStore, date: Option<NaiveDate>) -> Result<()> {
    let date = match date {
        Some(d) => d,
        None => match store.distinct_dates().await?.first() {
            Some(d) => *d,
            None => {
                println!("No digests yet. Run `digest run` first.");
                return Ok(());
            }
        },
    };

    let items = store.items_for_date(date).await?;
    println!("--- Digest {} ({} items) ---", date, items.len());
    println!();
    for item in &items {
        print_item(item);
    }
    Ok(())
}

fn print_item(item: &DigestItem) {
    let c = &item.item;
    println!("[{}] {} ({})", c.category, c.title, c.sentiment);
    if !c.tldr.is_empty() {
        println!("    tl;dr: {}", c.tldr);
    }
    if !c.summary.is_empty() {
        println!("    {}", c.summary);
    }
    println!("    {} | {}", c.source_name, c.source_url);
    println!("    id: {}", item.id);
    println!();
}

pub async fn run_dates(store: &dyn DigestStore) -> Result<()> {
    let dates = store.distinct_dates().await?;
    if dates.is_empty() {
        println!("No digests yet.");
    }
    for date in dates {
        println!("{}", date);
    }
    Ok(())
}

pub async fn run_runs(store: &dyn DigestStore, limit: usize) -> Result<()> {
    let runs = store.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!(
        "{:<12} {:<8} {:>8} {:>8}  MESSAGE",
        "DATE", "STATUS", "FETCHED", "STORED"
    );
    for run in &runs {
        println!("{}", format_run(run));
    }
    Ok(())
}

fn format_run(run: &RunRecord) -> String {
    format!(
        "{:<12} {:<8} {:>8} {:>8}  {}",
        run.run_date.to_string(),
        run.status.as_str(),
        run.items_fetched,
        run.items_stored,
        run.error_message.as_deref().unwrap_or("")
    )
}

/// Keyword search, or semantic search with keyword fallback.
pub async fn run_search(
    retriever: &Retriever,
    query: &str,
    semantic: bool,
    limit: usize,
) -> Result<()> {
    let (mode, hits) = if semantic {
        let outcome = retriever.semantic(query, limit).await;
        (outcome.mode, outcome.hits)
    } else {
        let items = retriever.keyword(query, limit).await?;
        (
            SearchMode::Keyword,
            items.into_iter().map(ScoredItem::unscored).collect(),
        )
    };

    if semantic && mode == SearchMode::Keyword {
        println!("(semantic search unavailable, showing keyword matches)");
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let c = &hit.item.item;
        match hit.similarity {
            Some(s) => println!("{}. [{:.3}] {} ({})", i + 1, s, c.title, c.date),
            None => println!("{}. {} ({})", i + 1, c.title, c.date),
        }
        println!("    {}", c.source_url);
    }
    Ok(())
}
