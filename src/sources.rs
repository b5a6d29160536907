//! `digest sources`: manage the configured source list.
//!
//! Sources are addressed by id or by URL.

use anyhow::{bail, Result};

use crate::models::{NewSource, Source, SourceKind, SourceUpdate};
use crate::store::DigestStore;

/// Resolves an id or URL to a stored source.
pub async fn find_source(store: &dyn DigestStore, key: &str) -> Result<Source> {
    let sources = store.list_sources().await?;
    match sources.into_iter().find(|s| s.id == key || s.url == key) {
        Some(source) => Ok(source),
        None => bail!("source not found: {}", key),
    }
}

pub async fn list_sources(store: &dyn DigestStore) -> Result<()> {
    let sources = store.list_sources().await?;
    if sources.is_empty() {
        println!("No sources configured. Add one with `digest sources add <url> <name> <category>`.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8} {:<14} {:<8} {:<24} URL",
        "ID", "KIND", "CATEGORY", "ACTIVE", "NAME"
    );
    for s in &sources {
        let kind = match s.kind() {
            SourceKind::Social => "social",
            SourceKind::Feed(_) => "feed",
        };
        println!(
            "{:<36}  {:<8} {:<14} {:<8} {:<24} {}",
            s.id,
            kind,
            s.category,
            if s.is_active { "yes" } else { "no" },
            s.name,
            s.url
        );
    }
    Ok(())
}

pub async fn add_source(store: &dyn DigestStore, url: &str, name: &str, category: &str) -> Result<Source> {
    let (url, name, category) = (url.trim(), name.trim(), category.trim());
    if url.is_empty() || name.is_empty() || category.is_empty() {
        bail!("url, name and category must not be empty");
    }

    let source = store
        .create_source(&NewSource {
            url: url.to_string(),
            name: name.to_string(),
            category: category.to_string(),
        })
        .await?;
    println!("added {} ({})", source.name, source.id);
    Ok(source)
}

pub async fn remove_source(store: &dyn DigestStore, key: &str) -> Result<()> {
    let source = find_source(store, key).await?;
    store.delete_source(&source.id).await?;
    println!("removed {}", source.name);
    Ok(())
}

pub async fn set_active(store: &dyn DigestStore, key: &str, active: bool) -> Result<()> {
    let source = find_source(store, key).await?;
    let update = SourceUpdate {
        is_active: Some(active),
        ..Default::default()
    };
    store.update_source(&source.id, &update).await?;
    println!(
        "{} {}",
        if active { "enabled" } else { "disabled" },
        source.name
    );
    Ok(())
}
