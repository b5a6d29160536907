//! Social-feed fetcher (subreddit top posts of the day).

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tracing::warn;

use crate::config::FetchConfig;
use crate::error::DigestError;
use crate::models::{Article, Category, Source};
use crate::text::truncate_chars;

use super::{get_bytes, http_client, SourceFetcher};

pub struct SocialFetcher {
    client: reqwest::Client,
    base_url: String,
    limit: usize,
    enabled: bool,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    permalink: String,
    #[serde(default)]
    created_utc: Option<f64>,
}

impl SocialFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.social_base_url.trim_end_matches('/').to_string(),
            limit: config.social_limit,
            enabled: config.social_enabled,
        })
    }
}

/// Strips URL and `r/` prefixes from a configured community target.
pub fn community_name(target: &str) -> &str {
    let trimmed = target.trim().trim_end_matches('/');
    let path = trimmed
        .split_once("reddit.com/")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    path.trim_start_matches('/')
        .strip_prefix("r/")
        .unwrap_or(path.trim_start_matches('/'))
}

/// Maps a social source name to the topic category of its posts.
pub fn category_for(name: &str) -> Category {
    let has = |needle: &str| name.contains(needle);
    if has("formula1") || has("F1") {
        Category::F1
    } else if has("Flutter") || has("django") || has("AndroidDev") {
        Category::DevTools
    } else if has("MachineLearning") || has("LocalLLaMA") {
        Category::MlNews
    } else if has("Productivity") {
        Category::Productivity
    } else {
        Category::Misc
    }
}

#[async_trait]
impl SourceFetcher for SocialFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>, DigestError> {
        let community = community_name(&source.url);
        if !self.enabled {
            warn!(community, "social fetching disabled, skipping");
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/r/{}/top.json?t=day&limit={}",
            self.base_url, community, self.limit
        );
        let body = get_bytes(&self.client, &url, &source.name).await?;
        let listing: Listing = serde_json::from_slice(&body)
            .map_err(|e| DigestError::source_fetch(&source.name, e))?;

        let category = category_for(&source.name);
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| {
                let post = child.data;
                Article {
                    title: post.title,
                    summary: post
                        .selftext
                        .as_deref()
                        .map(|s| truncate_chars(s, 300).to_string())
                        .unwrap_or_default(),
                    url: format!("https://reddit.com{}", post.permalink),
                    source: format!("r/{community}"),
                    category,
                    published_at: post
                        .created_utc
                        .and_then(|ts| DateTime::from_timestamp(ts as i64, 0)),
                }
            })
            .collect())
    }
}
