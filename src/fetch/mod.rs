//! Source fetchers.
//!
//! A [`SourceFetcher`] turns one configured [`Source`] into [`Article`]s.
//! Fetchers report failure through [`DigestError::SourceFetch`]; it is the
//! aggregator's job to absorb those so that one bad source never costs the
//! others their articles.
//!
//! | Fetcher | Handles |
//! |---------|---------|
//! | [`FeedFetcher`] | RSS 2.0, Atom and JSON Feed sources |
//! | [`SocialFetcher`] | social-feed (subreddit) sources |
//! | [`OfficialFetcher`] | the fixed official-sources stream |

pub mod feed;
pub mod official;
pub mod social;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::DigestError;
use crate::models::{Article, Source};

pub use feed::FeedFetcher;
pub use official::OfficialFetcher;
pub use social::SocialFetcher;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>, DigestError>;
}

/// Builds the HTTP client shared by the fetchers.
pub fn http_client(config: &FetchConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

/// GETs `url` and returns the body, treating non-2xx as a fetch error.
pub(crate) async fn get_bytes(
    client: &reqwest::Client,
    url: &str,
    source_name: &str,
) -> Result<Vec<u8>, DigestError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DigestError::source_fetch(source_name, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DigestError::source_fetch(
            source_name,
            format!("HTTP {status} from {url}"),
        ));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| DigestError::source_fetch(source_name, e))?;
    Ok(body.to_vec())
}
