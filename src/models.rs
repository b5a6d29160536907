//! Core data types shared across the pipeline, the store and the HTTP API.
//!
//! Articles flow in from fetchers, the curator turns a subset of them into
//! [`CuratedItem`]s, and the store hands them back as [`DigestItem`]s with
//! an id and creation timestamp attached.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic bucket used for balancing, prompting and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    F1,
    DevTools,
    MlNews,
    Productivity,
    OfficialNews,
    Random,
    Misc,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::F1,
        Category::DevTools,
        Category::MlNews,
        Category::Productivity,
        Category::OfficialNews,
        Category::Random,
        Category::Misc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::F1 => "f1",
            Category::DevTools => "dev_tools",
            Category::MlNews => "ml_news",
            Category::Productivity => "productivity",
            Category::OfficialNews => "official_news",
            Category::Random => "random",
            Category::Misc => "misc",
        }
    }

    /// Lenient parse: unknown labels collapse to [`Category::Misc`].
    pub fn parse(label: &str) -> Category {
        match label.trim().to_ascii_lowercase().as_str() {
            "f1" => Category::F1,
            "dev_tools" => Category::DevTools,
            "ml_news" => Category::MlNews,
            "productivity" => Category::Productivity,
            "official_news" => Category::OfficialNews,
            "random" => Category::Random,
            _ => Category::Misc,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tone label assigned by the curator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Drama,
    Technical,
    Breaking,
    HotTake,
    Educational,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Drama => "drama",
            Sentiment::Technical => "technical",
            Sentiment::Breaking => "breaking",
            Sentiment::HotTake => "hot_take",
            Sentiment::Educational => "educational",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Lenient parse: unknown labels collapse to [`Sentiment::Neutral`].
    pub fn parse(label: &str) -> Sentiment {
        match label.trim().to_ascii_lowercase().as_str() {
            "drama" => Sentiment::Drama,
            "technical" => Sentiment::Technical,
            "breaking" => Sentiment::Breaking,
            "hot_take" | "hot take" | "hottake" => Sentiment::HotTake,
            "educational" => Sentiment::Educational,
            _ => Sentiment::Neutral,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw news item as produced by a fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub summary: String,
    pub url: String,
    pub source: String,
    pub category: Category,
    pub published_at: Option<DateTime<Utc>>,
}

/// A curated, summarized item ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedItem {
    pub title: String,
    pub summary: String,
    pub tldr: String,
    pub sentiment: Sentiment,
    pub category: Category,
    pub source_url: String,
    pub source_name: String,
    pub date: NaiveDate,
    #[serde(skip_serializing, default)]
    pub embedding: Option<Vec<f32>>,
}

impl CuratedItem {
    /// Text sent to the embedding provider for this item.
    pub fn embedding_text(&self) -> String {
        format!(
            "Title: {}\n\nCategory: {}\n\nSummary: {}",
            self.title, self.category, self.summary
        )
    }
}

/// A stored item: a [`CuratedItem`] plus its store-assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestItem {
    pub id: String,
    #[serde(flatten)]
    pub item: CuratedItem,
    pub created_at: DateTime<Utc>,
}

/// A retrieval result. Scores are present only when the producing path
/// computed them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    #[serde(flatten)]
    pub item: DigestItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_score: Option<f64>,
}

impl ScoredItem {
    pub fn unscored(item: DigestItem) -> Self {
        Self {
            item,
            similarity: None,
            combined_score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> RunStatus {
        if s == "success" {
            RunStatus::Success
        } else {
            RunStatus::Failed
        }
    }
}

/// Audit record written once per ingestion run, on every exit path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub items_fetched: i64,
    pub items_stored: i64,
    pub error_message: Option<String>,
}

/// A configured news source.
///
/// `category` is either a topic label (see [`Category`]) or a social-feed
/// marker (`reddit` / `social`) selecting the social fetcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    pub category: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Which fetcher a source routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Feed(Category),
    Social,
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self.category.trim().to_ascii_lowercase().as_str() {
            "reddit" | "social" => SourceKind::Social,
            other => SourceKind::Feed(Category::parse(other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub url: String,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceUpdate {
    pub url: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Click,
    Read,
    Favorite,
    Skip,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Click => "click",
            InteractionType::Read => "read",
            InteractionType::Favorite => "favorite",
            InteractionType::Skip => "skip",
        }
    }

    pub fn parse(s: &str) -> Option<InteractionType> {
        match s {
            "click" => Some(InteractionType::Click),
            "read" => Some(InteractionType::Read),
            "favorite" => Some(InteractionType::Favorite),
            "skip" => Some(InteractionType::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionEvent {
    pub user_id: String,
    pub item_id: String,
    pub kind: InteractionType,
    pub dwell_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_is_lenient() {
        assert_eq!(Category::parse("ml_news"), Category::MlNews);
        assert_eq!(Category::parse(" F1 "), Category::F1);
        assert_eq!(Category::parse("gardening"), Category::Misc);
    }

    #[test]
    fn test_sentiment_parse_unknown_is_neutral() {
        assert_eq!(Sentiment::parse("hot_take"), Sentiment::HotTake);
        assert_eq!(Sentiment::parse("ecstatic"), Sentiment::Neutral);
    }

    #[test]
    fn test_source_kind_routes_social() {
        let mut source = Source {
            id: "s1".into(),
            url: "r/formula1".into(),
            name: "r/formula1".into(),
            category: "reddit".into(),
            is_active: true,
            created_at: Utc::now(),
        };
        assert_eq!(source.kind(), SourceKind::Social);
        source.category = "dev_tools".into();
        assert_eq!(source.kind(), SourceKind::Feed(Category::DevTools));
    }

    #[test]
    fn test_embedding_text_layout() {
        let item = CuratedItem {
            title: "Rust 2.0".into(),
            summary: "It happened.".into(),
            tldr: "big".into(),
            sentiment: Sentiment::Breaking,
            category: Category::DevTools,
            source_url: "https://example.com".into(),
            source_name: "Example".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            embedding: None,
        };
        assert_eq!(
            item.embedding_text(),
            "Title: Rust 2.0\n\nCategory: dev_tools\n\nSummary: It happened."
        );
    }

    #[test]
    fn test_scored_item_omits_absent_scores() {
        let item = DigestItem {
            id: "i1".into(),
            item: CuratedItem {
                title: "t".into(),
                summary: "s".into(),
                tldr: "t".into(),
                sentiment: Sentiment::Neutral,
                category: Category::Misc,
                source_url: "u".into(),
                source_name: "n".into(),
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                embedding: Some(vec![1.0]),
            },
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ScoredItem::unscored(item)).unwrap();
        assert!(json.get("similarity").is_none());
        assert!(json.get("embedding").is_none());
        assert_eq!(json["title"], "t");
        assert_eq!(json["date"], "2024-05-01");
    }
}
