//! Prompt construction for the two curation modes.

use serde::Serialize;

use crate::config::CurationConfig;
use crate::models::Article;
use crate::text::truncate_chars;

/// Summary budget per article in the filtering prompt.
pub const GENERAL_SUMMARY_CHARS: usize = 200;
/// Summary budget per article in the official prompt.
pub const OFFICIAL_SUMMARY_CHARS: usize = 500;

#[derive(Serialize)]
struct PromptArticle<'a> {
    title: &'a str,
    summary: &'a str,
    url: &'a str,
    source: &'a str,
}

fn articles_json(articles: &[Article], summary_chars: usize) -> String {
    let rows: Vec<PromptArticle<'_>> = articles
        .iter()
        .map(|a| PromptArticle {
            title: &a.title,
            summary: truncate_chars(&a.summary, summary_chars),
            url: &a.url,
            source: &a.source,
        })
        .collect();
    serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
}

const OUTPUT_SHAPE: &str = r#"[
  {
    "title": "...",
    "summary": "...",
    "tldr": "...",
    "sentiment": "...",
    "category": "...",
    "source_url": "...",
    "source_name": "..."
  }
]"#;

/// Filter + summarize prompt for general articles.
pub fn general_prompt(config: &CurationConfig, articles: &[Article]) -> String {
    let interests: String = config
        .interests
        .iter()
        .map(|i| format!("- {i}\n"))
        .collect();

    format!(
        r#"You are a personal news curator for {audience}.

Reader interests:
{interests}
Filter these articles and only include items that:
1. Are genuinely interesting or useful (not clickbait)
2. Provide new information (skip rehashed news)
3. Match the reader interests above

Do not put everything in one category. Only tag articles that are exclusively about motorsport as "f1". Articles about tech, AI, tools, development, productivity or general news must go into their appropriate categories.

Aim for {min}-{max} relevant items in total, with at least {per_cat} from each of: f1, dev_tools, ml_news, productivity. If a category has fewer good matches, prefer quality over quantity.

For each relevant item, provide:
- title: keep the original or make it clearer
- summary: 2-3 sentences on what it is and why it matters to the reader
- tldr: one sentence, 10-15 words
- sentiment: one of "drama", "technical", "breaking", "hot_take", "educational", "neutral"
- category: one of f1, dev_tools, ml_news, productivity, misc
- source_url and source_name: copied from the article

Articles to process:
{articles}

Return ONLY a JSON array:
{shape}
"#,
        audience = config.audience,
        interests = interests,
        min = config.target_min,
        max = config.target_max,
        per_cat = config.min_per_category,
        articles = articles_json(articles, GENERAL_SUMMARY_CHARS),
        shape = OUTPUT_SHAPE,
    )
}

/// Summarize-only prompt for official announcements.
pub fn official_prompt(config: &CurationConfig, articles: &[Article]) -> String {
    format!(
        r#"You are a personal news curator for {audience}.
These are OFFICIAL updates from major AI companies. Do NOT filter them; summarize and format every one.

Process EVERY article below. Do not skip any.

For each item, provide:
- title: keep the original or make it clearer
- summary: 2-3 sentences on what it is and why it matters to a developer or AI researcher
- tldr: one sentence, 10-15 words
- sentiment: one of "breaking" (major announcements, new models), "technical" (deep dives, research), "educational" (guides, best practices), "neutral" (general updates, policy)
- category: ALWAYS "official_news"
- source_url: the original URL provided
- source_name: the original source name provided

Articles to process:
{articles}

Return ONLY a JSON array:
{shape}
"#,
        audience = config.audience,
        articles = articles_json(articles, OFFICIAL_SUMMARY_CHARS),
        shape = OUTPUT_SHAPE,
    )
}
