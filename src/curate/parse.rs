//! Parsing of classifier replies.
//!
//! Replies are free text that should contain a JSON array. The array is
//! located by trying, in order: a ```` ```json ```` fenced block, a plain
//! fenced block, then the widest `[{ ... }]` span. Whatever is found must
//! deserialize as an array of objects; anything else is an error.

use serde::Deserialize;

use crate::error::DigestError;

/// One item as the classifier wrote it. Every field is optional so that a
/// single sloppy item does not sink the whole reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawItem {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub tldr: Option<String>,
    pub sentiment: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub source_name: Option<String>,
}

fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn bracketed_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = (0..bytes.len()).find(|&i| {
        bytes[i] == b'[' && text[i + 1..].trim_start().starts_with('{')
    })?;
    let end = (start..bytes.len()).rev().find(|&i| {
        bytes[i] == b']' && text[..i].trim_end().ends_with('}')
    })?;
    Some(&text[start..=end])
}

/// Locates the JSON payload inside a reply.
pub fn extract_json(reply: &str) -> &str {
    fenced_block(reply, "```json")
        .or_else(|| fenced_block(reply, "```"))
        .filter(|block| block.starts_with('['))
        .or_else(|| bracketed_array(reply))
        .unwrap_or_else(|| reply.trim())
}

/// Parses a reply into raw items.
pub fn parse_reply(reply: &str) -> Result<Vec<RawItem>, DigestError> {
    let payload = extract_json(reply);
    serde_json::from_str::<Vec<RawItem>>(payload)
        .map_err(|e| DigestError::Classification(format!("unparseable reply: {e}")))
}
