//! Small text helpers used by fetchers, prompts and the embedding generator.

use scraper::{ElementRef, Html};

/// Returns at most `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Reduces an HTML fragment to whitespace-normalized plain text.
pub fn html_to_text(fragment: &str) -> String {
    if !fragment.contains('<') {
        return collapse_whitespace(fragment);
    }
    let doc = Html::parse_fragment(fragment);
    let mut text = String::with_capacity(fragment.len());
    push_text(doc.root_element(), &mut text);
    collapse_whitespace(&text)
}

/// Inline text is concatenated as written; block elements are separated by
/// a space so adjacent paragraphs don't run together.
fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(el) = ElementRef::wrap(child) {
            let name = el.value().name();
            if matches!(name, "script" | "style") {
                continue;
            }
            let block = is_block(name);
            if block {
                out.push(' ');
            }
            push_text(el, out);
            if block {
                out.push(' ');
            }
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "br"
            | "hr"
            | "li"
            | "ul"
            | "ol"
            | "dd"
            | "dt"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "table"
            | "tr"
            | "td"
            | "th"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "figure"
            | "figcaption"
    )
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars("short", 200), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_html_to_text_strips_tags() {
        let text = html_to_text("<p>Hello <b>big</b>\n  world</p><p>again</p>");
        assert_eq!(text, "Hello big world again");
    }

    #[test]
    fn test_html_to_text_keeps_inline_markup_inside_words() {
        assert_eq!(html_to_text("Hel<b>lo</b>"), "Hello");
        assert_eq!(html_to_text("<p>Rust<em>acean</em>s unite</p>"), "Rustaceans unite");
        assert_eq!(html_to_text("one<br>two<li>three</li>"), "one two three");
        assert_eq!(html_to_text("a<script>var x;</script>b"), "ab");
    }

    #[test]
    fn test_html_to_text_plain_passthrough() {
        assert_eq!(html_to_text("  plain   text "), "plain text");
    }
}
