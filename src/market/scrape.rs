// src/market/scrape.rs
//! Regex-level HTML extraction for market pages. Layouts change often, so every miss
//! degrades to "no rules" / "no comments" rather than an error.

use std::ops::Range;

use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::evidence::text::{normalize_text, truncate_chars};
use crate::evidence::Sentiment;

/// Comments shorter than this are usually buttons or counters.
const MIN_COMMENT_CHARS: usize = 15;
const MAX_RULES_CHARS: usize = 2_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContext {
    pub resolution_rules: Option<String>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    /// Pseudonymous handle (`user_1234`), never the raw display name.
    pub author: Option<String>,
    /// Comment text with the author element removed.
    pub body: String,
    pub sentiment: Sentiment,
}

pub fn parse_page(html: &str, max_comments: usize, max_comment_chars: usize) -> PageContext {
    PageContext {
        resolution_rules: extract_rules(html),
        comments: extract_comments(html, max_comments, max_comment_chars),
    }
}

fn extract_rules(html: &str) -> Option<String> {
    static RE_CRITERIA: OnceCell<Regex> = OnceCell::new();
    let re = RE_CRITERIA.get_or_init(|| {
        Regex::new(r#"<[a-zA-Z][a-zA-Z0-9]*\b[^>]*data-testid\s*=\s*"resolution-criteria"[^>]*>"#)
            .unwrap()
    });
    if let Some(m) = re.find(html) {
        let text = normalize_text(element_inner(html, m.start(), m.end()), MAX_RULES_CHARS);
        if !text.is_empty() {
            return Some(text);
        }
    }

    static RE_HEADING: OnceCell<Regex> = OnceCell::new();
    static RE_PARA: OnceCell<Regex> = OnceCell::new();
    let heading = RE_HEADING.get_or_init(|| Regex::new(r"(?is)<h[23]\b[^>]*>(.*?)</h[23]\s*>").unwrap());
    let para = RE_PARA.get_or_init(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").unwrap());
    for caps in heading.captures_iter(html) {
        let title = normalize_text(&caps[1], 200).to_lowercase();
        if !title.contains("resolution") {
            continue;
        }
        let rest = &html[caps.get(0).map_or(0, |m| m.end())..];
        if let Some(p) = para.captures(rest) {
            let text = normalize_text(&p[1], MAX_RULES_CHARS);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    meta_description(html)
}

fn meta_description(html: &str) -> Option<String> {
    static RE_META: OnceCell<Regex> = OnceCell::new();
    static RE_ATTR: OnceCell<Regex> = OnceCell::new();
    let re_meta = RE_META.get_or_init(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
    let re_attr =
        RE_ATTR.get_or_init(|| Regex::new(r#"([a-zA-Z][\w-]*)\s*=\s*"([^"]*)""#).unwrap());

    for tag in re_meta.find_iter(html) {
        let mut is_description = false;
        let mut content = None;
        for a in re_attr.captures_iter(tag.as_str()) {
            match a[1].to_ascii_lowercase().as_str() {
                "name" => is_description = a[2].eq_ignore_ascii_case("description"),
                "content" => content = Some(a[2].to_string()),
                _ => {}
            }
        }
        if is_description {
            if let Some(c) = content.map(|c| normalize_text(&c, MAX_RULES_CHARS)) {
                if !c.is_empty() {
                    return Some(c);
                }
            }
        }
    }
    None
}

fn extract_comments(html: &str, max_comments: usize, max_chars: usize) -> Vec<Comment> {
    static RE_CANDIDATE: OnceCell<Regex> = OnceCell::new();
    static RE_AUTHOR: OnceCell<Regex> = OnceCell::new();
    let re_candidate = RE_CANDIDATE.get_or_init(|| {
        Regex::new(
            r#"<[a-zA-Z][a-zA-Z0-9]*\b[^>]*(?:data-testid\s*=\s*"[^"]*comment[^"]*"|class\s*=\s*"[^"]*Comment[^"]*")[^>]*>"#,
        )
        .unwrap()
    });
    let re_author = RE_AUTHOR.get_or_init(|| {
        Regex::new(r#"(?i)<[a-z][a-z0-9]*\b[^>]*data-testid\s*=\s*"[^"]*author[^"]*"[^>]*>"#)
            .unwrap()
    });

    let mut out: Vec<Comment> = Vec::new();
    if max_comments == 0 {
        return out;
    }
    for m in re_candidate.find_iter(html) {
        if re_author.is_match(m.as_str()) {
            continue;
        }
        let inner = element_inner(html, m.start(), m.end());

        // The display name never reaches the body; only its hash is kept.
        let (author, text) = match re_author.find(inner) {
            Some(a) => {
                let name_span = inner_span(inner, a.start(), a.end());
                let name = normalize_text(&inner[name_span.clone()], 200);
                let rest = format!("{} {}", &inner[..a.start()], &inner[name_span.end..]);
                let author = (!name.is_empty()).then(|| anonymize(&name));
                (author, normalize_text(&rest, usize::MAX))
            }
            None => (None, normalize_text(inner, usize::MAX)),
        };
        if text.chars().count() < MIN_COMMENT_CHARS {
            continue;
        }
        let body = truncate_chars(&text, max_chars);
        if out.iter().any(|c| c.body == body) {
            continue;
        }

        out.push(Comment {
            author,
            sentiment: Sentiment::from_comment_text(&body),
            body,
        });
        if out.len() >= max_comments {
            break;
        }
    }
    out
}

/// Inner HTML of the element whose opening tag spans `open_start..open_end`.
fn element_inner(html: &str, open_start: usize, open_end: usize) -> &str {
    &html[inner_span(html, open_start, open_end)]
}

/// Byte range of an element's inner HTML, found by counting nested tags with the same
/// name. Unclosed elements run to the end of input.
fn inner_span(html: &str, open_start: usize, open_end: usize) -> Range<usize> {
    let open_tag = &html[open_start..open_end];
    if open_tag.ends_with("/>") {
        return open_end..open_end;
    }
    let name: String = open_tag[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();

    static RE_TAG: OnceCell<Regex> = OnceCell::new();
    let re_tag =
        RE_TAG.get_or_init(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>").unwrap());

    let mut depth = 1usize;
    for caps in re_tag.captures_iter(&html[open_end..]) {
        if !caps[2].eq_ignore_ascii_case(&name) {
            continue;
        }
        let Some(whole) = caps.get(0) else { continue };
        if !caps[1].is_empty() {
            depth -= 1;
            if depth == 0 {
                return open_end..open_end + whole.start();
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    open_end..html.len()
}

/// Stable pseudonym derived from the display name.
fn anonymize(author: &str) -> String {
    let digest = Sha256::digest(author.as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]) % 10_000;
    format!("user_{n:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><head><meta name="description" content="Fallback description"></head>
<body>
  <h2>Market</h2>
  <div data-testid="resolution-criteria"><p>Resolves <b>YES</b> if the Fed cuts rates.</p></div>
  <div class="comments-list">
    <div data-testid="comment-item">
      <span data-testid="comment-author">alice</span>
      <div><p>Yes, this looks very likely to win given the CPI data.</p></div>
    </div>
    <div data-testid="comment-item">ok</div>
    <div data-testid="comment-item">
      <span data-testid="comment-author">bob</span>
      <p>No way, @carol the committee is unlikely to move this month.</p>
    </div>
  </div>
</body></html>
"#;

    #[test]
    fn criteria_block_wins_over_meta_description() {
        let ctx = parse_page(PAGE, 10, 500);
        assert_eq!(
            ctx.resolution_rules.as_deref(),
            Some("Resolves YES if the Fed cuts rates.")
        );
    }

    #[test]
    fn heading_then_paragraph_and_meta_fallbacks() {
        let html = "<h3>Resolution Details</h3><div><p>Resolves on the official tally.</p></div>";
        assert_eq!(
            extract_rules(html).as_deref(),
            Some("Resolves on the official tally.")
        );
        let html = r#"<meta content="Only meta here" name="description">"#;
        assert_eq!(extract_rules(html).as_deref(), Some("Only meta here"));
        assert_eq!(extract_rules("<p>nothing</p>"), None);
    }

    #[test]
    fn comments_are_filtered_anonymized_and_scored() {
        let ctx = parse_page(PAGE, 10, 500);
        let bodies: Vec<&str> = ctx.comments.iter().map(|c| c.body.as_str()).collect();
        assert!(bodies.iter().all(|b| b.chars().count() >= MIN_COMMENT_CHARS));
        assert!(!bodies.contains(&"ok"));

        let alice = ctx
            .comments
            .iter()
            .find(|c| c.body.starts_with("Yes, this looks"))
            .unwrap();
        assert!(!alice.body.contains("alice"));
        assert_eq!(alice.author.as_deref(), Some(anonymize("alice").as_str()));
        assert!(alice.author.as_deref().unwrap().starts_with("user_"));
        assert_eq!(alice.sentiment, Sentiment::Pro);

        let bob = ctx
            .comments
            .iter()
            .find(|c| c.body.starts_with("No way"))
            .unwrap();
        assert!(!bob.body.contains("bob"));
        assert_eq!(bob.author.as_deref(), Some(anonymize("bob").as_str()));
        assert_eq!(bob.sentiment, Sentiment::Con);
    }

    #[test]
    fn display_name_is_cut_from_the_body() {
        let html = r#"<div data-testid="comment-item">
            <a href="/u/1"><span data-testid="comment-author">Jane <i>Q.</i> Public</span></a>
            This market is very likely to resolve yes.
        </div>"#;
        let ctx = parse_page(html, 5, 500);
        assert_eq!(ctx.comments.len(), 1);
        let c = &ctx.comments[0];
        assert_eq!(c.body, "This market is very likely to resolve yes.");
        assert!(!c.body.contains("Jane"));
        assert_eq!(c.author.as_deref(), Some(anonymize("Jane Q. Public").as_str()));
    }

    #[test]
    fn name_only_comment_is_dropped() {
        let html = r#"<div data-testid="comment-item">
            <span data-testid="comment-author">A very long display name here</span>
        </div>"#;
        assert!(parse_page(html, 5, 500).comments.is_empty());
    }

    #[test]
    fn comment_cap_and_char_cap_apply() {
        let ctx = parse_page(PAGE, 1, 20);
        assert_eq!(ctx.comments.len(), 1);
        assert!(ctx.comments[0].body.chars().count() <= 20);
    }

    #[test]
    fn nested_same_tag_is_balanced() {
        let html = "<div x><div>in</div>tail</div>after";
        let open_end = html.find('>').unwrap() + 1;
        assert_eq!(element_inner(html, 0, open_end), "<div>in</div>tail");
    }

    #[test]
    fn other_tags_and_case_do_not_confuse_nesting() {
        let html = "<DIV><span><div>a</DIV></span><dl>b</dl></div>after";
        assert_eq!(
            element_inner(html, 0, 5),
            "<span><div>a</DIV></span><dl>b</dl>"
        );
        // self-closing and unclosed
        assert_eq!(element_inner("<br/>x", 0, 5), "");
        assert_eq!(element_inner("<p>open", 0, 3), "open");
    }
}
