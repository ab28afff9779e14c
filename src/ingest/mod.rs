// src/ingest/mod.rs
pub mod backoff;
pub mod client;
pub mod http;
pub mod selector;
pub mod types;

pub use backoff::IngestBackoff;
pub use client::{FailureClass, FetchClient, FetchError, FetchOutcome, UpstreamSignal};
pub use http::HttpTransport;
pub use selector::{RandomSelector, ScriptedSelector, SourceSelector};
pub use types::{ContentSafety, FeedTransport, SortMode, TransportResponse};

use once_cell::sync::OnceCell;

/// Upper bound on stored title/body length (chars).
const MAX_TEXT_CHARS: usize = 4000;

/// Normalize upstream text: decode HTML entities, strip tags, ASCII-fy curly
/// quotes, collapse whitespace, cap length. Punctuation and emoji are kept
/// because enrichment looks at them.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode (upstream titles arrive as `&amp;` etc.)
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_decodes_entities_and_collapses_ws() {
        let s = "  Rust &amp; Go:&nbsp;&nbsp; <b>compared</b>!!  ";
        assert_eq!(normalize_text(s), "Rust & Go: compared!!");
    }

    #[test]
    fn normalize_text_keeps_emoji_and_comparisons() {
        assert_eq!(normalize_text("a < b 🔥"), "a < b 🔥");
    }
}
