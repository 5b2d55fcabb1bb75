//! Static matcher tables and thresholds used by the classifier.
//!
//! Everything here is data: adding a keyword or a content tag does not
//! touch the classification control flow.

use std::sync::LazyLock;
use regex::Regex;

/// Hosting placeholder pages, matched case-insensitively against the body.
pub const SUSPENSION_KEYWORDS: &[&str] = &[
    "account suspended",
    "bandwidth limit exceeded",
    "site suspended",
    "service unavailable",
    "temporarily unavailable",
    "hosting account",
    "payment required",
    "houston, we have a problem",
    "this account has been suspended",
];

/// Database failure pages rendered with a 2xx/4xx status.
pub const DATABASE_ERROR_KEYWORDS: &[&str] = &[
    "database error",
    "database connection",
    "error establishing a database connection",
    "mysql error",
    "mysqli error",
    "postgresql error",
    "connection refused",
    "could not connect to database",
    "database server is not responding",
    "cannot connect to mysql",
    "can't connect to mysql",
    "access denied for user",
    "unknown database",
    "table doesn't exist",
    "too many connections",
    "database is locked",
    "db connection failed",
    "failed to connect to database",
];

/// Tags counted by the content-richness check.
pub const CONTENT_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6",
    "p",
    "article", "section", "main",
    "div", "span",
    "ul", "ol", "li",
    "a",
];

pub const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];
pub const PARAGRAPH_TAG: &str = "p";
pub const SECTION_TAGS: &[&str] = &["article", "section", "main"];

/// Front-end library mentions that hint at a client-rendered page.
pub const SPA_LIBRARY_HINTS: &[&str] = &[
    "react", "vue", "angular", "next.js", "webpack", "chunk", "bundle",
];

pub const MIN_HTML_BYTES: usize = 500;
pub const MIN_TOTAL_TAGS: usize = 10;
pub const MIN_TAG_TYPES: usize = 3;
pub const MIN_TEXT_LENGTH: usize = 100;
pub const MIN_MEANINGFUL_LENGTH: usize = 50;
/// Visible text below this counts as "minimal" for SPA detection.
pub const SPA_MAX_TEXT_LENGTH: usize = 200;
pub const SPA_MIN_SCRIPTS: usize = 2;

pub static HTML_OPEN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<html"));
pub static BODY_OPEN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<body"));

pub static SPA_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?i)<div\s+(?:id=["'](?:root|app|__next|__nuxt)["']|ng-app|data-reactroot|data-react-helmet)"#,
    )
});

pub static SPA_META: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?i)<meta\s+name=["']generator["']\s+content=["'](?:next\.js|nuxt|gatsby)|<meta\s+name=["']framework["']"#,
    )
});

pub static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<script[^>]*src="));
pub static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?is)<script[^>]*>.*?</script>"));
pub static SCRIPT_STRIP: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<script.*?</script>"));
pub static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]*>"));
pub static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));

/// One opening-tag matcher per entry of [`CONTENT_TAGS`], in table order.
pub static CONTENT_TAG_MATCHERS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    CONTENT_TAGS
        .iter()
        .map(|tag| (*tag, compile(&format!(r"(?i)<{tag}[\s>]"))))
        .collect()
});

/// Patterns are compile-time constants covered by the tests below.
fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

/// First keyword contained in `haystack_lower` (already lowercased).
pub fn first_match(haystack_lower: &str, keywords: &'static [&'static str]) -> Option<&'static str> {
    keywords.iter().copied().find(|kw| haystack_lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for re in [
            &HTML_OPEN,
            &BODY_OPEN,
            &SPA_ROOT,
            &SPA_META,
            &SCRIPT_SRC,
            &SCRIPT_BLOCK,
            &SCRIPT_STRIP,
            &ANY_TAG,
            &WHITESPACE,
        ] {
            LazyLock::force(re);
        }
        assert_eq!(CONTENT_TAG_MATCHERS.len(), CONTENT_TAGS.len());
    }

    #[test]
    fn test_sixteen_content_tags() {
        assert_eq!(CONTENT_TAGS.len(), 16);
    }

    #[test]
    fn test_keyword_tables_are_lowercase() {
        for kw in SUSPENSION_KEYWORDS.iter().chain(DATABASE_ERROR_KEYWORDS) {
            assert_eq!(*kw, kw.to_lowercase(), "keyword {kw:?} would never match");
        }
    }

    #[test]
    fn test_tag_matcher_ignores_longer_names() {
        let (_, a) = &CONTENT_TAG_MATCHERS[CONTENT_TAGS.iter().position(|t| *t == "a").unwrap()];
        assert!(a.is_match("<a href='/'>"));
        assert!(!a.is_match("<abbr>"));
        assert!(!a.is_match("<article>"));
    }

    #[test]
    fn test_first_match() {
        assert_eq!(
            first_match("oops: too many connections", DATABASE_ERROR_KEYWORDS),
            Some("too many connections")
        );
        assert_eq!(first_match("all good", SUSPENSION_KEYWORDS), None);
    }
}
