//! Turns a completed HTTP exchange or a transport failure into a verdict.
//!
//! Checks run in a fixed order and stop at the first match: keyword scans
//! first (a 200 suspension page is still down), then status routing, then
//! body quality for 2xx responses. SPA detection runs before the content
//! heuristics because client-rendered shells fail them legitimately.

use std::io;
use crate::checker::rules::{self, CONTENT_TAG_MATCHERS};
use crate::checker::verdict::{
    DownReason, ErrorClass, SpaIndicators, TagCounts, TransportFailure, UpNote, Verdict,
};

/// What the transport produced for one attempt.
#[derive(Debug, Clone)]
pub enum TransportOutcome<'a> {
    Response {
        status: u16,
        body: &'a str,
        content_type: Option<&'a str>,
    },
    Failure(TransportFailure),
}

pub fn classify(outcome: &TransportOutcome<'_>) -> Verdict {
    match outcome {
        TransportOutcome::Response { status, body, content_type } => {
            classify_response(*status, body, *content_type)
        }
        TransportOutcome::Failure(failure) => classify_failure(failure.clone()),
    }
}

pub fn classify_failure(failure: TransportFailure) -> Verdict {
    let status = failure.status;
    Verdict::down(DownReason::Transport(failure), status)
}

pub fn classify_response(status: u16, body: &str, content_type: Option<&str>) -> Verdict {
    let code = Some(status);
    let lower = body.to_lowercase();

    if rules::first_match(&lower, rules::SUSPENSION_KEYWORDS).is_some() {
        return Verdict::down(DownReason::AccountSuspended, code);
    }
    if rules::first_match(&lower, rules::DATABASE_ERROR_KEYWORDS).is_some() {
        return Verdict::down(DownReason::DatabaseError, code);
    }

    match status {
        200..=299 => classify_body(status, body, &lower, content_type),
        300..=399 => Verdict::up(UpNote::Redirect(status), code),
        404 => Verdict::down(DownReason::NotFound, code),
        403 => Verdict::down(DownReason::Forbidden, code),
        400..=499 => Verdict::up(UpNote::ClientError(status), code),
        _ => Verdict::up(UpNote::UnknownStatus(status), code),
    }
}

fn classify_body(status: u16, body: &str, lower: &str, content_type: Option<&str>) -> Verdict {
    let code = Some(status);

    if body.len() < rules::MIN_HTML_BYTES {
        return Verdict::down(DownReason::SmallResponse { bytes: body.len() }, code);
    }

    if !has_html_structure(body) {
        return Verdict::down(DownReason::InvalidStructure, code);
    }

    if let Some(indicators) = detect_spa(body, lower) {
        return Verdict::up(UpNote::Spa, code).with_spa(indicators);
    }

    if is_empty_html(body) {
        return Verdict::down(DownReason::EmptyHtml, code);
    }

    let counts = count_content_tags(body);
    if let Err(reason) = check_richness(&counts) {
        return Verdict::down(reason, code).with_tag_counts(counts);
    }

    if let Some(ct) = content_type {
        let ct_lower = ct.to_lowercase();
        if !ct_lower.contains("text/html") && !ct_lower.contains("application/xhtml") {
            return Verdict::down(DownReason::WrongContentType(ct.to_string()), code)
                .with_tag_counts(counts);
        }
    }

    Verdict::up(UpNote::Ok, code).with_tag_counts(counts)
}

fn has_html_structure(body: &str) -> bool {
    rules::HTML_OPEN.is_match(body) && rules::BODY_OPEN.is_match(body)
}

/// Returns the indicators when the page looks like a client-rendered app.
pub fn detect_spa(body: &str, lower: &str) -> Option<SpaIndicators> {
    let has_root = rules::SPA_ROOT.is_match(body);
    let has_meta = rules::SPA_META.is_match(body);

    let script_count =
        rules::SCRIPT_SRC.find_iter(body).count() + rules::SCRIPT_BLOCK.find_iter(body).count();

    let has_libraries = rules::SPA_LIBRARY_HINTS.iter().any(|hint| lower.contains(hint));

    let without_scripts = rules::SCRIPT_STRIP.replace_all(body, "");
    let text_length = strip_tags(&without_scripts).trim().chars().count();
    let minimal_text = text_length < rules::SPA_MAX_TEXT_LENGTH;

    let is_spa = has_root
        || has_meta
        || (script_count >= rules::SPA_MIN_SCRIPTS && minimal_text)
        || (has_libraries && minimal_text && script_count >= 1);

    is_spa.then_some(SpaIndicators {
        has_root,
        has_meta,
        has_libraries,
        script_count,
        text_length,
    })
}

/// Too little text once tags are removed, or mostly whitespace.
pub fn is_empty_html(body: &str) -> bool {
    let stripped = strip_tags(body);
    let text = stripped.trim();
    if text.chars().count() < rules::MIN_TEXT_LENGTH {
        return true;
    }

    let meaningful = rules::WHITESPACE.replace_all(text, "");
    meaningful.chars().count() < rules::MIN_MEANINGFUL_LENGTH
}

pub fn count_content_tags(body: &str) -> TagCounts {
    let mut counts = TagCounts::default();
    for (tag, matcher) in CONTENT_TAG_MATCHERS.iter() {
        let n = matcher.find_iter(body).count();
        if n > 0 {
            counts.counts.insert(*tag, n);
            counts.total += n;
        }
    }
    counts.distinct = counts.counts.len();
    counts
}

fn check_richness(counts: &TagCounts) -> Result<(), DownReason> {
    if counts.total < rules::MIN_TOTAL_TAGS {
        return Err(DownReason::TooFewTags {
            total: counts.total,
            min: rules::MIN_TOTAL_TAGS,
        });
    }

    if counts.distinct < rules::MIN_TAG_TYPES {
        return Err(DownReason::TooFewTagTypes {
            distinct: counts.distinct,
            min: rules::MIN_TAG_TYPES,
        });
    }

    let present = |tags: &[&str]| tags.iter().any(|t| counts.get(t) > 0);
    if !present(rules::HEADING_TAGS)
        && counts.get(rules::PARAGRAPH_TAG) == 0
        && !present(rules::SECTION_TAGS)
    {
        return Err(DownReason::NoStructuralContent);
    }

    Ok(())
}

fn strip_tags(html: &str) -> std::borrow::Cow<'_, str> {
    rules::ANY_TAG.replace_all(html, "")
}

/// Facts extracted from a transport error, independent of the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ErrorSignals<'a> {
    pub timed_out: bool,
    pub io_kind: Option<io::ErrorKind>,
    pub status: Option<u16>,
    /// Full error chain rendered as text
    pub text: &'a str,
}

/// Maps an error to exactly one class, checked in priority order.
pub fn classify_error(signals: &ErrorSignals<'_>) -> ErrorClass {
    let text = signals.text.to_lowercase();
    let io_kind = signals.io_kind;

    if signals.timed_out || io_kind == Some(io::ErrorKind::TimedOut) {
        return ErrorClass::Timeout;
    }
    if text.contains("dns error")
        || text.contains("failed to lookup address")
        || text.contains("name or service not known")
        || text.contains("no such host")
    {
        return ErrorClass::Dns;
    }
    if io_kind == Some(io::ErrorKind::ConnectionRefused) || text.contains("connection refused") {
        return ErrorClass::ConnectionRefused;
    }
    if matches!(
        io_kind,
        Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted)
    ) || text.contains("connection reset")
    {
        return ErrorClass::ConnectionReset;
    }
    if text.contains("certificate") || text.contains("ssl") || text.contains("tls") {
        return ErrorClass::Tls;
    }
    if signals.status.is_some_and(|s| s >= 500) {
        return ErrorClass::Upstream5xx;
    }
    ErrorClass::Other
}
