use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use serde::Serialize;

/// Transport-level failure categories. Each maps to one fixed reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Dns,
    ConnectionRefused,
    ConnectionReset,
    Tls,
    Upstream5xx,
    Other,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionReset | Self::Upstream5xx)
    }
}

/// A request that never produced a usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub class: ErrorClass,
    /// Upstream status for `Upstream5xx`
    pub status: Option<u16>,
    /// Raw error text, shown for `Other`
    pub detail: String,
}

impl TransportFailure {
    pub fn new(class: ErrorClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            status: None,
            detail: detail.into(),
        }
    }

    pub fn upstream(status: u16) -> Self {
        Self {
            class: ErrorClass::Upstream5xx,
            status: Some(status),
            detail: format!("HTTP {status}"),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            ErrorClass::Timeout => f.write_str("Timeout - site not responding"),
            ErrorClass::Dns => f.write_str("DNS error - domain not found"),
            ErrorClass::ConnectionRefused => f.write_str("Connection refused - server is down"),
            ErrorClass::ConnectionReset => f.write_str("Connection reset"),
            ErrorClass::Tls => f.write_str("SSL certificate invalid or missing"),
            ErrorClass::Upstream5xx => match self.status {
                Some(status) => write!(f, "Server error: {status}"),
                None => f.write_str("Server error"),
            },
            ErrorClass::Other if self.detail.is_empty() => f.write_str("Unknown error"),
            ErrorClass::Other => f.write_str(&self.detail),
        }
    }
}

/// Why a site is considered down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownReason {
    AccountSuspended,
    DatabaseError,
    NotFound,
    Forbidden,
    SmallResponse { bytes: usize },
    InvalidStructure,
    EmptyHtml,
    TooFewTags { total: usize, min: usize },
    TooFewTagTypes { distinct: usize, min: usize },
    NoStructuralContent,
    WrongContentType(String),
    Transport(TransportFailure),
    InvalidSite,
    Internal(String),
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountSuspended => f.write_str("Account suspended"),
            Self::DatabaseError => f.write_str("Database error"),
            Self::NotFound => f.write_str("Page not found (404)"),
            Self::Forbidden => f.write_str("Access forbidden (403)"),
            Self::SmallResponse { bytes } => {
                write!(f, "Suspicious small response ({bytes} bytes)")
            }
            Self::InvalidStructure => {
                f.write_str("Invalid HTML structure - missing <html> or <body> tags")
            }
            Self::EmptyHtml => f.write_str("Empty HTML - page has no content"),
            Self::TooFewTags { total, min } => write!(f, "Too few content tags ({total}/{min})"),
            Self::TooFewTagTypes { distinct, min } => {
                write!(f, "Too few tag types ({distinct}/{min})")
            }
            Self::NoStructuralContent => f.write_str("No headings, paragraphs or sections"),
            Self::WrongContentType(ct) => write!(f, "Wrong content-type: {ct} (expected HTML)"),
            Self::Transport(failure) => fmt::Display::fmt(failure, f),
            Self::InvalidSite => f.write_str("Invalid site: missing domain"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

/// Informational note attached to an up verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpNote {
    Ok,
    Spa,
    Redirect(u16),
    ClientError(u16),
    UnknownStatus(u16),
}

impl fmt::Display for UpNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Spa => f.write_str("OK (SPA detected)"),
            Self::Redirect(status) => write!(f, "Redirect: {status}"),
            Self::ClientError(status) => write!(f, "Client error: {status}"),
            Self::UnknownStatus(status) => write!(f, "Unknown status: {status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Up(UpNote),
    Down(DownReason),
}

/// Occurrences of each content tag found in a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagCounts {
    pub counts: BTreeMap<&'static str, usize>,
    pub total: usize,
    pub distinct: usize,
}

impl TagCounts {
    pub fn get(&self, tag: &str) -> usize {
        self.counts.get(tag).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpaIndicators {
    pub has_root: bool,
    pub has_meta: bool,
    pub has_libraries: bool,
    pub script_count: usize,
    pub text_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_counts: Option<TagCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spa: Option<SpaIndicators>,
}

/// Result of checking one site once. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub health: Health,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub diagnostics: Diagnostics,
}

impl Verdict {
    pub fn up(note: UpNote, status_code: Option<u16>) -> Self {
        Self {
            health: Health::Up(note),
            status_code,
            response_time_ms: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn down(reason: DownReason, status_code: Option<u16>) -> Self {
        Self {
            health: Health::Down(reason),
            status_code,
            response_time_ms: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_tag_counts(mut self, counts: TagCounts) -> Self {
        self.diagnostics.tag_counts = Some(counts);
        self
    }

    pub fn with_spa(mut self, indicators: SpaIndicators) -> Self {
        self.diagnostics.spa = Some(indicators);
        self
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_up(&self) -> bool {
        matches!(self.health, Health::Up(_))
    }

    /// Down cause, or the informational note when up
    pub fn reason(&self) -> String {
        match &self.health {
            Health::Up(note) => note.to_string(),
            Health::Down(reason) => reason.to_string(),
        }
    }

    pub fn down_reason(&self) -> Option<&DownReason> {
        match &self.health {
            Health::Down(reason) => Some(reason),
            Health::Up(_) => None,
        }
    }

    /// Transport class when the verdict came from a connection failure
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self.down_reason() {
            Some(DownReason::Transport(failure)) => Some(failure.class),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(ErrorClass::Timeout.is_retryable());
        assert!(ErrorClass::ConnectionReset.is_retryable());
        assert!(ErrorClass::Upstream5xx.is_retryable());
        assert!(!ErrorClass::Dns.is_retryable());
        assert!(!ErrorClass::ConnectionRefused.is_retryable());
        assert!(!ErrorClass::Tls.is_retryable());
        assert!(!ErrorClass::Other.is_retryable());
    }

    #[test]
    fn test_reason_text() {
        let v = Verdict::down(DownReason::Transport(TransportFailure::upstream(503)), Some(503));
        assert_eq!(v.reason(), "Server error: 503");
        assert_eq!(v.error_class(), Some(ErrorClass::Upstream5xx));

        let v = Verdict::up(UpNote::Redirect(301), Some(301));
        assert!(v.is_up());
        assert_eq!(v.reason(), "Redirect: 301");
        assert_eq!(v.error_class(), None);
    }

    #[test]
    fn test_other_failure_shows_detail() {
        let failure = TransportFailure::new(ErrorClass::Other, "builder error");
        assert_eq!(failure.to_string(), "builder error");
        assert_eq!(TransportFailure::new(ErrorClass::Other, "").to_string(), "Unknown error");
    }
}
