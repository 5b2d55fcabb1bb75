use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{redirect::Policy, Client, ClientBuilder, Response};
use shared::types::Site;
use crate::checker::classifier::{self, ErrorSignals, TransportOutcome};
use crate::checker::retry::{RetryDecision, RetryPolicy};
use crate::checker::verdict::{DownReason, TransportFailure, Verdict};
use crate::config::CheckerConfig;

/// Produces one final verdict per site. Never fails: every problem,
/// including a panic inside the check, comes back as a down verdict.
#[async_trait]
pub trait SiteChecker: Send + Sync {
    async fn check(&self, site: &Site) -> Verdict;
}

pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(config: &CheckerConfig) -> Result<Self> {
        let client = client_builder(config)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_config(config),
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub async fn fetch_with_retry(&self, url: &str, domain: &str) -> Verdict {
        run_attempts(&self.policy, domain, move |_, timeout| self.attempt(url, timeout)).await
    }

    /// One GET with its own timeout covering headers and body.
    async fn attempt(&self, url: &str, timeout: Duration) -> Verdict {
        let started = Instant::now();

        let verdict = match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => self.classify_response(resp).await,
            Err(e) => classifier::classify_failure(failure_from_error(e)),
        };

        verdict.with_response_time(started.elapsed())
    }

    async fn classify_response(&self, resp: Response) -> Verdict {
        let status = resp.status().as_u16();
        if status >= 500 {
            return classifier::classify_failure(TransportFailure::upstream(status));
        }

        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match read_body(resp, self.max_body_bytes).await {
            Ok(body) => classifier::classify(&TransportOutcome::Response {
                status,
                body: &body,
                content_type: content_type.as_deref(),
            }),
            Err(e) => classifier::classify_failure(failure_from_error(e)),
        }
    }
}

fn client_builder(config: &CheckerConfig) -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .redirect(Policy::limited(config.max_redirects))
}

/// Reads at most `limit` bytes; the rest of the body is never downloaded.
async fn read_body(mut resp: Response, limit: usize) -> reqwest::Result<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = limit - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait]
impl SiteChecker for Fetcher {
    async fn check(&self, site: &Site) -> Verdict {
        let domain = site.domain.trim();
        if domain.is_empty() {
            tracing::warn!(site_id = site.id, "Site has no domain, skipping request");
            return Verdict::down(DownReason::InvalidSite, None);
        }

        let url = format!("https://{domain}");
        match AssertUnwindSafe(self.fetch_with_retry(&url, domain)).catch_unwind().await {
            Ok(verdict) => verdict,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(domain, %message, "Check panicked");
                Verdict::down(DownReason::Internal(message), None)
            }
        }
    }
}

/// Drives attempts until one is final according to `policy`.
/// `attempt` receives the 1-based attempt number and its timeout.
pub async fn run_attempts<F, Fut>(policy: &RetryPolicy, domain: &str, mut attempt: F) -> Verdict
where
    F: FnMut(u32, Duration) -> Fut,
    Fut: Future<Output = Verdict>,
{
    let mut attempts_made = 0u32;
    loop {
        attempts_made += 1;
        let timeout = policy.timeout_for(attempts_made);
        let verdict = attempt(attempts_made, timeout).await;

        let Some(class) = verdict.error_class() else {
            return verdict;
        };

        match policy.decide(class, attempts_made) {
            RetryDecision::Retry { delay } => {
                tracing::debug!(
                    domain,
                    attempt = attempts_made,
                    ?class,
                    timeout_ms = timeout.as_millis() as u64,
                    "Attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => return verdict,
        }
    }
}

fn failure_from_error(err: reqwest::Error) -> TransportFailure {
    let status = err.status().map(|s| s.as_u16());
    let timed_out = err.is_timeout();

    // The URL carries the site's domain and must stay out of keyword matching
    let err = err.without_url();
    let text = error_chain(&err);
    let signals = ErrorSignals {
        timed_out,
        io_kind: io_error_kind(&err),
        status,
        text: &text,
    };

    let mut failure = TransportFailure::new(classifier::classify_error(&signals), text.as_str());
    failure.status = status;
    failure
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(e) = source {
        parts.push(e.to_string());
        source = e.source();
    }
    parts.join(": ")
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "check panicked".to_string()
    }
}
