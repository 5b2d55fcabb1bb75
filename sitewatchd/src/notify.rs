use std::fmt::Write as _;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::types::{CycleReport, ServerGroup, TransitionEvent};
use crate::correlator;

/// Chat-sized chunks for per-site transition lists
pub const MAX_SITES_PER_MESSAGE: usize = 20;

/// Domains listed under each server before "... and N more"
pub const MAX_DOMAINS_PER_GROUP: usize = 5;

/// Delivery side of the monitor. Calls are best-effort: the caller
/// bounds them in time and only logs failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn cycle_finished(&self, report: &CycleReport) -> Result<()>;

    async fn outage_groups(&self, groups: &[ServerGroup]) -> Result<()>;
}

/// Renders notifications into the structured log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn cycle_finished(&self, report: &CycleReport) -> Result<()> {
        tracing::info!(target: "sitewatchd::notify", "{}", format_cycle_summary(report));

        for message in format_newly_down(&report.events) {
            tracing::warn!(target: "sitewatchd::notify", "{}", message);
        }
        for message in format_recovered(&report.events) {
            tracing::info!(target: "sitewatchd::notify", "{}", message);
        }
        Ok(())
    }

    async fn outage_groups(&self, groups: &[ServerGroup]) -> Result<()> {
        if !groups.is_empty() {
            tracing::warn!(
                target: "sitewatchd::notify",
                "{}",
                format_server_report(groups, Utc::now())
            );
        }
        Ok(())
    }
}

pub fn format_cycle_summary(report: &CycleReport) -> String {
    let mut out = format!(
        "Check finished in {:.2}s: {} up, {} newly down, {} still down, {} recovered",
        report.duration_ms as f64 / 1000.0,
        report.up,
        report.newly_down,
        report.still_down,
        report.recovered,
    );
    if report.errors > 0 {
        let _ = write!(out, ", {} errors", report.errors);
    }
    out
}

pub fn format_newly_down(events: &[TransitionEvent]) -> Vec<String> {
    let lines: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            TransitionEvent::NewlyDown { domain, reason } => Some(format!("{domain}: {reason}")),
            _ => None,
        })
        .collect();
    chunk_messages("Sites down", &lines)
}

pub fn format_recovered(events: &[TransitionEvent]) -> Vec<String> {
    let lines: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            TransitionEvent::Recovered { domain, downtime } => {
                Some(format!("{domain}: back after {downtime}"))
            }
            _ => None,
        })
        .collect();
    chunk_messages("Sites recovered", &lines)
}

/// Numbered lists of at most [`MAX_SITES_PER_MESSAGE`] lines per message.
fn chunk_messages(title: &str, lines: &[String]) -> Vec<String> {
    let parts = lines.len().div_ceil(MAX_SITES_PER_MESSAGE);

    lines
        .chunks(MAX_SITES_PER_MESSAGE)
        .enumerate()
        .map(|(part, chunk)| {
            let mut msg = if parts > 1 {
                format!("{title} (part {}/{parts})\n", part + 1)
            } else {
                format!("{title} ({})\n", lines.len())
            };
            for (i, line) in chunk.iter().enumerate() {
                let n = part * MAX_SITES_PER_MESSAGE + i + 1;
                let _ = writeln!(msg, "{n}. {line}");
            }
            msg
        })
        .collect()
}

pub fn format_server_report(groups: &[ServerGroup], now: DateTime<Utc>) -> String {
    if groups.is_empty() {
        return "No servers with multiple down sites".to_string();
    }

    let mut out = format!("Suspected servers ({})\n", groups.len());
    for (i, group) in groups.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, group.identifier);
        let _ = writeln!(out, "   down sites: {}", group.count);
        let _ = writeln!(
            out,
            "   earliest outage: {}",
            correlator::earliest_down_age(group, now)
        );
        for site in group.sites.iter().take(MAX_DOMAINS_PER_GROUP) {
            let _ = writeln!(out, "   - {}", site.domain);
        }
        if group.sites.len() > MAX_DOMAINS_PER_GROUP {
            let _ = writeln!(out, "   ... and {} more", group.sites.len() - MAX_DOMAINS_PER_GROUP);
        }
    }
    out
}
