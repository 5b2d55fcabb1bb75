use std::collections::HashMap;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::types::{DownRecord, DownSummary, ServerGroup};
use crate::store::DownStore;

pub const DEFAULT_MIN_GROUP_SIZE: usize = 2;

/// Servers with at least `min_count` sites down at the same time.
pub async fn find_outage_groups<S>(store: &S, min_count: usize) -> Result<Vec<ServerGroup>>
where
    S: DownStore + ?Sized,
{
    let records = store
        .list_all_down()
        .await
        .context("Failed to load down sites for correlation")?;

    Ok(group_outages(&records, min_count))
}

/// Groups by `vps_ip`, falling back to `address`; records with neither
/// are left out. Largest groups first.
pub fn group_outages(records: &[DownRecord], min_count: usize) -> Vec<ServerGroup> {
    let mut groups: HashMap<&str, ServerGroup> = HashMap::new();

    for record in records {
        let Some((kind, identifier)) = record.hosting_identifier() else {
            continue;
        };

        let group = groups.entry(identifier).or_insert_with(|| ServerGroup {
            identifier: identifier.to_string(),
            kind,
            count: 0,
            sites: Vec::new(),
        });
        group.count += 1;
        group.sites.push(DownSummary {
            domain: record.domain.clone(),
            down_since: record.down_since,
            last_error: record.last_error.clone(),
        });
    }

    let mut suspected: Vec<ServerGroup> = groups
        .into_values()
        .filter(|g| g.count >= min_count)
        .collect();
    suspected.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.identifier.cmp(&b.identifier)));
    suspected
}

/// Age of the oldest outage in the group: "N min", "N h" or "N d".
pub fn earliest_down_age(group: &ServerGroup, now: DateTime<Utc>) -> String {
    match group.sites.iter().map(|s| s.down_since).min() {
        Some(earliest) => format_age((now - earliest).num_minutes()),
        None => "unknown".to_string(),
    }
}

fn format_age(minutes: i64) -> String {
    let minutes = minutes.max(0);
    if minutes < 60 {
        return format!("{minutes} min");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} h");
    }
    format!("{} d", hours / 24)
}
