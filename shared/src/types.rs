use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored site as supplied by the inventory API.
/// The monitor never mutates it; a fresh list arrives every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Stable inventory key
    pub id: i64,

    /// Bare domain, e.g. "example.com"
    pub domain: String,

    /// Inventory status string, stored alongside down records
    #[serde(default)]
    pub status: Option<String>,

    /// Dedicated server IP, preferred for outage grouping
    #[serde(default)]
    pub vps_ip: Option<String>,

    /// Generic hosting address, fallback for outage grouping
    #[serde(default)]
    pub address: Option<String>,
}

impl Site {
    pub fn hosting_identifier(&self) -> Option<(HostKind, &str)> {
        hosting_identifier(self.vps_ip.as_deref(), self.address.as_deref())
    }
}

/// Which field a hosting identifier was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    VpsIp,
    Address,
}

/// Picks `vps_ip` when set and non-blank, otherwise `address`.
pub fn hosting_identifier<'a>(
    vps_ip: Option<&'a str>,
    address: Option<&'a str>,
) -> Option<(HostKind, &'a str)> {
    let non_blank = |v: Option<&'a str>| v.map(str::trim).filter(|s| !s.is_empty());

    non_blank(vps_ip)
        .map(|ip| (HostKind::VpsIp, ip))
        .or_else(|| non_blank(address).map(|addr| (HostKind::Address, addr)))
}

/// A site that is currently down. The row existing is the "down" state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownRecord {
    pub site_id: i64,
    pub domain: String,
    pub status: Option<String>,
    pub vps_ip: Option<String>,
    pub address: Option<String>,

    /// Start of the current down episode; never refreshed while down
    pub down_since: DateTime<Utc>,

    /// Most recent failure reason
    pub last_error: Option<String>,

    pub last_checked_at: DateTime<Utc>,
}

impl DownRecord {
    pub fn hosting_identifier(&self) -> Option<(HostKind, &str)> {
        hosting_identifier(self.vps_ip.as_deref(), self.address.as_deref())
    }
}

/// Outcome of running one verdict through the down/up state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionEvent {
    Up {
        domain: String,
    },
    NewlyDown {
        domain: String,
        reason: String,
    },
    StillDown {
        domain: String,
        reason: String,
    },
    Recovered {
        domain: String,
        downtime: String,
    },
    Error {
        domain: String,
        message: String,
    },
}

impl TransitionEvent {
    pub fn domain(&self) -> &str {
        match self {
            Self::Up { domain }
            | Self::NewlyDown { domain, .. }
            | Self::StillDown { domain, .. }
            | Self::Recovered { domain, .. }
            | Self::Error { domain, .. } => domain,
        }
    }
}

/// Aggregated result of one full check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub up: usize,
    pub newly_down: usize,
    pub still_down: usize,
    pub recovered: usize,
    pub errors: usize,
    pub events: Vec<TransitionEvent>,
    pub duration_ms: u64,
}

impl CycleReport {
    /// Count an event and keep it for the notification sink.
    pub fn record(&mut self, event: TransitionEvent) {
        match &event {
            TransitionEvent::Up { .. } => self.up += 1,
            TransitionEvent::NewlyDown { .. } => self.newly_down += 1,
            TransitionEvent::StillDown { .. } => self.still_down += 1,
            TransitionEvent::Recovered { .. } => self.recovered += 1,
            TransitionEvent::Error { .. } => self.errors += 1,
        }
        self.events.push(event);
    }

    pub fn total(&self) -> usize {
        self.up + self.newly_down + self.still_down + self.recovered + self.errors
    }
}

/// Per-site summary inside a server group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownSummary {
    pub domain: String,
    pub down_since: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Several down sites sharing one hosting identifier.
/// Derived from the current down records; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub identifier: String,
    pub kind: HostKind,
    pub count: usize,
    pub sites: Vec<DownSummary>,
}
