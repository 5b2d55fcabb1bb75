//! Scripted collaborators shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use shared::types::{CycleReport, DownRecord, ServerGroup, Site};
use crate::checker::verdict::{DownReason, UpNote};
use crate::checker::{SiteChecker, Verdict};
use crate::inventory::Inventory;
use crate::notify::Notifier;
use crate::store::db::DownDb;
use crate::store::{Cleanup, DownStore};
use crate::store_manager::StoreHandle;

pub fn site(id: i64, domain: &str) -> Site {
    Site {
        id,
        domain: domain.to_string(),
        status: None,
        vps_ip: None,
        address: None,
    }
}

pub fn sites(domains: &[&str]) -> Vec<Site> {
    domains
        .iter()
        .enumerate()
        .map(|(i, d)| site(i as i64 + 1, d))
        .collect()
}

/// A plain server-rendered page that passes every content check.
pub fn rich_page() -> String {
    let mut body = String::from(
        "<!DOCTYPE html><html><head><title>Shop</title></head><body><main>\
         <h1>Welcome to the shop</h1>",
    );
    for i in 0..6 {
        body.push_str(&format!(
            "<div class=\"item\"><p>Product number {i} is a sturdy handmade \
             item shipped worldwide.</p><a href=\"/p/{i}\">details</a></div>"
        ));
    }
    body.push_str("</main></body></html>");
    body
}

pub fn memory_store() -> StoreHandle {
    StoreHandle::spawn(DownDb::open(":memory:").expect("in-memory database"))
}

/// Down records kept in the test's own task, for paused-clock tests
/// where waiting on the store thread would let tokio auto-advance time.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<i64, DownRecord>>,
}

#[async_trait]
impl DownStore for MemoryStore {
    async fn exists(&self, site_id: i64) -> Result<bool> {
        Ok(self.records.lock().unwrap().contains_key(&site_id))
    }

    async fn upsert_down(&self, site: &Site, reason: &str, now: DateTime<Utc>) -> Result<DownRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(site.id).or_insert_with(|| DownRecord {
            site_id: site.id,
            domain: site.domain.clone(),
            status: None,
            vps_ip: None,
            address: None,
            down_since: now,
            last_error: None,
            last_checked_at: now,
        });
        record.domain = site.domain.clone();
        record.status = site.status.clone();
        record.vps_ip = site.vps_ip.clone();
        record.address = site.address.clone();
        record.last_error = Some(reason.to_string());
        record.last_checked_at = now;
        Ok(record.clone())
    }

    async fn delete_down(&self, site_id: i64) -> Result<Option<DownRecord>> {
        Ok(self.records.lock().unwrap().remove(&site_id))
    }

    async fn list_all_down(&self) -> Result<Vec<DownRecord>> {
        let mut all: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.down_since.cmp(&a.down_since).then(a.site_id.cmp(&b.site_id)));
        Ok(all)
    }

    async fn delete_not_in(&self, site_ids: &[i64]) -> Result<Cleanup> {
        if site_ids.is_empty() {
            return Ok(Cleanup::default());
        }
        let mut records = self.records.lock().unwrap();
        let stale: Vec<i64> = records.keys().filter(|id| !site_ids.contains(id)).copied().collect();
        let removed: Vec<DownRecord> = stale.iter().filter_map(|id| records.remove(id)).collect();
        Ok(Cleanup {
            count: removed.len(),
            removed,
        })
    }

    async fn count_down(&self) -> Result<usize> {
        Ok(self.records.lock().unwrap().len())
    }
}

/// Domains starting with "down" are down, "boom" panics, the rest are up.
#[derive(Default)]
pub struct ScriptedChecker {
    pub calls: AtomicUsize,
    pub peak: AtomicUsize,
    in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedChecker {
    /// Every check waits for a permit on `gate` before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SiteChecker for ScriptedChecker {
    async fn check(&self, site: &Site) -> Verdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if site.domain.starts_with("boom") {
            panic!("unexpected fault checking {}", site.domain);
        }
        if site.domain.starts_with("down") {
            Verdict::down(DownReason::NotFound, Some(404))
        } else {
            Verdict::up(UpNote::Ok, Some(200))
        }
    }
}

#[derive(Default)]
pub struct StaticInventory {
    pub sites: Vec<Site>,
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl StaticInventory {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            sites,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn fetch_sites(&self) -> Result<Vec<Site>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            bail!("inventory API returned 503 Service Unavailable");
        }
        Ok(self.sites.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub reports: Mutex<Vec<CycleReport>>,
    pub groups: Mutex<Vec<Vec<ServerGroup>>>,
    pub fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn cycle_finished(&self, report: &CycleReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        if self.fail {
            bail!("chat API unreachable");
        }
        Ok(())
    }

    async fn outage_groups(&self, groups: &[ServerGroup]) -> Result<()> {
        self.groups.lock().unwrap().push(groups.to_vec());
        if self.fail {
            bail!("chat API unreachable");
        }
        Ok(())
    }
}
