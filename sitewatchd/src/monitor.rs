use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use shared::types::{CycleReport, DownRecord, ServerGroup, Site};
use crate::batch::{Orchestrator, DEFAULT_BATCH_SIZE};
use crate::checker::SiteChecker;
use crate::config::MonitorConfig;
use crate::correlator::{self, DEFAULT_MIN_GROUP_SIZE};
use crate::inventory::Inventory;
use crate::notify::Notifier;
use crate::scheduler::CycleGuard;
use crate::store::DownStore;

/// Upper bound for a single notifier call
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("a check cycle is already running")]
    AlreadyRunning,
    #[error("failed to fetch site inventory: {0:#}")]
    Inventory(anyhow::Error),
    #[error("site inventory is empty")]
    EmptyInventory,
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub batch_size: usize,
    pub correlate_after_cycle: bool,
    pub min_group_size: usize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            correlate_after_cycle: false,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
        }
    }
}

impl From<&MonitorConfig> for CycleSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            correlate_after_cycle: config.correlate_after_cycle,
            min_group_size: config.min_group_size,
        }
    }
}

/// One full check cycle plus the read-only queries the API serves.
/// At most one cycle runs at a time, however it was triggered.
pub struct Monitor {
    inventory: Arc<dyn Inventory>,
    store: Arc<dyn DownStore>,
    orchestrator: Orchestrator,
    notifier: Arc<dyn Notifier>,
    guard: CycleGuard,
    settings: CycleSettings,
}

impl Monitor {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        checker: Arc<dyn SiteChecker>,
        store: Arc<dyn DownStore>,
        notifier: Arc<dyn Notifier>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            inventory,
            orchestrator: Orchestrator::new(checker, store.clone()),
            store,
            notifier,
            guard: CycleGuard::default(),
            settings,
        }
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Waits for an in-flight cycle to finish. Returns false when it is
    /// still running after `limit`.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let idle = async {
            while self.guard.is_running() {
                tokio::time::sleep(IDLE_POLL).await;
            }
        };
        tokio::time::timeout(limit, idle).await.is_ok()
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Runs a cycle now unless one is already in flight. A rejected call
    /// touches neither the inventory nor the store.
    pub async fn run_check_now(&self) -> Result<CycleReport, CycleError> {
        let Some(_permit) = self.guard.try_acquire() else {
            return Err(CycleError::AlreadyRunning);
        };
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        tracing::info!("Starting check cycle");

        let sites = self
            .inventory
            .fetch_sites()
            .await
            .map_err(CycleError::Inventory)?;
        if sites.is_empty() {
            tracing::warn!("Inventory returned no sites");
            return Err(CycleError::EmptyInventory);
        }

        self.cleanup_vanished(&sites).await;

        let mut report = self
            .orchestrator
            .run_all(&sites, self.settings.batch_size)
            .await
            .ok_or(CycleError::EmptyInventory)?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        deliver("cycle report", self.notifier.cycle_finished(&report)).await;

        if self.settings.correlate_after_cycle {
            match self.query_outage_groups(self.settings.min_group_size).await {
                Ok(groups) => {
                    if !groups.is_empty() {
                        tracing::warn!(servers = groups.len(), "Servers with several sites down");
                    }
                    deliver("server report", self.notifier.outage_groups(&groups)).await;
                }
                Err(e) => tracing::warn!("Correlation failed: {:#}", e),
            }
        }

        Ok(report)
    }

    /// Drops down records for sites no longer in the inventory.
    /// Failure is logged and the cycle goes on.
    async fn cleanup_vanished(&self, sites: &[Site]) {
        let ids: Vec<i64> = sites.iter().map(|s| s.id).collect();

        match self.store.delete_not_in(&ids).await {
            Ok(cleanup) if cleanup.count > 0 => {
                let domains: Vec<&str> = cleanup.removed.iter().map(|r| r.domain.as_str()).collect();
                tracing::info!(count = cleanup.count, ?domains, "Removed down records for vanished sites");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Vanished-site cleanup failed: {:#}", e),
        }
    }

    pub async fn query_currently_down(&self) -> Result<Vec<DownRecord>> {
        self.store
            .list_all_down()
            .await
            .context("Failed to list down sites")
    }

    pub async fn query_outage_groups(&self, min_count: usize) -> Result<Vec<ServerGroup>> {
        correlator::find_outage_groups(self.store.as_ref(), min_count).await
    }

    pub async fn count_down(&self) -> Result<usize> {
        self.store.count_down().await
    }
}

async fn deliver(what: &str, call: impl Future<Output = Result<()>>) {
    match tokio::time::timeout(NOTIFY_TIMEOUT, call).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Failed to deliver {}: {:#}", what, e),
        Err(_) => tracing::warn!("Timed out delivering {}", what),
    }
}
