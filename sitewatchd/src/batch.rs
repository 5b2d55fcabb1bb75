use std::sync::Arc;
use std::time::Instant;
use futures::future::join_all;
use shared::types::{CycleReport, Site, TransitionEvent};
use crate::checker::SiteChecker;
use crate::store::DownStore;
use crate::transition;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Runs check + state transition for every site, one batch at a time.
#[derive(Clone)]
pub struct Orchestrator {
    checker: Arc<dyn SiteChecker>,
    store: Arc<dyn DownStore>,
}

impl Orchestrator {
    pub fn new(checker: Arc<dyn SiteChecker>, store: Arc<dyn DownStore>) -> Self {
        Self { checker, store }
    }

    /// Returns `None` when there is nothing to check.
    ///
    /// Sites inside a batch run concurrently as separate tasks and are
    /// joined settle-all, so a panicking check only costs its own site.
    /// Batches run strictly one after another.
    pub async fn run_all(&self, sites: &[Site], batch_size: usize) -> Option<CycleReport> {
        if sites.is_empty() || batch_size == 0 {
            tracing::error!(sites = sites.len(), batch_size, "Nothing to check");
            return None;
        }

        let started = Instant::now();
        let batch_count = sites.len().div_ceil(batch_size);
        tracing::info!(sites = sites.len(), batch_size, batches = batch_count, "Starting checks");

        let mut report = CycleReport::default();
        for (i, batch) in sites.chunks(batch_size).enumerate() {
            let batch_started = Instant::now();
            tracing::info!(batch = i + 1, of = batch_count, size = batch.len(), "Checking batch");

            for event in self.run_batch(batch).await {
                report.record(event);
            }

            tracing::info!(
                batch = i + 1,
                elapsed_ms = batch_started.elapsed().as_millis() as u64,
                "Batch finished"
            );
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            up = report.up,
            newly_down = report.newly_down,
            still_down = report.still_down,
            recovered = report.recovered,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Checks finished"
        );

        Some(report)
    }

    async fn run_batch(&self, batch: &[Site]) -> Vec<TransitionEvent> {
        let handles = batch.iter().cloned().map(|site| {
            let checker = self.checker.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                let verdict = checker.check(&site).await;
                transition::transition(store.as_ref(), &site, &verdict).await
            })
        });

        let results = join_all(handles).await;

        results
            .into_iter()
            .zip(batch)
            .map(|(result, site)| match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(domain = %site.domain, "Check task failed: {}", e);
                    TransitionEvent::Error {
                        domain: site.domain.clone(),
                        message: format!("check task failed: {e}"),
                    }
                }
            })
            .collect()
    }
}
