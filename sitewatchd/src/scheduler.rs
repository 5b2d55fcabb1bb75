use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use crate::monitor::{CycleError, Monitor};

/// Single-flight flag shared by the scheduler and manual triggers.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    running: Arc<AtomicBool>,
}

/// Held for the duration of one cycle; releases the guard on drop,
/// including when the cycle fails or panics.
#[must_use]
#[derive(Debug)]
pub struct CyclePermit {
    running: Arc<AtomicBool>,
}

impl CycleGuard {
    pub fn try_acquire(&self) -> Option<CyclePermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Periodic trigger. The first cycle starts immediately, then one per
/// interval; ticks that land while a cycle is running are skipped.
pub struct Scheduler {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(monitor: Arc<Monitor>, interval: Duration, shutdown: &CancellationToken) -> Self {
        let cancel = shutdown.child_token();
        let task = tokio::spawn(run_loop(monitor, interval, cancel.clone()));
        Self { cancel, task }
    }

    /// Stops future ticks. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<()> {
        self.task.await.context("Scheduler task failed")
    }
}

async fn run_loop(monitor: Arc<Monitor>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Scheduler stopped");
                break;
            }
            _ = ticker.tick() => tick(&monitor),
        }
    }
}

fn tick(monitor: &Arc<Monitor>) {
    if monitor.is_running() {
        tracing::info!("Previous check still running, skipping tick");
        return;
    }

    let monitor = monitor.clone();
    tokio::spawn(async move {
        match monitor.run_check_now().await {
            Ok(report) => {
                tracing::info!(sites = report.total(), duration_ms = report.duration_ms, "Scheduled check done")
            }
            Err(CycleError::AlreadyRunning) => {
                tracing::info!("Previous check still running, skipping tick")
            }
            Err(e) => tracing::error!("Scheduled check failed: {:#}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::CycleSettings;
    use crate::testing::{sites, MemoryStore, RecordingNotifier, ScriptedChecker, StaticInventory};

    fn monitor(inventory: Arc<StaticInventory>) -> Arc<Monitor> {
        Arc::new(Monitor::new(
            inventory,
            Arc::new(ScriptedChecker::default()),
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingNotifier::default()),
            CycleSettings::default(),
        ))
    }

    #[test]
    fn test_guard_is_single_flight() {
        let guard = CycleGuard::default();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_running());
        assert!(guard.clone().try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval_and_stops() {
        let inventory = Arc::new(StaticInventory::new(sites(&["a.com"])));
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::start(monitor(inventory.clone()), Duration::from_secs(300), &shutdown);

        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 3);

        scheduler.stop();
        scheduler.join().await.unwrap();
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_skipped() {
        let inventory = Arc::new(StaticInventory {
            sites: sites(&["a.com"]),
            delay: Some(Duration::from_secs(7 * 60)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::start(monitor(inventory.clone()), Duration::from_secs(300), &shutdown);

        // t=0 runs until t=7, t=5 is skipped, t=10 runs
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        scheduler.join().await.unwrap();
    }
}
