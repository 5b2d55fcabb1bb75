use std::thread;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use shared::types::{DownRecord, Site};
use crate::store::{db::DownDb, Cleanup, DownStore};

/// Commands sent to the store thread
pub enum StoreCommand {
    Exists(i64, oneshot::Sender<Result<bool>>),
    UpsertDown {
        site: Site,
        reason: String,
        now: DateTime<Utc>,
        reply: oneshot::Sender<Result<DownRecord>>,
    },
    DeleteDown(i64, oneshot::Sender<Result<Option<DownRecord>>>),
    ListDown(oneshot::Sender<Result<Vec<DownRecord>>>),
    DeleteNotIn(Vec<i64>, oneshot::Sender<Result<Cleanup>>),
    Count(oneshot::Sender<Result<usize>>),
    Shutdown,
}

/// Handle to the thread that owns the SQLite connection.
/// Commands are applied one at a time, in arrival order.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(db: DownDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Exists(site_id, reply) => {
                        let _ = reply.send(db.exists(site_id));
                    }
                    StoreCommand::UpsertDown { site, reason, now, reply } => {
                        let _ = reply.send(db.upsert_down(&site, &reason, now));
                    }
                    StoreCommand::DeleteDown(site_id, reply) => {
                        let _ = reply.send(db.delete_down(site_id));
                    }
                    StoreCommand::ListDown(reply) => {
                        let _ = reply.send(db.list_all_down());
                    }
                    StoreCommand::DeleteNotIn(site_ids, reply) => {
                        let _ = reply.send(db.delete_not_in(&site_ids));
                    }
                    StoreCommand::Count(reply) => {
                        let _ = reply.send(db.count_down());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| anyhow!("store thread is not running"))?;
        rx.await.map_err(|_| anyhow!("store thread dropped the reply"))?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("store thread is not running"))?;
        Ok(())
    }
}

#[async_trait]
impl DownStore for StoreHandle {
    async fn exists(&self, site_id: i64) -> Result<bool> {
        self.request(|reply| StoreCommand::Exists(site_id, reply)).await
    }

    async fn upsert_down(&self, site: &Site, reason: &str, now: DateTime<Utc>) -> Result<DownRecord> {
        let site = site.clone();
        let reason = reason.to_string();
        self.request(|reply| StoreCommand::UpsertDown { site, reason, now, reply })
            .await
    }

    async fn delete_down(&self, site_id: i64) -> Result<Option<DownRecord>> {
        self.request(|reply| StoreCommand::DeleteDown(site_id, reply)).await
    }

    async fn list_all_down(&self) -> Result<Vec<DownRecord>> {
        self.request(StoreCommand::ListDown).await
    }

    async fn delete_not_in(&self, site_ids: &[i64]) -> Result<Cleanup> {
        let site_ids = site_ids.to_vec();
        self.request(|reply| StoreCommand::DeleteNotIn(site_ids, reply)).await
    }

    async fn count_down(&self) -> Result<usize> {
        self.request(StoreCommand::Count).await
    }
}
