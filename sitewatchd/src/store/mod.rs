pub mod db;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::types::{DownRecord, Site};

/// Records removed by the vanished-site cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cleanup {
    pub count: usize,
    pub removed: Vec<DownRecord>,
}

/// Persistence for down records. Every call hits the backing store;
/// implementations must make upsert and delete atomic per site.
#[async_trait]
pub trait DownStore: Send + Sync {
    async fn exists(&self, site_id: i64) -> Result<bool>;

    /// Insert a new down record or refresh an existing one.
    /// `down_since` is only written on insert.
    async fn upsert_down(&self, site: &Site, reason: &str, now: DateTime<Utc>) -> Result<DownRecord>;

    async fn delete_down(&self, site_id: i64) -> Result<Option<DownRecord>>;

    /// All down records, most recent episode first
    async fn list_all_down(&self) -> Result<Vec<DownRecord>>;

    /// Remove records whose site id is not in `site_ids`.
    /// An empty slice removes nothing.
    async fn delete_not_in(&self, site_ids: &[i64]) -> Result<Cleanup>;

    async fn count_down(&self) -> Result<usize>;
}
