use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use shared::types::{DownRecord, Site};
use crate::store::Cleanup;

const RECORD_COLUMNS: &str =
    "site_id, domain, status, vps_ip, address, down_since, last_error, last_checked_at";

pub struct DownDb {
    conn: Connection,
}

impl DownDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS down_sites (
                site_id         INTEGER PRIMARY KEY,
                domain          TEXT NOT NULL,
                status          TEXT,
                vps_ip          TEXT,
                address         TEXT,
                down_since      TEXT NOT NULL,
                last_error      TEXT,
                last_checked_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_down_since ON down_sites(down_since);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    pub fn exists(&self, site_id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM down_sites WHERE site_id = ?1",
                params![site_id],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to check down record")?;

        Ok(found.is_some())
    }

    /// Single-statement insert-or-refresh. The conflict branch leaves
    /// `down_since` alone so an episode keeps its start time.
    pub fn upsert_down(&self, site: &Site, reason: &str, now: DateTime<Utc>) -> Result<DownRecord> {
        let now = format_ts(now);
        let sql = format!(
            r#"
            INSERT INTO down_sites (
                site_id, domain, status, vps_ip, address,
                down_since, last_error, last_checked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?6)
            ON CONFLICT(site_id) DO UPDATE SET
                domain = excluded.domain,
                status = excluded.status,
                vps_ip = excluded.vps_ip,
                address = excluded.address,
                last_error = excluded.last_error,
                last_checked_at = excluded.last_checked_at
            RETURNING {RECORD_COLUMNS}
            "#
        );

        self.conn
            .query_row(
                &sql,
                params![
                    site.id,
                    &site.domain,
                    &site.status,
                    &site.vps_ip,
                    &site.address,
                    now,
                    reason,
                ],
                Self::row_to_record,
            )
            .with_context(|| format!("Failed to upsert down record for {}", site.domain))
    }

    pub fn delete_down(&self, site_id: i64) -> Result<Option<DownRecord>> {
        let sql = format!("DELETE FROM down_sites WHERE site_id = ?1 RETURNING {RECORD_COLUMNS}");

        self.conn
            .query_row(&sql, params![site_id], Self::row_to_record)
            .optional()
            .context("Failed to delete down record")
    }

    pub fn list_all_down(&self) -> Result<Vec<DownRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM down_sites ORDER BY down_since DESC, site_id");
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare query")?;

        let records = stmt
            .query_map([], Self::row_to_record)
            .context("Failed to query down records")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect down records")?;

        Ok(records)
    }

    pub fn delete_not_in(&self, site_ids: &[i64]) -> Result<Cleanup> {
        if site_ids.is_empty() {
            return Ok(Cleanup::default());
        }

        let placeholders = (1..=site_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "DELETE FROM down_sites WHERE site_id NOT IN ({placeholders}) RETURNING {RECORD_COLUMNS}"
        );

        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare cleanup")?;
        let removed = stmt
            .query_map(params_from_iter(site_ids.iter()), Self::row_to_record)
            .context("Failed to remove vanished sites")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect removed sites")?;

        Ok(Cleanup {
            count: removed.len(),
            removed,
        })
    }

    pub fn count_down(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM down_sites", [], |row| row.get(0))
            .context("Failed to count down records")?;
        Ok(count as usize)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<DownRecord, rusqlite::Error> {
        let down_since: String = row.get(5)?;
        let last_checked_at: String = row.get(7)?;

        Ok(DownRecord {
            site_id: row.get(0)?,
            domain: row.get(1)?,
            status: row.get(2)?,
            vps_ip: row.get(3)?,
            address: row.get(4)?,
            down_since: parse_ts(5, &down_since)?,
            last_error: row.get(6)?,
            last_checked_at: parse_ts(7, &last_checked_at)?,
        })
    }
}

/// Fixed-width RFC 3339 so `ORDER BY down_since` sorts chronologically.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_site(id: i64, domain: &str) -> Site {
        Site {
            id,
            domain: domain.to_string(),
            status: Some("active".to_string()),
            vps_ip: Some("10.0.0.1".to_string()),
            address: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_upsert_creates_record() {
        let db = DownDb::open(":memory:").unwrap();
        let site = test_site(1, "a.com");

        assert!(!db.exists(1).unwrap());
        let record = db.upsert_down(&site, "Timeout", t0()).unwrap();

        assert!(db.exists(1).unwrap());
        assert_eq!(record.domain, "a.com");
        assert_eq!(record.down_since, t0());
        assert_eq!(record.last_checked_at, t0());
        assert_eq!(record.last_error.as_deref(), Some("Timeout"));
    }

    #[test]
    fn test_upsert_preserves_down_since() {
        let db = DownDb::open(":memory:").unwrap();
        let site = test_site(1, "a.com");

        db.upsert_down(&site, "Timeout", t0()).unwrap();
        let later = t0() + Duration::minutes(5);
        let record = db.upsert_down(&site, "Database error", later).unwrap();

        assert_eq!(record.down_since, t0());
        assert_eq!(record.last_checked_at, later);
        assert_eq!(record.last_error.as_deref(), Some("Database error"));
        assert_eq!(db.count_down().unwrap(), 1);
    }

    #[test]
    fn test_delete_returns_record() {
        let db = DownDb::open(":memory:").unwrap();
        db.upsert_down(&test_site(1, "a.com"), "Timeout", t0()).unwrap();

        let removed = db.delete_down(1).unwrap().unwrap();
        assert_eq!(removed.down_since, t0());
        assert!(!db.exists(1).unwrap());
        assert!(db.delete_down(1).unwrap().is_none());
    }

    #[test]
    fn test_list_orders_newest_first() {
        let db = DownDb::open(":memory:").unwrap();
        db.upsert_down(&test_site(1, "old.com"), "Timeout", t0()).unwrap();
        db.upsert_down(&test_site(2, "new.com"), "Timeout", t0() + Duration::hours(1))
            .unwrap();

        let all = db.list_all_down().unwrap();
        let domains: Vec<_> = all.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["new.com", "old.com"]);
    }

    #[test]
    fn test_delete_not_in_removes_vanished() {
        let db = DownDb::open(":memory:").unwrap();
        for (id, domain) in [(1, "a.com"), (2, "b.com"), (3, "c.com")] {
            db.upsert_down(&test_site(id, domain), "Timeout", t0()).unwrap();
        }

        let cleanup = db.delete_not_in(&[1, 3, 42]).unwrap();
        assert_eq!(cleanup.count, 1);
        assert_eq!(cleanup.removed[0].domain, "b.com");
        assert_eq!(db.count_down().unwrap(), 2);
    }

    #[test]
    fn test_delete_not_in_empty_is_noop() {
        let db = DownDb::open(":memory:").unwrap();
        db.upsert_down(&test_site(1, "a.com"), "Timeout", t0()).unwrap();

        let cleanup = db.delete_not_in(&[]).unwrap();
        assert_eq!(cleanup, Cleanup::default());
        assert_eq!(db.count_down().unwrap(), 1);
    }
}
