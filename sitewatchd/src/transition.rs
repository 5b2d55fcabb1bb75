use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::types::{Site, TransitionEvent};
use crate::checker::Verdict;
use crate::store::DownStore;

/// Shown when a recovered site's record vanished before it could be read.
pub const UNKNOWN_DOWNTIME: &str = "unknown";

/// Applies a verdict to the site's persisted state.
/// Store failures are logged and come back as `TransitionEvent::Error`.
pub async fn transition<S>(store: &S, site: &Site, verdict: &Verdict) -> TransitionEvent
where
    S: DownStore + ?Sized,
{
    transition_at(store, site, verdict, Utc::now()).await
}

pub async fn transition_at<S>(
    store: &S,
    site: &Site,
    verdict: &Verdict,
    now: DateTime<Utc>,
) -> TransitionEvent
where
    S: DownStore + ?Sized,
{
    match apply(store, site, verdict, now).await {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(domain = %site.domain, "Failed to record check result: {:#}", e);
            TransitionEvent::Error {
                domain: site.domain.clone(),
                message: format!("{e:#}"),
            }
        }
    }
}

async fn apply<S>(store: &S, site: &Site, verdict: &Verdict, now: DateTime<Utc>) -> Result<TransitionEvent>
where
    S: DownStore + ?Sized,
{
    let domain = site.domain.clone();
    let was_down = store.exists(site.id).await?;

    if !verdict.is_up() {
        let reason = verdict.reason();
        store.upsert_down(site, &reason, now).await?;

        return Ok(if was_down {
            tracing::warn!(domain = %site.domain, %reason, "Still down");
            TransitionEvent::StillDown { domain, reason }
        } else {
            tracing::warn!(
                domain = %site.domain,
                %reason,
                status = ?verdict.status_code,
                response_ms = verdict.response_time_ms,
                diagnostics = ?verdict.diagnostics,
                "Site went down"
            );
            TransitionEvent::NewlyDown { domain, reason }
        });
    }

    if !was_down {
        return Ok(TransitionEvent::Up { domain });
    }

    let downtime = match store.delete_down(site.id).await? {
        Some(record) => downtime_between(record.down_since, now),
        None => {
            tracing::warn!(domain = %site.domain, "Down record disappeared before recovery");
            UNKNOWN_DOWNTIME.to_string()
        }
    };

    tracing::info!(domain = %site.domain, %downtime, "Site recovered");
    Ok(TransitionEvent::Recovered { domain, downtime })
}

pub fn downtime_between(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format_downtime((now - since).num_minutes())
}

/// "M min" under an hour, otherwise "H h M min".
pub fn format_downtime(minutes: i64) -> String {
    let minutes = minutes.max(0);
    let hours = minutes / 60;
    if hours > 0 {
        format!("{hours} h {} min", minutes % 60)
    } else {
        format!("{minutes} min")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use anyhow::bail;
    use chrono::{Duration, TimeZone};
    use shared::types::DownRecord;
    use crate::checker::verdict::{DownReason, TransportFailure, UpNote};
    use crate::store::db::DownDb;
    use crate::store::Cleanup;
    use crate::store_manager::StoreHandle;

    fn site() -> Site {
        Site {
            id: 1,
            domain: "a.com".to_string(),
            status: None,
            vps_ip: Some("10.0.0.1".to_string()),
            address: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn store() -> StoreHandle {
        StoreHandle::spawn(DownDb::open(":memory:").unwrap())
    }

    fn up() -> Verdict {
        Verdict::up(UpNote::Ok, Some(200))
    }

    fn down_503() -> Verdict {
        Verdict::down(DownReason::Transport(TransportFailure::upstream(503)), Some(503))
    }

    #[test]
    fn test_format_downtime() {
        assert_eq!(format_downtime(0), "0 min");
        assert_eq!(format_downtime(10), "10 min");
        assert_eq!(format_downtime(59), "59 min");
        assert_eq!(format_downtime(60), "1 h 0 min");
        assert_eq!(format_downtime(135), "2 h 15 min");
        assert_eq!(format_downtime(-3), "0 min");
    }

    #[tokio::test]
    async fn test_up_without_record_touches_nothing() {
        let store = store();
        let event = transition_at(&store, &site(), &up(), t0()).await;
        assert_eq!(event, TransitionEvent::Up { domain: "a.com".into() });
        assert_eq!(store.count_down().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_down_then_recovered_after_ten_minutes() {
        let store = store();

        let event = transition_at(&store, &site(), &down_503(), t0()).await;
        assert_eq!(
            event,
            TransitionEvent::NewlyDown {
                domain: "a.com".into(),
                reason: "Server error: 503".into()
            }
        );
        let record = &store.list_all_down().await.unwrap()[0];
        assert_eq!(record.down_since, t0());

        let event = transition_at(&store, &site(), &up(), t0() + Duration::minutes(10)).await;
        assert_eq!(
            event,
            TransitionEvent::Recovered {
                domain: "a.com".into(),
                downtime: "10 min".into()
            }
        );
        assert!(!store.exists(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_down_keeps_down_since() {
        let store = store();
        transition_at(&store, &site(), &down_503(), t0()).await;

        let later = t0() + Duration::minutes(5);
        let suspended = Verdict::down(DownReason::AccountSuspended, Some(200));
        let event = transition_at(&store, &site(), &suspended, later).await;
        assert!(matches!(event, TransitionEvent::StillDown { .. }));

        let record = &store.list_all_down().await.unwrap()[0];
        assert_eq!(record.down_since, t0());
        assert_eq!(record.last_checked_at, later);
        assert_eq!(record.last_error.as_deref(), Some("Account suspended"));
    }

    #[tokio::test]
    async fn test_long_outage_reports_hours() {
        let store = store();
        transition_at(&store, &site(), &down_503(), t0()).await;
        let event = transition_at(&store, &site(), &up(), t0() + Duration::minutes(125)).await;
        assert_eq!(
            event,
            TransitionEvent::Recovered {
                domain: "a.com".into(),
                downtime: "2 h 5 min".into()
            }
        );
    }

    #[tokio::test]
    async fn test_new_episode_after_recovery_resets_down_since() {
        let store = store();
        transition_at(&store, &site(), &down_503(), t0()).await;
        transition_at(&store, &site(), &up(), t0() + Duration::minutes(10)).await;

        let second = t0() + Duration::minutes(30);
        let event = transition_at(&store, &site(), &down_503(), second).await;
        assert!(matches!(event, TransitionEvent::NewlyDown { .. }));
        assert_eq!(store.list_all_down().await.unwrap()[0].down_since, second);
    }

    struct BrokenStore;

    #[async_trait]
    impl DownStore for BrokenStore {
        async fn exists(&self, _site_id: i64) -> Result<bool> {
            bail!("database is unreachable")
        }
        async fn upsert_down(&self, _: &Site, _: &str, _: DateTime<Utc>) -> Result<DownRecord> {
            bail!("database is unreachable")
        }
        async fn delete_down(&self, _site_id: i64) -> Result<Option<DownRecord>> {
            bail!("database is unreachable")
        }
        async fn list_all_down(&self) -> Result<Vec<DownRecord>> {
            bail!("database is unreachable")
        }
        async fn delete_not_in(&self, _site_ids: &[i64]) -> Result<Cleanup> {
            bail!("database is unreachable")
        }
        async fn count_down(&self) -> Result<usize> {
            bail!("database is unreachable")
        }
    }

    #[tokio::test]
    async fn test_store_failure_becomes_error_event() {
        let event = transition_at(&BrokenStore, &site(), &down_503(), t0()).await;
        assert_eq!(
            event,
            TransitionEvent::Error {
                domain: "a.com".into(),
                message: "database is unreachable".into()
            }
        );
    }
}
