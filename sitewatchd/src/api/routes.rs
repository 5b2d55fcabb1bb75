use std::sync::Arc;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::protocol::{PATH_CHECK, PATH_DOWN, PATH_HEALTH, PATH_SERVERS};
use shared::types::{CycleReport, DownRecord, ServerGroup};
use crate::correlator;
use crate::monitor::{CycleError, Monitor};
use crate::transition;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

type ApiError = (StatusCode, String);

#[derive(Serialize)]
pub struct DownView {
    #[serde(flatten)]
    pub record: DownRecord,
    pub downtime: String,
}

#[derive(Serialize)]
pub struct ServerGroupView {
    #[serde(flatten)]
    pub group: ServerGroup,
    pub earliest_down: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cycle_running: bool,
    pub down_sites: usize,
}

#[derive(Deserialize)]
pub struct ServersQuery {
    pub min: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_CHECK, post(check_now))
        .route(PATH_DOWN, get(get_down))
        .route(PATH_SERVERS, get(get_servers))
        .route(PATH_HEALTH, get(get_health))
        .with_state(state)
}

async fn check_now(State(state): State<AppState>) -> Result<Json<CycleReport>, ApiError> {
    state.monitor.run_check_now().await.map(Json).map_err(|e| {
        let status = match e {
            CycleError::AlreadyRunning => StatusCode::CONFLICT,
            CycleError::Inventory(_) | CycleError::EmptyInventory => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!("Manual check rejected: {}", e);
        (status, e.to_string())
    })
}

async fn get_down(State(state): State<AppState>) -> Result<Json<Vec<DownView>>, ApiError> {
    let records = state.monitor.query_currently_down().await.map_err(internal)?;
    let now = Utc::now();

    Ok(Json(
        records
            .into_iter()
            .map(|record| DownView {
                downtime: transition::downtime_between(record.down_since, now),
                record,
            })
            .collect(),
    ))
}

async fn get_servers(
    State(state): State<AppState>,
    Query(params): Query<ServersQuery>,
) -> Result<Json<Vec<ServerGroupView>>, ApiError> {
    let min = params
        .min
        .unwrap_or(state.monitor.settings().min_group_size)
        .max(1);
    let groups = state.monitor.query_outage_groups(min).await.map_err(internal)?;
    let now = Utc::now();

    Ok(Json(
        groups
            .into_iter()
            .map(|group| ServerGroupView {
                earliest_down: correlator::earliest_down_age(&group, now),
                group,
            })
            .collect(),
    ))
}

async fn get_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let down_sites = state.monitor.count_down().await.map_err(internal)?;

    Ok(Json(HealthResponse {
        status: "ok",
        cycle_running: state.monitor.is_running(),
        down_sites,
    }))
}

fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!("Store query failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "store unavailable".to_string())
}
