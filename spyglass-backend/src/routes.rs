use crate::AppState;
use crate::error::AppError;
use crate::helpers::now;
use crate::perf::PerfSample;
use crate::validation;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use axum_macros::debug_handler;
use serde::{Deserialize, Serialize};
use spyglass_db::{SessionFilter, SessionPage, SessionRecord, SessionStats};
use std::sync::Arc;

const MAX_PAGE_SIZE: u32 = 200;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionsQuery {
    page: Option<u32>,
    limit: Option<u32>,
    player_name: Option<String>,
    start_after: Option<i64>,
    start_before: Option<i64>,
    active_only: Option<bool>,
}

#[derive(Deserialize)]
pub(crate) struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsQuery {
    days: Option<u32>,
    player_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ActiveSessionsResponse {
    active_sessions: Vec<SessionRecord>,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlayerHistoryResponse {
    player_name: String,
    #[serde(flatten)]
    page: SessionPage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsResponse {
    period: String,
    player_name: String,
    stats: SessionStats,
}

#[derive(Serialize)]
pub(crate) struct PerformanceResponse {
    current: Option<PerfSample>,
    history: Vec<PerfSample>,
}

#[debug_handler]
pub(crate) async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = SessionFilter {
        player_name: query.player_name,
        start_after: query.start_after,
        start_before: query.start_before,
        active_only: query.active_only.unwrap_or(false),
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(50).min(MAX_PAGE_SIZE),
    };

    let page = state.db.list_sessions(filter).await?;
    Ok(Json(page))
}

#[debug_handler]
pub(crate) async fn active_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let ts = now();
    let mut sessions = state.db.active_sessions().await?;
    // Live duration for open sessions: time since start
    for session in &mut sessions {
        session.duration = Some(ts - session.session_start);
    }

    Ok(Json(ActiveSessionsResponse {
        count: sessions.len(),
        active_sessions: sessions,
    }))
}

pub(crate) async fn player_history(
    State(state): State<Arc<AppState>>,
    Path(player_name): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_player_name(&player_name)?;

    let page = state
        .db
        .player_sessions(
            player_name.clone(),
            query.page.unwrap_or(1),
            query.limit.unwrap_or(50).min(MAX_PAGE_SIZE),
        )
        .await?;

    Ok(Json(PlayerHistoryResponse { player_name, page }))
}

pub(crate) async fn session_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let days = query.days.unwrap_or(30);
    let since = now() - days as i64 * 86400;

    let stats = state.db.session_stats(since, query.player_name.clone()).await?;

    Ok(Json(StatsResponse {
        period: format!("{} days", days),
        player_name: query.player_name.unwrap_or_else(|| "all players".to_string()),
        stats,
    }))
}

pub(crate) async fn performance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(PerformanceResponse {
        current: state.perf.latest(),
        history: state.perf.history(),
    }))
}

pub(crate) async fn cache_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.skills_cache.stats().await))
}
