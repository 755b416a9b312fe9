use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use duel_core::protocol::{ActiveMatch, AnswerRequest, MatchCreated, PlayerRequest, SubmitOutcome};
use duel_core::{Match, MatchId};

use crate::duel::DEFAULT_ACTIVE_LIMIT;
use crate::error::DuelResult;
use crate::state::AppState;

/// Cap on `?limit=` for the active listing.
const MAX_ACTIVE_LIMIT: i64 = 100;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Matches ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ActiveParams {
    pub limit: Option<i64>,
}

pub async fn active_matches(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActiveParams>,
) -> DuelResult<Json<Vec<ActiveMatch>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_ACTIVE_LIMIT)
        .clamp(1, MAX_ACTIVE_LIMIT);
    let matches = state.duel.active(limit).await?;
    Ok(Json(matches.iter().map(ActiveMatch::from).collect()))
}

pub async fn create_match(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlayerRequest>,
) -> DuelResult<(StatusCode, Json<MatchCreated>)> {
    let match_id = state.duel.create(req.user_id).await?;
    Ok((StatusCode::CREATED, Json(MatchCreated { match_id })))
}

pub async fn get_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<MatchId>,
) -> DuelResult<Json<Match>> {
    Ok(Json(state.duel.get(match_id).await?))
}

/// Join and return the match as it now stands.
pub async fn join_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<MatchId>,
    Json(req): Json<PlayerRequest>,
) -> DuelResult<Json<Match>> {
    state.duel.join(match_id, req.user_id).await?;
    Ok(Json(state.duel.get(match_id).await?))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<MatchId>,
    Json(req): Json<AnswerRequest>,
) -> DuelResult<Json<SubmitOutcome>> {
    let outcome = state
        .duel
        .submit_answer(match_id, req.user_id, &req.answer, req.time_spent)
        .await?;
    Ok(Json(outcome))
}

pub async fn cancel_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<MatchId>,
    Json(req): Json<PlayerRequest>,
) -> DuelResult<StatusCode> {
    state.duel.cancel(match_id, req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
