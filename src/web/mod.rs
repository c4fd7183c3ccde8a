//! HTTP surface: battle creation and control, archive queries, and the
//! spectator websocket. Thin plumbing over the arena; no turn logic here.

mod ws;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::arena::{Arena, BattleRequest};
use crate::battle::BattleView;
use crate::error::DatabaseError;

/// Agent count bounds enforced at the boundary; the scheduler itself only
/// assumes at least two.
const MIN_AGENTS: usize = 2;
const MAX_AGENTS: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub arena: Arc<Arena>,
}

pub fn router(arena: Arc<Arena>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::spectate))
        .route("/api/battles", post(create_battle).get(list_battles))
        .route("/api/battles/{id}", get(get_battle))
        .route("/api/battles/{id}/pause", post(pause_battle))
        .route("/api/battles/{id}/resume", post(resume_battle))
        .route("/api/archive", get(archive))
        .route("/api/archive/{id}", get(battle_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { arena })
}

async fn health() -> &'static str {
    "ok"
}

async fn create_battle(
    State(state): State<AppState>,
    Json(request): Json<BattleRequest>,
) -> Result<(StatusCode, Json<BattleView>), Response> {
    let count = request.agents.len();
    if !(MIN_AGENTS..=MAX_AGENTS).contains(&count) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": format!("a battle needs {MIN_AGENTS}-{MAX_AGENTS} agents, got {count}") })),
        )
            .into_response());
    }

    let battle = state.arena.create_battle(request).await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response()
    })?;

    battle.start().await;
    Ok((StatusCode::CREATED, Json(battle.view().await)))
}

async fn list_battles(State(state): State<AppState>) -> Json<Vec<BattleView>> {
    Json(state.arena.snapshot().await)
}

async fn get_battle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BattleView>, StatusCode> {
    match state.arena.battle(id).await {
        Some(battle) => Ok(Json(battle.view().await)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn pause_battle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    match state.arena.battle(id).await {
        Some(battle) => {
            battle.pause().await;
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn resume_battle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    match state.arena.battle(id).await {
        Some(battle) => {
            battle.resume().await;
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn archive(State(state): State<AppState>) -> Result<Response, StatusCode> {
    match state.arena.archive().await {
        Ok(records) => Ok(Json(records).into_response()),
        Err(e) => {
            tracing::error!(error = %e, "archive query failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn battle_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, StatusCode> {
    match state.arena.battle_history(id).await {
        Ok((battle, turns)) => Ok(Json(json!({ "battle": battle, "turns": turns })).into_response()),
        Err(DatabaseError::BattleNotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(error = %e, "history query failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
