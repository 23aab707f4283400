// HTTP API for rooms, rankings, and pass-through match data.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use sapna_core::db::StoreError;
use sapna_core::model::{MatchPlayer, NewRoom, Room, RoomPhase, RoomUpdate, Team, UpcomingMatch};
use sapna_core::scoring::RankedTeam;
use sapna_feed::protocol::MiniScorecard;
use sapna_feed::FeedError;

use crate::state::{rank_room, AppState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every failure a handler can report. Rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Room not found")]
    RoomNotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("match feed unavailable: {0}")]
    Feed(#[from] FeedError),

    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RoomNotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Feed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoomNotFound { .. } => ApiError::RoomNotFound,
            e if e.is_deadline_passed() => ApiError::Conflict(e.to_string()),
            e @ StoreError::DuplicateTeamName(_) => ApiError::Conflict(e.to_string()),
            e @ (StoreError::InvalidRoom(_) | StoreError::InvalidTeam(_)) => {
                ApiError::BadRequest(e.to_string())
            }
            StoreError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Internal(e) => error!("request failed: {e:#}"),
            ApiError::Feed(e) => warn!("feed request failed: {e}"),
            _ => {}
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/healthz", get(health))
        .route("/api/rooms", post(create_room).get(list_rooms))
        .route("/api/rooms/:id", get(get_room).put(update_room))
        .route("/api/rooms/:id/add-team", post(add_team))
        .route("/api/rooms/:id/rankings", get(room_rankings))
        .route("/api/match-players", get(match_players))
        .route("/api/scorecard", get(scorecard))
        .route("/api/matches/upcoming", get(upcoming_matches));

    api.layer(
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([header::CONTENT_TYPE])
            .allow_origin(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

async fn health() -> &'static str {
    "ok"
}

async fn create_room(
    State(state): State<AppState>,
    payload: Result<Json<NewRoom>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    let Json(new_room) = payload?;
    let room = state.store.create_room(&new_room)?;
    info!(room_id = %room.id, slug = %room.slug, "room created");
    Ok((StatusCode::CREATED, Json(room)))
}

async fn list_rooms(State(state): State<AppState>) -> ApiResult<Json<Vec<Room>>> {
    Ok(Json(state.store.list_rooms()?))
}

async fn get_room(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Room>> {
    state
        .store
        .get_room(&id)?
        .map(Json)
        .ok_or(ApiError::RoomNotFound)
}

async fn update_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RoomUpdate>, JsonRejection>,
) -> ApiResult<Json<Room>> {
    let Json(update) = payload?;
    let room = state.store.update_room(&id, &update, Utc::now())?;
    info!(room_id = %room.id, teams = room.teams.len(), "room updated");
    Ok(Json(room))
}

async fn add_team(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Team>, JsonRejection>,
) -> ApiResult<Json<Room>> {
    let Json(team) = payload?;
    let room = state.store.add_team(&id, &team, Utc::now())?;
    info!(room_id = %room.id, team = %team.name, "team added");
    Ok(Json(room))
}

// ---------------------------------------------------------------------------
// Rankings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingsResponse {
    pub room_id: String,
    pub slug: String,
    pub phase: RoomPhase,
    /// When the leaderboard behind these scores was fetched; `None` until the
    /// first successful fetch for the match.
    pub refreshed_at: Option<DateTime<Utc>>,
    pub rankings: Vec<RankedTeam>,
}

async fn room_rankings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RankingsResponse>> {
    let room = state.store.get_room(&id)?.ok_or(ApiError::RoomNotFound)?;
    let snapshot = state
        .pollers
        .snapshot_for(&room.slug, state.snapshot_wait)
        .await;

    Ok(Json(RankingsResponse {
        rankings: rank_room(&room, snapshot.as_deref()),
        refreshed_at: snapshot.map(|s| s.refreshed_at),
        phase: room.phase(Utc::now()),
        room_id: room.id,
        slug: room.slug,
    }))
}

// ---------------------------------------------------------------------------
// Match data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SlugQuery {
    slug: Option<String>,
}

impl SlugQuery {
    fn require(self) -> ApiResult<String> {
        match self.slug {
            Some(slug) if !slug.trim().is_empty() => Ok(slug),
            _ => Err(ApiError::BadRequest("Slug is required".into())),
        }
    }
}

async fn match_players(
    State(state): State<AppState>,
    Query(query): Query<SlugQuery>,
) -> ApiResult<Json<Vec<MatchPlayer>>> {
    let slug = query.require()?;
    Ok(Json(state.feed.fetch_match_players(&slug).await?))
}

async fn scorecard(
    State(state): State<AppState>,
    Query(query): Query<SlugQuery>,
) -> ApiResult<Json<MiniScorecard>> {
    let slug = query.require()?;
    Ok(Json(state.feed.fetch_scorecard(&slug).await?))
}

async fn upcoming_matches(State(state): State<AppState>) -> ApiResult<Json<Vec<UpcomingMatch>>> {
    Ok(Json(state.feed.fetch_upcoming_matches().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use sapna_core::model::{RoomError, TeamError};

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::RoomNotFound { id: "x".into() }, StatusCode::NOT_FOUND),
            (StoreError::InvalidRoom(RoomError::EmptySlug), StatusCode::BAD_REQUEST),
            (StoreError::InvalidTeam(TeamError::EmptyName), StatusCode::BAD_REQUEST),
            (
                StoreError::InvalidTeam(TeamError::DeadlinePassed { deadline: Utc::now() }),
                StatusCode::CONFLICT,
            ),
            (StoreError::DuplicateTeamName("Kiwis".into()), StatusCode::CONFLICT),
            (StoreError::Other(anyhow!("disk full")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::Internal(anyhow!("sqlite says no"));
        assert_eq!(err.to_string(), "internal server error");
    }

    #[test]
    fn blank_slug_is_rejected() {
        let query = SlugQuery {
            slug: Some("  ".into()),
        };
        assert!(matches!(query.require(), Err(ApiError::BadRequest(msg)) if msg == "Slug is required"));
        assert!(SlugQuery { slug: None }.require().is_err());
    }
}
