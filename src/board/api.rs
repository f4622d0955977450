use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::access;
use super::audit;
use super::db::DbHandle;
#[cfg(test)]
use super::db::BoardDb;
use super::models::*;
use super::notify;
use super::reorder::{self, ColumnOrder};
use super::repo;
use super::transfer::{self, CloneOptions};
use super::ws::{BoardEvent, WsMessage, broadcast_message};
use crate::config::QuadroConfig;
use crate::errors::EngineError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<BoardEvent>,
    pub config: QuadroConfig,
}

pub type SharedState = Arc<AppState>;

// ── Caller identity ───────────────────────────────────────────────────

/// The authenticated caller, as forwarded by the upstream gateway in
/// `x-user-id`. Role and company come from the stored user row, so other
/// identity headers cannot widen access.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(EngineError::Unauthorized)?;

        tracing::debug!(user_id, "request actor");
        Ok(Actor { user_id })
    }
}

// ── Extractors ────────────────────────────────────────────────────────
//
// Wrappers over axum's `Json`, `Query` and `Path` whose rejections go
// through `ApiError`, so malformed input still gets the JSON envelope.

pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection).into()),
        }
    }
}

pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => {
                let (field, detail) = split_detail(&rejection.body_text());
                Err(EngineError::validation(field.unwrap_or_else(|| "query".into()), detail).into())
            }
        }
    }
}

pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(EngineError::BadRequest(rejection.body_text()).into()),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> EngineError {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            let (field, detail) = split_detail(&e.body_text());
            EngineError::validation(field.unwrap_or_else(|| "body".into()), detail)
        }
        other => EngineError::BadRequest(other.body_text()),
    }
}

/// Split an axum deserialization message into the offending field (when
/// serde names one) and the detail after axum's "Failed to ...: " prefix.
fn split_detail(text: &str) -> (Option<String>, String) {
    let detail = text
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(text)
        .to_string();
    if let Some(rest) = detail.split("missing field `").nth(1) {
        let field = rest.split('`').next().map(str::to_string);
        return (field, detail);
    }
    let field = detail
        .split_once(": ")
        .map(|(path, _)| path)
        .filter(|path| !path.is_empty() && *path != "." && !path.contains(' '))
        .map(str::to_string);
    (field, detail)
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCardRequest {
    pub column_id: String,
    pub order: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReorderColumnsRequest {
    pub columns: Vec<ColumnOrder>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRequest {
    pub new_owner_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBoardRequest {
    pub target_project_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTransferRequest {
    pub target_board_id: String,
    pub target_column_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateColumnRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsQuery {
    pub entity_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
}

// ── Envelope ──────────────────────────────────────────────────────────

/// `{ success: true, data }`. `data` is omitted for bodiless successes.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
    })
}

fn empty() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        data: None,
    })
}

// ── Error handling ────────────────────────────────────────────────────

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::Database(_) | EngineError::LockPoisoned | EngineError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            EngineError::Validation { field, message } => serde_json::json!({
                "success": false,
                "message": message,
                "field": field,
            }),
            e if e.is_client_error() => serde_json::json!({
                "success": false,
                "message": e.to_string(),
            }),
            e => {
                tracing::error!(error = %e, "request failed");
                serde_json::json!({
                    "success": false,
                    "message": "Internal server error",
                })
            }
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/projects/{projectId}/boards/{boardId}", get(get_board_view))
        .route(
            "/projects/{projectId}/boards/{boardId}/columns",
            post(create_column),
        )
        .route(
            "/projects/{projectId}/boards/{boardId}/columns/order",
            patch(reorder_columns),
        )
        .route(
            "/projects/{projectId}/boards/{boardId}/columns/{columnId}",
            axum::routing::delete(delete_column),
        )
        .route(
            "/projects/{projectId}/boards/{boardId}/columns/{columnId}/cards",
            post(create_card),
        )
        .route(
            "/projects/{projectId}/boards/{boardId}/cards/{cardId}",
            axum::routing::delete(delete_card),
        )
        .route(
            "/projects/{projectId}/boards/{boardId}/cards/{cardId}/move",
            patch(move_card),
        )
        .route("/transfers/projects/{id}/ownership", put(transfer_ownership))
        .route("/transfers/boards/{id}/move", put(transfer_board))
        .route("/transfers/cards/{id}/move", put(transfer_card))
        .route("/transfers/cards/{id}/clone", post(clone_card))
        .route("/transfers/history", get(transfer_history))
        .route(
            "/transfers/history/{entityType}/{entityId}",
            get(entity_history),
        )
        .route("/transfers/targets", get(transfer_targets))
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}/read", patch(mark_notification_read))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Resolve a board addressed under a project and check the caller can reach it.
fn board_in_project(
    conn: &Connection,
    user_id: &str,
    project_id: &str,
    board_id: &str,
) -> Result<BoardAncestry, EngineError> {
    let ancestry = repo::get_board_ancestry(conn, board_id)?;
    if ancestry.project.id != project_id {
        return Err(EngineError::not_found("Board", board_id));
    }
    access::require_access(conn, user_id, &ancestry.project)?;
    Ok(ancestry)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_board_view(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id)): ApiPath<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board_id)?;
            db.get_board_view(&board_id)
        })
        .await?;
    Ok(ok(view))
}

async fn create_column(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<CreateColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(EngineError::validation("title", "must not be empty").into());
    }
    let column = state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board_id)?;
            db.create_column(&board_id, &title)
        })
        .await?;
    Ok((StatusCode::CREATED, ok(column)))
}

async fn delete_column(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id, column_id)): ApiPath<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board_id)?;
            let column = repo::get_column(db.conn(), &column_id)?;
            if column.board_id != board_id {
                return Err(EngineError::not_found("Column", &column_id));
            }
            db.delete_column(&column_id)
        })
        .await?;
    Ok(empty())
}

async fn create_card(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id, column_id)): ApiPath<(String, String, String)>,
    ApiJson(input): ApiJson<NewCard>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = project_id.clone();
    let card = state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board_id)?;
            let column = repo::get_column(db.conn(), &column_id)?;
            if column.board_id != board_id {
                return Err(EngineError::not_found("Column", &column_id));
            }
            db.create_card(&column_id, Some(&actor.user_id), &input)
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CardCreated {
            project_id: scope,
            card: card.clone(),
        },
    );
    Ok((StatusCode::CREATED, ok(card)))
}

async fn delete_card(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id, card_id)): ApiPath<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = project_id.clone();
    let card = state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board_id)?;
            let card = repo::get_card(db.conn(), &card_id)?;
            if card.board_id != board_id {
                return Err(EngineError::not_found("Card", &card_id));
            }
            db.delete_card(&card_id)
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CardDeleted {
            project_id: scope,
            card_id: card.id,
            column_id: card.column_id,
        },
    );
    Ok(empty())
}

async fn move_card(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id, card_id)): ApiPath<(String, String, String)>,
    ApiJson(req): ApiJson<MoveCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target_index = match req.order {
        Some(order) => Some(
            usize::try_from(order)
                .map_err(|_| EngineError::validation("order", "must not be negative"))?,
        ),
        None => None,
    };
    let column_id = req.column_id;
    let scope = project_id.clone();

    let (card, from_column_id) = state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board_id)?;
            let before = repo::get_card(db.conn(), &card_id)?;
            let moved = reorder::move_card(
                db,
                &actor.user_id,
                &board_id,
                &card_id,
                &column_id,
                target_index,
            )?;
            Ok((moved, before.column_id))
        })
        .await?;

    broadcast_message(
        &state.ws_tx,
        &WsMessage::CardMoved {
            project_id: scope,
            card: card.clone(),
            from_column_id,
        },
    );
    Ok(ok(card))
}

async fn reorder_columns(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((project_id, board_id)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<ReorderColumnsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = reorder::ordered_ids(&req.columns);
    let board = board_id.clone();
    let scope = project_id.clone();
    let columns = state
        .db
        .call(move |db| {
            board_in_project(db.conn(), &actor.user_id, &project_id, &board)?;
            reorder::reorder_columns(db, &actor.user_id, &board, &requested)
        })
        .await?;

    broadcast_message(
        &state.ws_tx,
        &WsMessage::ColumnsReordered {
            project_id: scope,
            board_id,
            column_ids: columns.into_iter().map(|c| c.id).collect(),
        },
    );
    Ok(empty())
}

async fn transfer_ownership(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath(project_id): ApiPath<String>,
    ApiJson(req): ApiJson<OwnershipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| {
            transfer::transfer_project_ownership(db, &actor.user_id, &project_id, &req.new_owner_id)
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::OwnershipTransferred {
            project_id: project.id.clone(),
            new_owner_id: project.owner_user_id.clone(),
        },
    );
    Ok(ok(project))
}

async fn transfer_board(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath(board_id): ApiPath<String>,
    ApiJson(req): ApiJson<MoveBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (board, from_project_id) = state
        .db
        .call(move |db| {
            let before = repo::get_board(db.conn(), &board_id)?;
            let moved = transfer::move_board(db, &actor.user_id, &board_id, &req.target_project_id)?;
            Ok((moved, before.project_id))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::BoardMoved {
            project_id: board.project_id.clone(),
            board: board.clone(),
            from_project_id,
        },
    );
    Ok(ok(board))
}

async fn transfer_card(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath(card_id): ApiPath<String>,
    ApiJson(req): ApiJson<CardTransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (card, before, project_id) = state
        .db
        .call(move |db| {
            let before = repo::get_card_ancestry(db.conn(), &card_id)?;
            let moved = transfer::move_card(
                db,
                &actor.user_id,
                &card_id,
                &req.target_board_id,
                req.target_column_id.as_deref(),
            )?;
            let project_id = repo::get_board(db.conn(), &moved.board_id)?.project_id;
            Ok((moved, before, project_id))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CardTransferred {
            project_id,
            card: card.clone(),
            from_board_id: before.board.id,
            from_project_id: before.project.id,
        },
    );
    Ok(ok(card))
}

async fn clone_card(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath(card_id): ApiPath<String>,
    ApiJson(req): ApiJson<CardTransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let options = CloneOptions {
        copy_tags: state.config.transfers.copy_tags_on_clone,
    };
    let source_card_id = card_id.clone();
    let (card, project_id) = state
        .db
        .call(move |db| {
            let clone = transfer::clone_card(
                db,
                &actor.user_id,
                &card_id,
                &req.target_board_id,
                req.target_column_id.as_deref(),
                options,
            )?;
            let project_id = repo::get_board(db.conn(), &clone.board_id)?.project_id;
            Ok((clone, project_id))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CardCloned {
            project_id,
            card: card.clone(),
            source_card_id,
        },
    );
    Ok((StatusCode::CREATED, ok(card)))
}

async fn transfer_history(
    State(state): State<SharedState>,
    actor: Actor,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.config.transfers.clamp_limit(query.limit);
    let offset = query.offset.unwrap_or(0);
    let logs = state
        .db
        .call(move |db| audit::history_for_user(db.conn(), &actor.user_id, limit, offset))
        .await?;
    Ok(ok(logs))
}

async fn entity_history(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath((entity_type, entity_id)): ApiPath<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let entity_type = EntityType::from_str(&entity_type)
        .map_err(|e| EngineError::validation("entityType", e))?;
    let logs = state
        .db
        .call(move |db| {
            let mut visible = Vec::new();
            for log in audit::history_for_entity(db.conn(), entity_type, &entity_id)? {
                if access::can_view_log(db.conn(), &actor.user_id, &log)? {
                    visible.push(log);
                }
            }
            Ok(visible)
        })
        .await?;
    Ok(ok(logs))
}

async fn transfer_targets(
    State(state): State<SharedState>,
    actor: Actor,
    ApiQuery(query): ApiQuery<TargetsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entity_type = EntityType::from_str(&query.entity_type)
        .map_err(|e| EngineError::validation("entityType", e))?;
    let targets = state
        .db
        .call(move |db| transfer::list_targets(db, &actor.user_id, entity_type))
        .await?;
    Ok(ok(targets))
}

async fn list_notifications(
    State(state): State<SharedState>,
    actor: Actor,
    ApiQuery(query): ApiQuery<NotificationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = state
        .db
        .call(move |db| notify::list_notifications(db.conn(), &actor.user_id, query.unread_only))
        .await?;
    Ok(ok(notifications))
}

async fn mark_notification_read(
    State(state): State<SharedState>,
    actor: Actor,
    ApiPath(id): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| notify::mark_read(db.conn(), &id, &actor.user_id))
        .await?;
    Ok(empty())
}

// ── Tests ─────────────────────────────────────────────────────────────
