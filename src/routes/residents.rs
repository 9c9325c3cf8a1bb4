use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AdminUser;
use crate::models::resident::{
    CheckQuery, CheckResponse, ResidentResponse, ResidentUpsertRequest, SessionResponse, Town, TownUpsertRequest,
};
use crate::perms::{AttachmentRecord, PrincipalDirectory, SessionId};

/// Create or relink a town. Everyone living there is re-applied, since
/// the nation groups may now (not) apply to them.
pub async fn upsert_town(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(name): Path<String>,
    Json(payload): Json<TownUpsertRequest>,
) -> AppResult<Json<Town>> {
    let nation = payload.nation.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let town = state.directory.upsert_town(name.trim(), nation).await?;

    let applied = state.service.update_town(&town.name).await?;
    tracing::info!(town = %town.name, nation = ?town.nation, applied, "town updated");
    Ok(Json(town))
}

pub async fn upsert_resident(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResidentUpsertRequest>,
) -> AppResult<Json<ResidentResponse>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    state.directory.upsert_resident(id, &payload).await?;
    let (resident, attached) = state
        .service
        .reassign(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("resident {id} not found")))?;
    Ok(Json(ResidentResponse { resident, attached }))
}

pub async fn start_session(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionResponse>> {
    let resident = state
        .directory
        .principal(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("resident {id} not found")))?;

    let session = SessionId::new();
    if !state.directory.set_session(id, Some(session)).await? {
        return Err(AppError::not_found(format!("resident {id} not found")));
    }
    if let Some(previous) = resident.session {
        state.backend.end_session(previous);
        tracing::debug!(principal_id = %id, session = %previous.0, "replaced previous session");
    }

    let attached = state.service.session_started(id).await?;
    Ok(Json(SessionResponse { principal_id: id, session: Some(session), attached }))
}

pub async fn end_session(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionResponse>> {
    let resident = state
        .directory
        .principal(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("resident {id} not found")))?;

    state.directory.set_session(id, None).await?;
    state.service.session_ended(id).await;
    if let Some(session) = resident.session {
        state.backend.end_session(session);
    }

    Ok(Json(SessionResponse { principal_id: id, session: resident.session, attached: false }))
}

pub async fn attachment(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AttachmentRecord>> {
    state
        .service
        .cache()
        .record(id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no attachment for resident {id}")))
}

pub async fn check_session(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(session_id): Path<Uuid>,
    Query(query): Query<CheckQuery>,
) -> AppResult<Json<CheckResponse>> {
    let session = SessionId(session_id);
    let granted = state.backend.has_permission(session, &query.node);
    Ok(Json(CheckResponse { session, node: query.node, granted }))
}
