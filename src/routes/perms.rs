use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AdminUser;
use crate::models::policy::{
    EffectivePermissions, GroupList, GroupNodes, NodeRequest, PolicyChange, RankList, RankRequest, RankResponse,
    RefreshResponse,
};
use crate::perms::RankScope;

fn record(state: &AppState, admin: &AdminUser, action: &str, target: &str, detail: Option<String>) {
    let change = PolicyChange::new(target, detail, state.service.store().fingerprint());
    log_activity(&state.event_bus, action, Some(&admin.subject), &change);
}

pub async fn list_groups(State(state): State<AppState>, _admin: AdminUser) -> AppResult<Json<GroupList>> {
    let store = state.service.store();
    Ok(Json(GroupList { fingerprint: store.fingerprint(), groups: store.group_names() }))
}

pub async fn group_nodes(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(group): Path<String>,
) -> AppResult<Json<GroupNodes>> {
    let store = state.service.store();
    if !store.has_group(&group) {
        return Err(AppError::not_found(format!("group not found: {group}")));
    }
    let nodes = store.group_nodes(&group);
    Ok(Json(GroupNodes { group, nodes }))
}

pub async fn add_node(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(group): Path<String>,
    Json(payload): Json<NodeRequest>,
) -> AppResult<(StatusCode, Json<RefreshResponse>)> {
    let node = payload.node.trim();
    if node.is_empty() {
        return Err(AppError::bad_request("node must not be empty"));
    }

    let applied = state.service.add_node(&group, node).await?;
    record(&state, &admin, "node_added", &group, Some(node.to_string()));

    let fingerprint = state.service.store().fingerprint();
    Ok((StatusCode::CREATED, Json(RefreshResponse { applied, fingerprint })))
}

pub async fn remove_node(
    State(state): State<AppState>,
    admin: AdminUser,
    Path((group, node)): Path<(String, String)>,
) -> AppResult<Json<RefreshResponse>> {
    let applied = state.service.remove_node(&group, &node).await?;
    record(&state, &admin, "node_removed", &group, Some(node));

    let fingerprint = state.service.store().fingerprint();
    Ok(Json(RefreshResponse { applied, fingerprint }))
}

pub async fn list_ranks(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(scope): Path<String>,
) -> AppResult<Json<RankList>> {
    let scope: RankScope = scope.parse()?;
    let ranks = state.service.ranks().ranks(scope);
    Ok(Json(RankList { scope, ranks }))
}

pub async fn create_rank(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(scope): Path<String>,
    Json(payload): Json<RankRequest>,
) -> AppResult<(StatusCode, Json<RankResponse>)> {
    let scope: RankScope = scope.parse()?;
    let name = state.service.create_rank(scope, &payload.name).await?;
    record(&state, &admin, "rank_created", &scope.rank_group(&name), None);

    Ok((StatusCode::CREATED, Json(RankResponse { scope, name })))
}

pub async fn delete_rank(
    State(state): State<AppState>,
    admin: AdminUser,
    Path((scope, name)): Path<(String, String)>,
) -> AppResult<Json<RankResponse>> {
    let scope: RankScope = scope.parse()?;
    let name = state.service.delete_rank(scope, &name).await?;
    record(&state, &admin, "rank_deleted", &scope.rank_group(&name), None);

    Ok(Json(RankResponse { scope, name }))
}

pub async fn reload(State(state): State<AppState>, admin: AdminUser) -> AppResult<Json<RefreshResponse>> {
    let source = state.service.store().source().to_string();
    match state.service.reload().await {
        Ok(applied) => {
            record(&state, &admin, "reloaded", &source, None);
            let fingerprint = state.service.store().fingerprint();
            Ok(Json(RefreshResponse { applied, fingerprint }))
        }
        Err(err) => {
            record(&state, &admin, "reload_failed", &source, Some(err.to_string()));
            Err(err.into())
        }
    }
}

pub async fn effective_permissions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    let permissions = state
        .service
        .effective_permissions(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("resident {id} not found")))?;

    Ok(Json(EffectivePermissions { principal_id: id, permissions }))
}
