use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::accounts::{AccountService, ApprovalRequest, UserUpdateRequest};

use super::{auth::AuthService, utils::authenticate};

type UserState = (Arc<AuthService>, Arc<AccountService>);

async fn get_user(
    headers: HeaderMap,
    State((service, accounts)): State<UserState>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    match accounts.profile(&actor, actor.id).await {
        Ok(profile) => {
            tracing::info!("User found: {}", actor.id);
            Ok(Json(profile))
        }
        Err(err) => {
            tracing::error!("Failed to load profile of {}: {err}", actor.id);
            Err(err)
        }
    }
}

async fn get_user_by_id(
    headers: HeaderMap,
    State((service, accounts)): State<UserState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let profile = accounts.profile(&actor, user_id).await?;
    Ok(Json(profile))
}

async fn update_user(
    headers: HeaderMap,
    State((service, accounts)): State<UserState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UserUpdateRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let user = accounts.update_user(&actor, user_id, request).await?;
    Ok(Json(user))
}

async fn approve_user(
    headers: HeaderMap,
    State((service, accounts)): State<UserState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ApprovalRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let profile = accounts.approve_user(&actor, user_id, request).await?;
    Ok(Json(profile))
}

async fn delete_user(
    headers: HeaderMap,
    State((service, accounts)): State<UserState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let detached = accounts.delete_user(&actor, user_id).await?;
    Ok(Json(detached))
}

pub fn user_routes(service: Arc<AuthService>, accounts: Arc<AccountService>) -> Router {
    Router::new()
        .route("/users/me", get(get_user))
        .route("/users/:id/approve", put(approve_user))
        .route("/users/:id", get(get_user_by_id).put(update_user).delete(delete_user))
        .with_state((service, accounts))
}
