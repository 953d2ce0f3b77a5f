//! Read API and confirmation endpoints.
//!
//! - `GET  /api/policies`: active policies
//! - `GET  /api/policies/:id`: one active policy
//! - `GET  /{page}/confirm/:policy_id/:next`: policy to confirm
//! - `POST /{page}/confirm/:policy_id/:next`: record confirmation, 303 to next
//! - `GET  /{page}/second-confirm/:confirmation_id`: current one-time token, issued if none is live
//! - `POST /{page}/second-confirm/:confirmation_id`: complete second confirmation
//!
//! The confirmation endpoints sit under the policy page fragment and are
//! therefore never gated themselves.

use axum::{
    extract::{Path, State},
    response::{Json, Redirect},
    routing::get,
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::identity::require_user;
use crate::api::interceptor::decode_next;
use crate::api::{ApiError, AppState};
use crate::error::GateError;
use crate::models::{Confirmation, GateUser, PolicySummary, PolicyVersion};
use crate::ports::PolicyStore;

pub fn gate_routes(state: AppState) -> Router {
    let page = state.engine.config().policy_page_trimmed().to_string();
    Router::new()
        .route("/api/policies", get(list_policies))
        .route("/api/policies/:id", get(get_policy))
        .route(
            &format!("/{page}/confirm/:policy_id/:next"),
            get(confirm_view).post(confirm),
        )
        .route(
            &format!("/{page}/second-confirm/:confirmation_id"),
            get(second_confirm_view).post(second_confirm),
        )
        .with_state(state)
}

async fn list_policies(
    State(state): State<AppState>,
    user: Option<Extension<GateUser>>,
) -> Result<Json<Vec<PolicySummary>>, ApiError> {
    require_user(user)?;
    let policies = state.policies.list_active_policies().await?;
    Ok(Json(policies.iter().map(PolicySummary::from).collect()))
}

async fn get_policy(
    State(state): State<AppState>,
    user: Option<Extension<GateUser>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PolicySummary>, ApiError> {
    require_user(user)?;
    let policy = state
        .policies
        .get_policy(id)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| GateError::NotFound(format!("policy {id}")))?;
    Ok(Json(PolicySummary::from(&policy)))
}

#[derive(Debug, Serialize)]
pub struct ConfirmView {
    pub policy: PolicyVersion,
    pub next: String,
}

async fn confirm_view(
    State(state): State<AppState>,
    user: Option<Extension<GateUser>>,
    Path((policy_id, next)): Path<(Uuid, String)>,
) -> Result<Json<ConfirmView>, ApiError> {
    let user = require_user(user)?;
    let policy = state.service.policy_for(&user, policy_id).await?;
    Ok(Json(ConfirmView {
        policy,
        next: decode_next(&next),
    }))
}

async fn confirm(
    State(state): State<AppState>,
    user: Option<Extension<GateUser>>,
    Path((policy_id, next)): Path<(Uuid, String)>,
) -> Result<Redirect, ApiError> {
    let user = require_user(user)?;
    state.service.confirm(&user, policy_id).await?;
    Ok(Redirect::to(&decode_next(&next)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecondConfirmView {
    pub confirmation_id: Uuid,
    pub policy_id: Uuid,
    pub token: String,
}

async fn second_confirm_view(
    State(state): State<AppState>,
    user: Option<Extension<GateUser>>,
    Path(confirmation_id): Path<Uuid>,
) -> Result<Json<SecondConfirmView>, ApiError> {
    let user = require_user(user)?;
    let (confirmation, token) = state
        .service
        .begin_second_confirmation(&user, confirmation_id)
        .await?;
    Ok(Json(SecondConfirmView {
        confirmation_id: confirmation.id,
        policy_id: confirmation.policy_id,
        token: token.token,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SecondConfirmRequest {
    #[serde(default)]
    pub token: Option<String>,
}

async fn second_confirm(
    State(state): State<AppState>,
    user: Option<Extension<GateUser>>,
    Path(confirmation_id): Path<Uuid>,
    Json(req): Json<SecondConfirmRequest>,
) -> Result<Json<Confirmation>, ApiError> {
    let user = require_user(user)?;
    let confirmation = state
        .service
        .complete_second_confirmation(&user, confirmation_id, req.token.as_deref())
        .await?;
    Ok(Json(confirmation))
}
