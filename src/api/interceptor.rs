//! Request interceptor: wraps the protected router and turns the engine's
//! decision into pass-through or a redirect.
//!
//! Stateless per request. On any engine failure the request is refused with
//! 503; an unknown confirmation status never grants access.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Redirect, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::api::identity::current_user;
use crate::config::GateConfig;
use crate::hooks::RequestContext;
use crate::policy::{Decision, GateDecisionEngine};

/// Opaque, path-segment-safe encoding of the post-confirmation destination.
pub fn encode_next(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// Decode `next`, falling back to `/` for anything that is not a local
/// absolute path.
pub fn decode_next(encoded: &str) -> String {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|p| p.starts_with('/') && !p.starts_with("//") && !p.contains('\\'))
        .unwrap_or_else(|| "/".to_string())
}

pub fn confirm_url(config: &GateConfig, policy_id: Uuid, next: &str) -> String {
    format!(
        "/{}/confirm/{}/{}",
        config.policy_page_trimmed(),
        policy_id,
        encode_next(next)
    )
}

pub fn second_confirm_url(config: &GateConfig, confirmation_id: Uuid) -> String {
    format!(
        "/{}/second-confirm/{}",
        config.policy_page_trimmed(),
        confirmation_id
    )
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn policy_gate(
    State(engine): State<Arc<GateDecisionEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::new(
        request.method().as_str(),
        request.uri().path(),
        current_user(&request),
    );

    match engine.evaluate(&ctx).await {
        Ok(Decision::Allow) => next.run(request).await,
        Ok(Decision::RedirectToConfirm {
            policy_id,
            next: resume,
        }) => Redirect::to(&confirm_url(engine.config(), policy_id, &resume)).into_response(),
        Ok(Decision::RedirectToSecondConfirm { confirmation_id }) => {
            Redirect::to(&second_confirm_url(engine.config(), confirmation_id)).into_response()
        }
        Err(e) => {
            error!(path = %ctx.path, error = %e, "policy gate could not decide, refusing request");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "policy confirmation status unavailable" })),
            )
                .into_response()
        }
    }
}
