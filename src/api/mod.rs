//! HTTP surface: the gating middleware, the read API and the confirmation
//! endpoints.

pub mod identity;
pub mod interceptor;
pub mod routes;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;

use crate::confirm::ConfirmationService;
use crate::error::GateError;
use crate::policy::GateDecisionEngine;
use crate::ports::PolicyStore;

pub use identity::header_identity;
pub use interceptor::policy_gate;
pub use routes::gate_routes;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GateDecisionEngine>,
    pub service: Arc<ConfirmationService>,
    pub policies: Arc<dyn PolicyStore>,
}

/// Error wrapper mapping `GateError` onto an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        // Storage details stay in the log.
        let message = match &self.0 {
            GateError::LedgerUnavailable(_) => "policy store unavailable".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Wrap `app` with the gate and add the read API and confirmation endpoints
/// next to it, outside the gate.
pub fn protect(app: Router, state: AppState) -> Router {
    let gated = app.layer(middleware::from_fn_with_state(
        Arc::clone(&state.engine),
        policy_gate,
    ));
    gated.merge(gate_routes(state))
}
