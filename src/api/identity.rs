//! Authenticated identity at the HTTP boundary.
//!
//! Authentication belongs to the host application: its auth layer puts a
//! `GateUser` into the request extensions. Requests without one are treated as
//! anonymous and are never gated.

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
    Extension,
};

use crate::error::GateError;
use crate::models::GateUser;

pub const USER_HEADER: &str = "x-gate-user";
pub const GROUPS_HEADER: &str = "x-gate-groups";

pub fn current_user(request: &Request) -> Option<GateUser> {
    request.extensions().get::<GateUser>().cloned()
}

pub fn require_user(user: Option<Extension<GateUser>>) -> Result<GateUser, GateError> {
    user.map(|Extension(u)| u).ok_or(GateError::Unauthenticated)
}

/// Identity from trusted proxy headers. Only for deployments where a
/// fronting proxy has already authenticated the caller and strips these
/// headers from client input.
pub fn user_from_headers(headers: &HeaderMap) -> Option<GateUser> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let groups: Vec<String> = headers
        .get(GROUPS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|g| {
            g.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    Some(GateUser::new(user_id).with_groups(groups))
}

/// Middleware inserting the header identity into request extensions.
pub async fn header_identity(mut request: Request, next: Next) -> Response {
    if let Some(user) = user_from_headers(request.headers()) {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}
