//! Session projection and logout.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use chrono::Utc;
use std::sync::Arc;

use super::state::AuthState;
use super::types::SessionResponse;
use crate::session::extract_token;

/// Current member derived from the verified session cookie.
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Missing, forged and expired tokens all read as "no session".
    let claims = extract_token(&headers)
        .and_then(|token| auth_state.tokens().verify(&token, Utc::now()).ok());
    let Some(claims) = claims else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let Some(expires_at) = claims.expires_at() else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let response = SessionResponse {
        identity: claims.sub,
        role: claims.role,
        display_name: claims.name,
        expires_at,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Always clear, even without a session.
    let mut headers = HeaderMap::new();
    for cookie in auth_state.cookies().clear() {
        headers.append(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}
