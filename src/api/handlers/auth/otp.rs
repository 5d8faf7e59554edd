//! Passcode request and verification endpoints.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use super::state::AuthState;
use super::types::{MemberResponse, OtpIssuedResponse, OtpRequest, OtpVerifyRequest};
use super::utils::{normalize_email, valid_email};
use crate::directory::Member;
use crate::error::AuthError;
use crate::otp::{Purpose, code::well_formed};

const REJECTED_CODE: &str = "Invalid or expired code";

/// Send a one-time passcode to a member's email.
///
/// Unknown identities asking to log in or reset spend the same hourly slot and
/// get the same `202` without a challenge being created.
#[utoipa::path(
    post,
    path = "/v1/auth/otp",
    request_body = OtpRequest,
    responses(
        (status = 202, description = "Passcode dispatched", body = OtpIssuedResponse),
        (status = 400, description = "Invalid identity or purpose", body = String),
        (status = 429, description = "Too many passcodes requested", body = String)
    ),
    tag = "auth"
)]
pub async fn request_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<OtpRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Invalid request".to_string()).into_response();
    };

    let identity = normalize_email(&request.identity);
    if !valid_email(&identity) {
        return (StatusCode::BAD_REQUEST, "Invalid identity".to_string()).into_response();
    }

    let now = Utc::now();
    // Every purpose spends an hourly slot before membership is known.
    if let Err(err) = auth_state.otp().admit(&identity, request.purpose, now).await {
        return issue_failure(&err);
    }

    if request.purpose != Purpose::Register {
        match auth_state.directory().find_member(&identity).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(purpose = %request.purpose, "otp requested for unknown identity");
                let response = OtpIssuedResponse {
                    expires_at: now + auth_state.otp().code_ttl(),
                };
                return (StatusCode::ACCEPTED, Json(response)).into_response();
            }
            Err(err) => {
                error!("Failed to lookup member: {err:#}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Passcode request failed".to_string(),
                )
                    .into_response();
            }
        }
    }

    match auth_state
        .otp()
        .issue_admitted(&identity, request.purpose, now)
        .await
    {
        Ok(issued) => {
            let response = OtpIssuedResponse {
                expires_at: issued.expires_at,
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        }
        Err(err) => issue_failure(&err),
    }
}

fn issue_failure(err: &AuthError) -> Response {
    if matches!(err, AuthError::RateLimited) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many passcode requests, try again later".to_string(),
        )
            .into_response();
    }
    error!("Failed to issue otp: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Passcode request failed".to_string(),
    )
        .into_response()
}

/// Verify a passcode and open a session.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Session established", body = MemberResponse),
        (status = 400, description = "Invalid request", body = String),
        (status = 401, description = "Invalid or expired code", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<OtpVerifyRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Invalid request".to_string()).into_response();
    };

    let identity = normalize_email(&request.identity);
    if !valid_email(&identity) {
        return (StatusCode::BAD_REQUEST, "Invalid identity".to_string()).into_response();
    }
    if !well_formed(&request.code) {
        return (StatusCode::UNAUTHORIZED, REJECTED_CODE.to_string()).into_response();
    }

    let now = Utc::now();
    let authenticated = match auth_state
        .otp()
        .verify(&identity, request.purpose, &request.code, now)
        .await
    {
        Ok(authenticated) => authenticated,
        Err(err) if err.is_challenge_rejection() => {
            info!(purpose = %request.purpose, "otp rejected: {err}");
            return (StatusCode::UNAUTHORIZED, REJECTED_CODE.to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to verify otp: {err:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    let member = match resolve_member(&auth_state, &authenticated.identity, authenticated.purpose)
        .await
    {
        Ok(Some(member)) => member,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, REJECTED_CODE.to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to resolve member: {err:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    let token = match auth_state
        .tokens()
        .mint(&member.identity, member.role, &member.display_name, now)
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to mint session token: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    let mut headers = HeaderMap::new();
    match auth_state.cookies().establish(&token, member.role) {
        Ok(cookies) => {
            for cookie in cookies {
                headers.append(SET_COOKIE, cookie);
            }
        }
        Err(err) => {
            error!("Failed to build session cookies: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    }

    info!(role = %member.role, purpose = %authenticated.purpose, "session established");
    let response = MemberResponse {
        identity: member.identity,
        role: member.role,
        display_name: member.display_name,
    };
    (StatusCode::OK, headers, Json(response)).into_response()
}

/// `register` creates the member on first verification; other purposes need an existing one.
async fn resolve_member(
    auth_state: &AuthState,
    identity: &str,
    purpose: Purpose,
) -> anyhow::Result<Option<Member>> {
    if let Some(member) = auth_state.directory().find_member(identity).await? {
        return Ok(Some(member));
    }
    if purpose == Purpose::Register {
        let member = auth_state
            .directory()
            .register_member(Member::new_registrant(identity))
            .await?;
        info!(role = %member.role, "member registered");
        return Ok(Some(member));
    }
    Ok(None)
}
