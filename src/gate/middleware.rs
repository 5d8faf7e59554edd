//! Axum layer applying [`RouteTable::authorize`] to every request.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::{Decision, RouteTable};
use crate::error::AuthError;
use crate::session::{SessionTokens, extract_token};

#[derive(Clone, Debug)]
pub struct Gate {
    routes: Arc<RouteTable>,
    tokens: SessionTokens,
}

impl Gate {
    #[must_use]
    pub fn new(routes: RouteTable, tokens: SessionTokens) -> Self {
        Self {
            routes: Arc::new(routes),
            tokens,
        }
    }
}

/// Re-derive the session from the `auth-token` cookie and gate the request.
///
/// The role hint cookie is ignored; only a verified token grants access.
pub async fn enforce(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    let uri = request.uri().clone();
    let path = uri.path();
    if gate.routes.is_excluded(path) {
        return next.run(request).await;
    }

    let role = match extract_token(request.headers()) {
        Some(token) => match gate.tokens.verify(&token, Utc::now()) {
            Ok(claims) => Some(claims.role),
            Err(err) => {
                debug!(path, "ignoring session cookie: {err}");
                None
            }
        },
        None => None,
    };

    let decision = gate.routes.authorize(path, uri.query(), role);
    if let (Decision::AccessDenied { .. }, Some(role)) = (&decision, role) {
        debug!(path, "{}", AuthError::Unauthorized(role));
    }
    match decision.location() {
        None => next.run(request).await,
        Some(location) => {
            debug!(path, ?decision, "request gated");
            Redirect::to(location).into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::Role;
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, StatusCode, header},
        middleware::from_fn_with_state,
        routing::get,
    };
    use secrecy::SecretString;
    use tower::ServiceExt;

    fn tokens() -> SessionTokens {
        SessionTokens::new(SecretString::from("0123456789abcdef0123456789abcdef")).unwrap()
    }

    fn app(tokens: SessionTokens) -> Router {
        Router::new()
            .route("/posts", get(|| async { "feed" }))
            .route("/admin", get(|| async { "console" }))
            .route("/login", get(|| async { "login" }))
            .route("/health", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                Gate::new(RouteTable::default(), tokens),
                enforce,
            ))
    }

    fn request(uri: &str, cookie: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn location(response: &Response) -> Option<&HeaderValue> {
        response.headers().get(header::LOCATION)
    }

    #[tokio::test]
    async fn anonymous_protected_request_redirects_to_login() {
        let response = app(tokens()).oneshot(request("/posts?page=2", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response).unwrap(),
            "/login?redirect=%2Fposts%3Fpage%3D2"
        );
    }

    #[tokio::test]
    async fn role_cookie_alone_grants_nothing() {
        let response = app(tokens())
            .oneshot(request("/admin", Some("user-role=admin")))
            .await
            .unwrap();
        assert_eq!(
            location(&response).unwrap(),
            "/login?redirect=%2Fadmin"
        );
    }

    #[tokio::test]
    async fn member_token_with_forged_role_hint_is_denied_admin() {
        let tokens = tokens();
        let token = tokens
            .mint("kim@univ.ac.kr", Role::CurrentMember, "Kim", Utc::now())
            .unwrap();
        let cookie = format!("auth-token={token}; user-role=admin");
        let response = app(tokens)
            .oneshot(request("/admin", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(location(&response).unwrap(), "/?error=access_denied");
    }

    #[tokio::test]
    async fn valid_session_passes_and_leaves_login_flow() {
        let tokens = tokens();
        let token = tokens
            .mint("lee@univ.ac.kr", Role::Admin, "Lee", Utc::now())
            .unwrap();
        let cookie = format!("auth-token={token}");

        let response = app(tokens.clone())
            .oneshot(request("/admin", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(tokens)
            .oneshot(request("/login?redirect=%2Fposts", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(location(&response).unwrap(), "/posts");
    }

    #[tokio::test]
    async fn excluded_paths_skip_the_gate() {
        let response = app(tokens()).oneshot(request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
