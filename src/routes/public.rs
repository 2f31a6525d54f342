use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    auth::{self, CurrentUser},
    error::AppError,
    models::session::SessionId,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_submit))
        .route("/logout", post(logout))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    user_id: i64,
    email: String,
    session_id: SessionId,
}

async fn login_submit(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: PrivateCookieJar,
    Json(form): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let user = state
        .identities
        .verify_password(&form.email, &form.password)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !user.is_active() {
        warn!(user_id = user.id, "login refused for inactive account");
        return Err(AppError::Forbidden);
    }

    let client_addr = client_addr(&headers, connect.map(|ConnectInfo(addr)| addr));
    let raw_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());

    let session_id = state
        .sessions
        .create(
            user.id,
            &user.email,
            client_addr.as_deref(),
            raw_agent,
            state.config.session_ttl,
        )
        .await?;
    info!(user_id = user.id, "login succeeded");

    let jar = auth::apply_session_cookie(jar, &state.config, &user.email, &session_id);
    Ok((
        jar,
        Json(LoginResponse {
            user_id: user.id,
            email: user.email,
            session_id,
        }),
    )
        .into_response())
}

/// First `X-Forwarded-For` hop, falling back to the socket peer.
fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, StatusCode), AppError> {
    if let Some(user) = &current.0 {
        if let Some(session_id) = &user.session_id {
            state.sessions.revoke(user.user_id, session_id).await?;
        }
    }
    Ok((auth::clear_session_cookie(jar), StatusCode::NO_CONTENT))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let peer: SocketAddr = ([10, 0, 0, 1], 4000).into();
        let mut headers = HeaderMap::new();
        assert_eq!(client_addr(&headers, Some(peer)).as_deref(), Some("10.0.0.1"));
        assert_eq!(client_addr(&headers, None), None);

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(
            client_addr(&headers, Some(peer)).as_deref(),
            Some("203.0.113.9")
        );
    }
}
