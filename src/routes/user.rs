use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::{self, AuthenticatedUser, CurrentUser},
    error::AppError,
    models::session::{SessionId, SessionView},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(me))
        .route("/sessions", get(sessions_list))
        .route("/sessions/revoke", post(revoke_session))
        .route("/sessions/revoke-others", post(revoke_others))
}

const CONFIRM_ALL_HINT: &str =
    "this credential has no session id, so this would sign out every device; resend with confirm_all=true";

async fn me(current: CurrentUser) -> Result<Json<AuthenticatedUser>, AppError> {
    Ok(Json(current.require_user()?.clone()))
}

#[derive(Serialize)]
struct SessionsResponse {
    /// Legacy credential: none of the sessions below is marked current.
    degraded: bool,
    sessions: Vec<SessionView>,
}

/// The `CurrentUser` extractor already touched the caller's session.
async fn sessions_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<SessionsResponse>, AppError> {
    let user = current.require_user()?;
    let sessions = state
        .sessions
        .list(user.user_id, user.session_id.as_ref())
        .await?;
    Ok(Json(SessionsResponse {
        degraded: user.degraded,
        sessions,
    }))
}

#[derive(Deserialize, Default)]
struct RevokeRequest {
    id: Option<SessionId>,
    #[serde(default)]
    confirm_all: bool,
}

#[derive(Serialize)]
struct RevokeResponse {
    /// Only reported by the bulk paths; single revokes never reveal whether
    /// the id existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked: Option<u64>,
    /// The caller's own credential was revoked and its cookie cleared.
    signed_out: bool,
}

/// Without an `id` the caller's own session is revoked.
async fn revoke_session(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: PrivateCookieJar,
    body: Option<Json<RevokeRequest>>,
) -> Result<(PrivateCookieJar, Json<RevokeResponse>), AppError> {
    let user = current.require_user()?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let target = request.id.or_else(|| user.session_id.clone());
    match target {
        Some(target) => {
            state.sessions.revoke(user.user_id, &target).await?;
            let signed_out = user.session_id.as_ref() == Some(&target);
            let jar = if signed_out {
                auth::clear_session_cookie(jar)
            } else {
                jar
            };
            Ok((
                jar,
                Json(RevokeResponse {
                    revoked: None,
                    signed_out,
                }),
            ))
        }
        None => revoke_everything(&state, user, jar, request.confirm_all).await,
    }
}

#[derive(Deserialize, Default)]
struct RevokeOthersRequest {
    #[serde(default)]
    confirm_all: bool,
}

async fn revoke_others(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: PrivateCookieJar,
    body: Option<Json<RevokeOthersRequest>>,
) -> Result<(PrivateCookieJar, Json<RevokeResponse>), AppError> {
    let user = current.require_user()?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    match &user.session_id {
        Some(keep) => {
            let revoked = state.sessions.revoke_others(user.user_id, Some(keep)).await?;
            Ok((
                jar,
                Json(RevokeResponse {
                    revoked: Some(revoked),
                    signed_out: false,
                }),
            ))
        }
        None => revoke_everything(&state, user, jar, request.confirm_all).await,
    }
}

/// A degraded credential cannot name the session to keep, so "revoke mine"
/// and "revoke the others" both collapse into revoking every session of
/// the owner. That only happens on explicit confirmation.
async fn revoke_everything(
    state: &AppState,
    user: &AuthenticatedUser,
    jar: PrivateCookieJar,
    confirmed: bool,
) -> Result<(PrivateCookieJar, Json<RevokeResponse>), AppError> {
    if !confirmed {
        return Err(AppError::Conflict(CONFIRM_ALL_HINT.into()));
    }
    let revoked = state.sessions.revoke_others(user.user_id, None).await?;
    info!(user_id = user.user_id, revoked, "signed out every device");
    Ok((
        auth::clear_session_cookie(jar),
        Json(RevokeResponse {
            revoked: Some(revoked),
            signed_out: true,
        }),
    ))
}
