use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use serde::Serialize;
use tracing::debug;

use crate::{
    config::AppConfig,
    credential::{self, Resolution},
    error::AppError,
    models::session::SessionId,
    state::AppState,
};

pub const SESSION_COOKIE: &str = "loginbook_session";

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub email: String,
    /// Absent for degraded credentials.
    pub session_id: Option<SessionId>,
    /// Set for legacy credentials that predate session tracking. Clients
    /// should ask the user to sign in again.
    pub degraded: bool,
}

/// `CurrentUser(None)` means "not logged in", which is not an error by
/// itself. Only infrastructure failures reject the request.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(Self(Some(user.clone())));
        }

        let jar = PrivateCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
        let user = authenticate(state, &jar).await?;
        if let Some(user) = &user {
            parts.extensions.insert(user.clone());
        }
        Ok(Self(user))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

/// Reads the credential cookie and resolves it. Touches the session in
/// the background when it is valid.
pub async fn authenticate(
    state: &AppState,
    jar: &PrivateCookieJar,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };
    let credential = match credential::decode(cookie.value()) {
        Ok(credential) => credential,
        Err(err) => {
            debug!("ignoring session cookie: {err}");
            return Ok(None);
        }
    };

    match credential::resolve(credential, &state.sessions).await? {
        Resolution::Session(view) => {
            let sessions = state.sessions.clone();
            let id = view.id.clone();
            tokio::spawn(async move { sessions.touch(&id).await });

            Ok(Some(AuthenticatedUser {
                user_id: view.owner_user_id,
                email: view.owner_email,
                session_id: Some(view.id),
                degraded: false,
            }))
        }
        Resolution::Degraded { identity } => {
            match state.identities.find_by_email(&identity).await? {
                Some(user) if user.is_active() => {
                    debug!(user_id = user.id, "accepted legacy credential");
                    Ok(Some(AuthenticatedUser {
                        user_id: user.id,
                        email: user.email,
                        session_id: None,
                        degraded: true,
                    }))
                }
                _ => Ok(None),
            }
        }
        Resolution::Invalid => Ok(None),
    }
}

pub fn apply_session_cookie(
    jar: PrivateCookieJar,
    config: &AppConfig,
    identity: &str,
    session_id: &SessionId,
) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, credential::encode(identity, session_id)))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure_cookies)
        .max_age(time::Duration::seconds(config.session_ttl.num_seconds()));
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use axum::{
        http::{header, HeaderMap, HeaderValue},
        response::IntoResponse,
    };
    use chrono::Duration;

    use super::*;
    use crate::{db::test_pool, services::identity::tests::insert_user};

    fn config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            listen_addr: ([127, 0, 0, 1], 0).into(),
            cookie_secret: "unit-test-cookie-secret-unit-test-cookie-secret".into(),
            session_ttl: Duration::hours(1),
            session_list_limit: 50,
            secure_cookies: false,
        }
    }

    async fn state() -> AppState {
        AppState::new(config(), test_pool().await)
    }

    /// Replays the `Set-Cookie` headers of `issued` as a request `Cookie` header.
    fn echo(state: &AppState, issued: PrivateCookieJar) -> PrivateCookieJar {
        let response = issued.into_response();
        let mut headers = HeaderMap::new();
        for set_cookie in response.headers().get_all(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            headers.append(header::COOKIE, HeaderValue::from_str(pair).unwrap());
        }
        PrivateCookieJar::from_headers(&headers, state.cookie_key.clone())
    }

    fn request_jar(state: &AppState, credential: &str) -> PrivateCookieJar {
        let issued = PrivateCookieJar::new(state.cookie_key.clone())
            .add(Cookie::new(SESSION_COOKIE, credential.to_string()));
        echo(state, issued)
    }

    #[tokio::test]
    async fn no_cookie_is_anonymous() {
        let state = state().await;
        let jar = PrivateCookieJar::new(state.cookie_key.clone());
        assert!(authenticate(&state, &jar).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn issued_cookie_authenticates_and_touches() {
        let state = state().await;
        let sid = state
            .sessions
            .create(7, "u7@example.org", None, None, Duration::hours(1))
            .await
            .unwrap();
        let before = state.sessions.validate(&sid).await.unwrap().unwrap();

        let issued = apply_session_cookie(
            PrivateCookieJar::new(state.cookie_key.clone()),
            &state.config,
            "u7@example.org",
            &sid,
        );
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let user = authenticate(&state, &echo(&state, issued))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.user_id, 7);
        assert_eq!(user.session_id.as_ref(), Some(&sid));
        assert!(!user.degraded);

        // The touch runs detached; give it a moment.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let after = state.sessions.validate(&sid).await.unwrap().unwrap();
        assert!(after.last_active > before.last_active);
    }

    #[tokio::test]
    async fn garbage_and_revoked_cookies_are_anonymous() {
        let state = state().await;
        let jar = request_jar(&state, "not json at all");
        assert!(authenticate(&state, &jar).await.unwrap().is_none());

        let sid = state
            .sessions
            .create(7, "u7@example.org", None, None, Duration::hours(1))
            .await
            .unwrap();
        state.sessions.revoke(7, &sid).await.unwrap();
        let jar = request_jar(&state, &credential::encode("u7@example.org", &sid));
        assert!(authenticate(&state, &jar).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_cookie_is_degraded_for_active_users_only() {
        let state = state().await;
        let id = insert_user(&state.db, "old@example.org", "pw", "active").await;
        insert_user(&state.db, "gone@example.org", "pw", "disabled").await;

        let jar = request_jar(&state, r#"{"email":"old@example.org"}"#);
        let user = authenticate(&state, &jar).await.unwrap().unwrap();
        assert_eq!(user.user_id, id);
        assert!(user.degraded);
        assert!(user.session_id.is_none());
        assert_eq!(user.email, "old@example.org");

        // Lookup ignores case; the account's own spelling is what callers see.
        let jar = request_jar(&state, r#"{"email":"Old@Example.ORG"}"#);
        let user = authenticate(&state, &jar).await.unwrap().unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.email, "old@example.org");

        let jar = request_jar(&state, r#"{"email":"gone@example.org"}"#);
        assert!(authenticate(&state, &jar).await.unwrap().is_none());
    }
}
