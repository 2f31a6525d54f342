use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    models::session::{Origin, Session, SessionId, SessionView},
    services::session_store::{SessionStore, StoreError},
    user_agent,
};

const MAX_ID_ATTEMPTS: usize = 3;

/// Login-session lifecycle on top of a [`SessionStore`].
///
/// A session is `Active` until it is revoked or its deadline passes. Both
/// transitions are terminal and nothing here moves a session back.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    list_limit: u32,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, list_limit: u32) -> Self {
        Self { store, list_limit }
    }

    /// Opens a session for an owner whose credentials were already checked.
    pub async fn create(
        &self,
        owner_id: i64,
        email: &str,
        client_addr: Option<&str>,
        raw_agent: Option<&str>,
        ttl: Duration,
    ) -> Result<SessionId, AppError> {
        let labels = user_agent::classify(raw_agent);
        let origin = Origin {
            client_addr: client_addr.map(str::to_string),
            user_agent: raw_agent.map(str::to_string),
            device: labels.device,
            browser: labels.browser,
        };

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let now = Utc::now();
            let session = Session {
                id: SessionId::generate(),
                owner_user_id: owner_id,
                owner_email: email.to_string(),
                origin: origin.clone(),
                created_at: now,
                expires_at: now + ttl,
                last_active_at: now,
                revoked_at: None,
            };

            match self.store.insert(&session).await {
                Ok(()) => {
                    info!(
                        user_id = owner_id,
                        session = session.id.short(),
                        device = %session.origin.device,
                        "session created"
                    );
                    return Ok(session.id);
                }
                Err(StoreError::Conflict) => {
                    warn!(attempt, "session id collision, retrying with a fresh id");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AppError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    /// `Ok(None)` when the session is unknown, revoked or expired; the three
    /// cases are deliberately indistinguishable. Store failures are `Err`.
    pub async fn validate(&self, id: &SessionId) -> Result<Option<SessionView>, AppError> {
        let session = match self.store.find_by_id(id).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if !session.is_active_at(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(SessionView::from_session(session, Some(id))))
    }

    /// Advisory freshness update. Never fails the caller.
    pub async fn touch(&self, id: &SessionId) {
        if let Err(err) = self.store.update_last_active(id, Utc::now()).await {
            warn!(session = id.short(), "failed to touch session: {err}");
        }
    }

    /// Revokes `id` if it belongs to `owner_id`. Foreign, unknown and
    /// already revoked ids are silently ignored.
    pub async fn revoke(&self, owner_id: i64, id: &SessionId) -> Result<(), AppError> {
        let session = match self.store.find_by_id(id).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if session.owner_user_id != owner_id {
            debug!(user_id = owner_id, "ignoring revoke of a foreign session");
            return Ok(());
        }

        if self.store.mark_revoked(id, Utc::now()).await? {
            info!(user_id = owner_id, session = id.short(), "session revoked");
        }
        Ok(())
    }

    /// Revokes every session of `owner_id` except `keep`. Without `keep`
    /// this revokes all of them.
    pub async fn revoke_others(
        &self,
        owner_id: i64,
        keep: Option<&SessionId>,
    ) -> Result<u64, AppError> {
        let revoked = self
            .store
            .mark_all_revoked_except(owner_id, keep, Utc::now())
            .await?;
        info!(
            user_id = owner_id,
            revoked,
            kept = keep.is_some(),
            "revoked other sessions"
        );
        Ok(revoked)
    }

    pub async fn list(
        &self,
        owner_id: i64,
        current: Option<&SessionId>,
    ) -> Result<Vec<SessionView>, AppError> {
        let now = Utc::now();
        let sessions = self
            .store
            .list_active_by_owner(owner_id, now, self.list_limit)
            .await?;
        Ok(sessions
            .into_iter()
            .map(|session| SessionView::from_session(session, current))
            .collect())
    }
}
