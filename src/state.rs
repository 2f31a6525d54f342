use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        identity::{IdentityProvider, SqliteIdentityProvider},
        session_manager::SessionManager,
        session_store::SqliteSessionStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub sessions: SessionManager,
    pub identities: Arc<dyn IdentityProvider>,
    pub cookie_key: Key,
}

impl AppState {
    /// The pool must already be migrated.
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let sessions = SessionManager::new(
            Arc::new(SqliteSessionStore::new(db.clone())),
            config.session_list_limit,
        );
        let identities = Arc::new(SqliteIdentityProvider::new(db.clone()));
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        Self {
            config,
            db,
            sessions,
            identities,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
