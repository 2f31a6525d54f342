use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque external handle of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Two v4 UUIDs back to back: 244 random bits from the OS generator.
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix that is safe to put in logs.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a session was opened from, captured once at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
    pub device: String,
    pub browser: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub owner_user_id: i64,
    pub owner_email: String,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Judges the session at `now`. Expiry is never stored, only computed here.
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if now >= self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SessionState::Active
    }
}

/// What callers get to see of an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    #[serde(skip)]
    pub owner_user_id: i64,
    #[serde(skip)]
    pub owner_email: String,
    pub device: String,
    pub browser: String,
    pub network_origin: Option<String>,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "isCurrent")]
    pub is_current: bool,
}

impl SessionView {
    pub fn from_session(session: Session, current: Option<&SessionId>) -> Self {
        let is_current = current.is_some_and(|id| *id == session.id);
        Self {
            id: session.id,
            owner_user_id: session.owner_user_id,
            owner_email: session.owner_email,
            device: session.origin.device,
            browser: session.origin.browser,
            network_origin: session.origin.client_addr,
            last_active: session.last_active_at,
            created_at: session.created_at,
            expires_at: session.expires_at,
            is_current,
        }
    }
}
