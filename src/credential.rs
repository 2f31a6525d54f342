//! The client-held credential: who the client claims to be and, for
//! credentials issued since session tracking exists, which session it holds.
//!
//! On the wire this is a small JSON document. Confidentiality and integrity
//! come from the private cookie jar that carries it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    error::AppError,
    models::session::{SessionId, SessionView},
    services::session_manager::SessionManager,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Current {
        identity: String,
        session_id: SessionId,
    },
    /// Issued before sessions were tracked. Read-only compatibility.
    Legacy { identity: String },
}

impl Credential {
    pub fn identity(&self) -> &str {
        match self {
            Credential::Current { identity, .. } | Credential::Legacy { identity } => identity,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Credential::Current { session_id, .. } => Some(session_id),
            Credential::Legacy { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Credential::Legacy { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("malformed credential")]
    Malformed,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<String>,
}

/// Always produces the current shape.
pub fn encode(identity: &str, session_id: &SessionId) -> String {
    let payload = Payload {
        email: identity.to_string(),
        sid: Some(session_id.as_str().to_string()),
    };
    // A struct of two strings cannot fail to serialize.
    serde_json::to_string(&payload).unwrap_or_default()
}

pub fn decode(raw: &str) -> Result<Credential, CredentialError> {
    let payload: Payload = serde_json::from_str(raw).map_err(|_| CredentialError::Malformed)?;
    if payload.email.trim().is_empty() {
        return Err(CredentialError::Malformed);
    }

    match payload.sid {
        Some(sid) if sid.is_empty() => Err(CredentialError::Malformed),
        Some(sid) => Ok(Credential::Current {
            identity: payload.email,
            session_id: SessionId::from(sid),
        }),
        None => Ok(Credential::Legacy {
            identity: payload.email,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Session(SessionView),
    /// Authenticated by identity alone; no session-scoped operations apply.
    Degraded { identity: String },
    Invalid,
}

/// Checks a decoded credential against the session records. A live session
/// paired with somebody else's identity is treated as tampering.
pub async fn resolve(
    credential: Credential,
    sessions: &SessionManager,
) -> Result<Resolution, AppError> {
    match credential {
        Credential::Legacy { identity } => Ok(Resolution::Degraded { identity }),
        Credential::Current {
            identity,
            session_id,
        } => match sessions.validate(&session_id).await? {
            Some(view) if view.owner_email == identity => Ok(Resolution::Session(view)),
            Some(view) => {
                warn!(
                    user_id = view.owner_user_id,
                    session = session_id.short(),
                    "credential identity does not match session owner"
                );
                Ok(Resolution::Invalid)
            }
            None => Ok(Resolution::Invalid),
        },
    }
}
