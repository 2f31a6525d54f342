use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use thiserror::Error;

use crate::{
    db::DbPool,
    models::session::{Origin, Session, SessionId},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session id already exists")]
    Conflict,
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Durable session rows. Every mutating write only touches rows that are
/// not revoked yet, so all writes are idempotent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the id is taken.
    async fn insert(&self, session: &Session) -> Result<(), StoreError>;

    /// Returns the row whatever its state; judging it is up to the caller.
    async fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError>;

    async fn update_last_active(
        &self,
        id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns whether this call performed the transition.
    async fn mark_revoked(&self, id: &SessionId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Revokes every live row of `owner_id` except `keep`. With no `keep`,
    /// every live row of the owner is revoked. Returns the number of rows changed.
    async fn mark_all_revoked_except(
        &self,
        owner_id: i64,
        keep: Option<&SessionId>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Rows active at `now`, most recently active first. Expired rows do
    /// not count against `limit`.
    async fn list_active_by_owner(
        &self,
        owner_id: i64,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Session>, StoreError>;
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    user_id: i64,
    user_email: String,
    client_addr: Option<String>,
    user_agent: Option<String>,
    device: String,
    browser: String,
    created_at: i64,
    last_active_at: i64,
    expires_at: i64,
    revoked_at: Option<i64>,
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::Database(sqlx::Error::Decode(
            format!("{column} out of range: {millis}").into(),
        ))
    })
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: SessionId::from(row.id),
            owner_user_id: row.user_id,
            owner_email: row.user_email,
            origin: Origin {
                client_addr: row.client_addr,
                user_agent: row.user_agent,
                device: row.device,
                browser: row.browser,
            },
            created_at: from_millis("created_at", row.created_at)?,
            expires_at: from_millis("expires_at", row.expires_at)?,
            last_active_at: from_millis("last_active_at", row.last_active_at)?,
            revoked_at: row
                .revoked_at
                .map(|ms| from_millis("revoked_at", ms))
                .transpose()?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, user_id, user_email, client_addr, user_agent, device, \
     browser, created_at, last_active_at, expires_at, revoked_at FROM sessions";

#[derive(Clone)]
pub struct SqliteSessionStore {
    db: DbPool,
}

impl SqliteSessionStore {
    /// Expects the schema to be migrated already (see [`crate::db::run_migrations`]).
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO sessions
                (id, user_id, user_email, client_addr, user_agent, device, browser,
                 created_at, last_active_at, expires_at, revoked_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.id.as_str())
        .bind(session.owner_user_id)
        .bind(&session.owner_email)
        .bind(&session.origin.client_addr)
        .bind(&session.origin.user_agent)
        .bind(&session.origin.device)
        .bind(&session.origin.browser)
        .bind(session.created_at.timestamp_millis())
        .bind(session.last_active_at.timestamp_millis())
        .bind(session.expires_at.timestamp_millis())
        .bind(session.revoked_at.map(|ts| ts.timestamp_millis()))
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::Conflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.db)
                .await?;
        row.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn update_last_active(
        &self,
        id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // MAX keeps the column non-decreasing when touches race.
        sqlx::query(
            r#"UPDATE sessions SET last_active_at = MAX(last_active_at, ?)
               WHERE id = ? AND revoked_at IS NULL"#,
        )
        .bind(at.timestamp_millis())
        .bind(id.as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_revoked(&self, id: &SessionId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
                .bind(at.timestamp_millis())
                .bind(id.as_str())
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_revoked_except(
        &self,
        owner_id: i64,
        keep: Option<&SessionId>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let keep = keep.map(SessionId::as_str);
        let result = sqlx::query(
            r#"UPDATE sessions SET revoked_at = ?
               WHERE user_id = ? AND revoked_at IS NULL AND (? IS NULL OR id != ?)"#,
        )
        .bind(at.timestamp_millis())
        .bind(owner_id)
        .bind(keep)
        .bind(keep)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_by_owner(
        &self,
        owner_id: i64,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? AND revoked_at IS NULL AND expires_at > ? \
             ORDER BY last_active_at DESC, created_at DESC LIMIT ?"
        ))
        .bind(owner_id)
        .bind(now.timestamp_millis())
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }
}
