//! Account lookup and password verification. Accounts themselves are
//! managed outside this service; this is a read-only view over `users`.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use async_trait::async_trait;
use sqlx::FromRow;
use tracing::warn;

use crate::{
    db::DbPool,
    error::AppError,
    models::user::{UserIdentity, UserStatus},
};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for an unknown email or a wrong password.
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserIdentity>, AppError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password_hash: String,
    status: String,
}

impl UserRow {
    fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            email: self.email.clone(),
            status: UserStatus::parse(&self.status),
        }
    }
}

#[derive(Clone)]
pub struct SqliteIdentityProvider {
    db: DbPool,
}

impl SqliteIdentityProvider {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn fetch(&self, email: &str) -> Result<Option<UserRow>, AppError> {
        let row = sqlx::query_as(
            "SELECT id, email, password_hash, status FROM users WHERE email = ? COLLATE NOCASE",
        )
        .bind(email.trim())
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityProvider {
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, AppError> {
        let Some(row) = self.fetch(email).await? else {
            return Ok(None);
        };
        let parsed = match PasswordHash::new(&row.password_hash) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(user_id = row.id, "stored password hash is unreadable: {err}");
                return Ok(None);
            }
        };
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(Some(row.identity())),
            Err(argon2::password_hash::Error::Password) => Ok(None),
            Err(err) => Err(AppError::Other(anyhow::anyhow!(
                "password verification failed: {err}"
            ))),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserIdentity>, AppError> {
        Ok(self.fetch(email).await?.map(|row| row.identity()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};

    use super::*;
    use crate::db::test_pool;

    pub(crate) async fn insert_user(db: &DbPool, email: &str, password: &str, status: &str) -> i64 {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string();
        sqlx::query("INSERT INTO users (email, password_hash, status) VALUES (?, ?, ?)")
            .bind(email)
            .bind(hash)
            .bind(status)
            .execute(db)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    #[tokio::test]
    async fn verifies_passwords_against_stored_hash() {
        let db = test_pool().await;
        let id = insert_user(&db, "u1@example.org", "hunter22", "active").await;
        let provider = SqliteIdentityProvider::new(db);

        let user = provider
            .verify_password("U1@example.org", "hunter22")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_active());

        assert!(provider
            .verify_password("u1@example.org", "wrong")
            .await
            .unwrap()
            .is_none());
        assert!(provider
            .verify_password("nobody@example.org", "hunter22")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reports_status() {
        let db = test_pool().await;
        insert_user(&db, "off@example.org", "pw", "disabled").await;
        let provider = SqliteIdentityProvider::new(db);

        let user = provider.find_by_email("off@example.org").await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Disabled);
    }
}
