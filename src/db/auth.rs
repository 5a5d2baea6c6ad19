use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::user::Role;
use super::StoreError;

/// Credentials and refresh tokens. Kept apart from the ledger stores so the
/// password hash never leaves this module.
pub struct AuthRepository {
    pool: PgPool,
}

impl AuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// New users start out `UNAPPROVED` and own no accounts.
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<(Uuid, String), sqlx::Error> {
        sqlx::query_as::<_, (Uuid, String)>(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .bind(Role::Unapproved.as_str())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(Uuid, String, String)>, sqlx::Error> {
        sqlx::query_as::<_, (Uuid, String, String)>(
            r#"
            SELECT id, email, password_hash
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn store_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Consumes a refresh token, returning its owner if it was still valid.
    pub async fn verify_refresh_token(&self, token: &str) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token = $1 AND expires_at > CURRENT_TIMESTAMP
            RETURNING user_id
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
    }

    /// Current role of a token subject; `None` once the user was deleted.
    pub async fn find_role(&self, user_id: Uuid) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        role.map(|role| role.parse().map_err(StoreError::Corrupt))
            .transpose()
    }
}
