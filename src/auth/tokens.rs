use crate::error::Result;
use chrono::{Duration, SecondsFormat, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

const TOKEN_PREFIX: &str = "cl_";

/// SHA-256 hex digest; only this form of a token is ever stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Fresh opaque session token: `cl_` followed by 32 random bytes in hex.
pub fn generate_session_token() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    format!("{TOKEN_PREFIX}{}", hex::encode(buf))
}

/// Constant-time string comparison (length leaks, content does not).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Hashed, expiring bearer sessions in the `auth_sessions` table.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl TokenStore {
    pub(crate) async fn new(pool: SqlitePool, ttl_hours: u64) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS auth_sessions (
                 token_hash TEXT PRIMARY KEY,
                 user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                 created_at TEXT NOT NULL,
                 expires_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_auth_sessions_user ON auth_sessions(user_id)",
        )
        .execute(&pool)
        .await?;

        let hours = i64::try_from(ttl_hours).unwrap_or(i64::MAX);
        Ok(Self {
            pool,
            ttl: Duration::try_hours(hours).unwrap_or(Duration::MAX),
        })
    }

    /// Mint a token for `user_id`; the plaintext is returned once and not kept.
    pub async fn issue(&self, user_id: &str) -> Result<String> {
        let token = generate_session_token();
        let now = Utc::now();
        let expires = now.checked_add_signed(self.ttl).unwrap_or(now);

        sqlx::query(
            "INSERT INTO auth_sessions (token_hash, user_id, created_at, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(timestamp(now))
        .bind(timestamp(expires))
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    /// User id behind a live token, or `None` when unknown or expired.
    pub async fn resolve(&self, token: &str) -> Result<Option<String>> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }
        let presented = hash_token(token);
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT token_hash, user_id
             FROM auth_sessions
             WHERE token_hash = $1 AND expires_at > $2",
        )
        .bind(&presented)
        .bind(timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .filter(|(stored, _)| constant_time_eq(stored, &presented))
            .map(|(_, user_id)| user_id))
    }

    /// Remove a token; `true` when it existed.
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop expired rows; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= $1")
            .bind(timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    async fn insert_with_expiry(&self, user_id: &str, expires_at: chrono::DateTime<Utc>) -> String {
        let token = generate_session_token();
        sqlx::query(
            "INSERT INTO auth_sessions (token_hash, user_id, created_at, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(timestamp(Utc::now()))
        .bind(timestamp(expires_at))
        .execute(&self.pool)
        .await
        .unwrap();
        token
    }
}
