use crate::error::{AuthError, ChatError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use uuid::Uuid;

/// Public account record. The password hash never leaves [`UserStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn map_user_row(row: &SqliteRow) -> Result<User> {
    let created_raw: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map_err(|e| anyhow::anyhow!("invalid user timestamp {created_raw}: {e}"))?
        .with_timezone(&Utc);
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        created_at,
    })
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub(crate) async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                 id TEXT PRIMARY KEY,
                 email TEXT NOT NULL UNIQUE,
                 password_hash TEXT NOT NULL,
                 name TEXT,
                 created_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert a new account; a duplicate email maps to [`AuthError::EmailTaken`].
    pub async fn insert(
        &self,
        email: &str,
        password_hash: &str,
        name: Option<&str>,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: normalize_email(email),
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(ToOwned::to_owned),
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(password_hash)
        .bind(&user.name)
        .bind(user.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AuthError::EmailTaken.into())
            }
            Err(e) => Err(ChatError::from(e)),
        }
    }

    /// Look up an account and its password hash by email.
    pub async fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let row = sqlx::query(
            "SELECT id, email, name, created_at, password_hash
             FROM users
             WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<(User, String)> {
            let hash: String = r.try_get("password_hash")?;
            Ok((map_user_row(&r)?, hash))
        })
        .transpose()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, name, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| map_user_row(&r)).transpose()
    }
}
