use super::tokens::TokenStore;
use super::users::{User, UserStore};
use crate::config::AuthConfig;
use crate::db::ensure_schema_version;
use crate::error::{AuthError, ChatError, Result};
use sqlx::sqlite::SqlitePool;

const AUTH_SCHEMA_KEY: &str = "auth_schema_version";
const AUTH_SCHEMA_VERSION: u32 = 1;

/// Debug builds hash with a low cost so tests and local runs stay fast.
fn password_cost() -> u32 {
    if cfg!(debug_assertions) {
        4
    } else {
        bcrypt::DEFAULT_COST
    }
}

async fn hash_password(password: String) -> Result<String> {
    let cost = password_cost();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| anyhow::anyhow!("password hashing task failed: {e}"))?
        .map_err(|e| ChatError::Other(anyhow::anyhow!("password hashing failed: {e}")))
}

async fn verify_password(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

/// Account sign-up, sign-in and bearer-token resolution.
#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    tokens: TokenStore,
    min_password_len: usize,
}

impl AuthService {
    pub async fn new(pool: SqlitePool, config: &AuthConfig) -> Result<Self> {
        ensure_schema_version(&pool, AUTH_SCHEMA_KEY, AUTH_SCHEMA_VERSION).await?;
        let users = UserStore::new(pool.clone()).await?;
        let tokens = TokenStore::new(pool, config.token_ttl_hours).await?;
        Ok(Self {
            users,
            tokens,
            min_password_len: config.min_password_len,
        })
    }

    /// Register an account and sign it in.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<(User, String)> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput("Email and password are required".into()).into());
        }
        if password.chars().count() < self.min_password_len {
            return Err(AuthError::InvalidInput(format!(
                "Password must be at least {} characters long",
                self.min_password_len
            ))
            .into());
        }
        if self.users.find_credentials(email).await?.is_some() {
            return Err(AuthError::EmailTaken.into());
        }

        let hash = hash_password(password.to_string()).await?;
        let user = self.users.insert(email, &hash, name).await?;
        let token = self.tokens.issue(&user.id).await?;
        tracing::info!(user_id = user.id.as_str(), "Account created");
        Ok((user, token))
    }

    /// Check credentials and mint a session token.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(User, String)> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput("Email and password are required".into()).into());
        }

        let Some((user, hash)) = self.users.find_credentials(email).await? else {
            tracing::debug!("Sign-in rejected: unknown email");
            return Err(AuthError::InvalidCredentials.into());
        };
        if !verify_password(password.to_string(), hash).await {
            tracing::debug!(user_id = user.id.as_str(), "Sign-in rejected: bad password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.tokens.issue(&user.id).await?;
        Ok((user, token))
    }

    /// Revoke a token. Unknown tokens are ignored.
    pub async fn sign_out(&self, token: &str) -> Result<()> {
        if self.tokens.revoke(token).await? {
            tracing::debug!("Session token revoked");
        }
        Ok(())
    }

    /// Resolve a bearer token to its account.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let Some(user_id) = self.tokens.resolve(token).await? else {
            return Err(AuthError::Unauthenticated.into());
        };
        self.users
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }

    /// Housekeeping hook for expired tokens.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.tokens.purge_expired().await
    }
}
