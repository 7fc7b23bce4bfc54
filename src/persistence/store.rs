use crate::db::ensure_schema_version;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

const EXCHANGE_SCHEMA_KEY: &str = "exchange_schema_version";
const EXCHANGE_SCHEMA_VERSION: u32 = 1;

/// One successful user/assistant round trip, attributed to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "tabId")]
    pub conversation_id: String,
    pub message: String,
    pub response: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            message: message.into(),
            response: response.into(),
            created_at: Utc::now(),
        }
    }
}

/// Durable destination for completed exchanges.
pub trait ExchangeSink: Send + Sync {
    fn record<'a>(
        &'a self,
        exchange: &'a Exchange,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// SQLite-backed exchange log.
#[derive(Clone)]
pub struct SqliteExchangeStore {
    pool: SqlitePool,
}

// Fixed-width timestamps keep lexical and chronological order identical.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid exchange timestamp: {raw}"))?
        .with_timezone(&Utc))
}

fn map_exchange_row(row: &SqliteRow) -> Result<Exchange> {
    let created_raw: String = row.try_get("created_at")?;
    Ok(Exchange {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        conversation_id: row.try_get("conversation_id")?,
        message: row.try_get("message")?,
        response: row.try_get("response")?,
        created_at: decode_timestamp(&created_raw)?,
    })
}

impl SqliteExchangeStore {
    /// Wrap an existing pool and create the exchange table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        ensure_schema_version(&pool, EXCHANGE_SCHEMA_KEY, EXCHANGE_SCHEMA_VERSION).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_exchanges (
                 id TEXT PRIMARY KEY,
                 user_id TEXT NOT NULL,
                 conversation_id TEXT NOT NULL,
                 message TEXT NOT NULL,
                 response TEXT NOT NULL,
                 created_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .context("create chat_exchanges table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_exchanges_user
                 ON chat_exchanges(user_id, conversation_id, created_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Exchanges of one conversation, oldest first.
    pub async fn history(&self, user_id: &str, conversation_id: &str) -> Result<Vec<Exchange>> {
        let rows = sqlx::query(
            "SELECT id, user_id, conversation_id, message, response, created_at
             FROM chat_exchanges
             WHERE user_id = $1 AND conversation_id = $2
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .context("query conversation history")?;

        rows.iter().map(map_exchange_row).collect()
    }

    /// Every exchange of a user across conversations, newest first.
    pub async fn history_for_user(&self, user_id: &str) -> Result<Vec<Exchange>> {
        let rows = sqlx::query(
            "SELECT id, user_id, conversation_id, message, response, created_at
             FROM chat_exchanges
             WHERE user_id = $1
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("query user history")?;

        rows.iter().map(map_exchange_row).collect()
    }
}

impl ExchangeSink for SqliteExchangeStore {
    fn record<'a>(
        &'a self,
        exchange: &'a Exchange,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO chat_exchanges (id, user_id, conversation_id, message, response, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&exchange.id)
            .bind(&exchange.user_id)
            .bind(&exchange.conversation_id)
            .bind(&exchange.message)
            .bind(&exchange.response)
            .bind(encode_timestamp(&exchange.created_at))
            .execute(&self.pool)
            .await
            .context("insert chat exchange")?;
            Ok(())
        })
    }
}
