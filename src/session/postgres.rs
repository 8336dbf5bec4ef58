//! Durable session store over PostgreSQL.

use super::{Message, MessageContent, Role, Session, SessionStore};
use crate::error::SessionError;
use crate::models::ProfileHints;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    history_limit: usize,
}

fn store_error(context: &str) -> impl Fn(sqlx::Error) -> SessionError + '_ {
    move |e| SessionError::StoreUnavailable(format!("{}: {}", context, e))
}

fn role_to_db(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Agent => "agent",
    }
}

fn role_from_db(role: &str) -> Role {
    match role {
        "agent" => Role::Agent,
        _ => Role::User,
    }
}

impl PostgresSessionStore {
    /// Lazily connecting pool; the first query opens the connection.
    pub fn connect_lazy(database_url: &str, history_limit: usize) -> crate::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(|e| crate::error::OrchestrationError::Config(format!("invalid database url: {}", e)))?;

        info!("Session store backend: postgres");
        Ok(Self::with_pool(pool, history_limit))
    }

    pub fn with_pool(pool: PgPool, history_limit: usize) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            history_limit,
        }
    }

    async fn ensure_schema(&self) -> Result<(), SessionError> {
        let pool = &self.pool;
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_sessions (
                      session_id TEXT PRIMARY KEY,
                      profile TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_messages (
                      seq BIGSERIAL PRIMARY KEY,
                      message_id UUID NOT NULL,
                      session_id TEXT NOT NULL REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_chat_messages_session_seq ON chat_messages (session_id, seq);",
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(store_error("failed to initialize session schema"))?;
        Ok(())
    }

    async fn upsert_session(&self, session_id: &str) -> Result<(), SessionError> {
        sqlx::query(
            "INSERT INTO chat_sessions (session_id) VALUES ($1) ON CONFLICT (session_id) DO UPDATE SET updated_at = NOW()",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(store_error("failed to upsert session"))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        self.ensure_schema().await?;

        let Some(row) = sqlx::query(
            "SELECT profile, created_at, updated_at FROM chat_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("failed to load session"))?
        else {
            return Ok(None);
        };

        let mut session = Session::new(session_id);
        let profile: Option<String> = row.try_get("profile").map_err(store_error("bad session row"))?;
        session.profile = profile.and_then(|raw| serde_json::from_str::<ProfileHints>(&raw).ok());
        session.created_at = row.try_get("created_at").map_err(store_error("bad session row"))?;

        // Retention applies on load: only the newest `history_limit` rows.
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at FROM (
              SELECT seq, role, content, created_at
              FROM chat_messages
              WHERE session_id = $1
              ORDER BY seq DESC
              LIMIT $2
            ) recent
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .bind(self.history_limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("failed to load session messages"))?;

        for row in rows {
            let role: String = row.try_get("role").map_err(store_error("bad message row"))?;
            let raw: String = row.try_get("content").map_err(store_error("bad message row"))?;
            let timestamp: DateTime<Utc> = row.try_get("created_at").map_err(store_error("bad message row"))?;
            let content = serde_json::from_str::<MessageContent>(&raw).unwrap_or(MessageContent::Text(raw));

            session.push(
                Message {
                    role: role_from_db(&role),
                    content,
                    timestamp,
                },
                self.history_limit,
            );
        }

        session.updated_at = row.try_get("updated_at").map_err(store_error("bad session row"))?;
        Ok(Some(session))
    }

    async fn create(&self, session_id: &str) -> Result<(), SessionError> {
        self.ensure_schema().await?;
        self.upsert_session(session_id).await
    }

    async fn append_turn(&self, session_id: &str, user: Message, agent: Message) -> Result<(), SessionError> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(store_error("failed to begin transaction"))?;

        sqlx::query(
            "INSERT INTO chat_sessions (session_id) VALUES ($1) ON CONFLICT (session_id) DO UPDATE SET updated_at = NOW()",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(store_error("failed to upsert session"))?;

        for message in [user, agent] {
            let content = serde_json::to_string(&message.content)
                .map_err(|e| SessionError::StoreUnavailable(format!("unencodable message: {}", e)))?;

            sqlx::query(
                r#"
                INSERT INTO chat_messages (message_id, session_id, role, content, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(role_to_db(message.role))
            .bind(content)
            .bind(message.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(store_error("failed to insert message"))?;
        }

        // Dropping an uncommitted transaction rolls both inserts back.
        tx.commit().await.map_err(store_error("failed to commit turn"))?;
        Ok(())
    }

    async fn save_profile(&self, session_id: &str, profile: &ProfileHints) -> Result<(), SessionError> {
        self.ensure_schema().await?;
        let raw = serde_json::to_string(profile)
            .map_err(|e| SessionError::StoreUnavailable(format!("unencodable profile: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (session_id, profile) VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET profile = EXCLUDED.profile, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(store_error("failed to save profile"))?;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), SessionError> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM chat_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(store_error("failed to clear session"))?;
        Ok(())
    }
}
