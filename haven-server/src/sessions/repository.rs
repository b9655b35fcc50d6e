//! Session persistence

use crate::error::Result;
use chrono::{DateTime, Utc};
use haven_common::db::{Participant, Session, SessionCompletionTrigger};
use sqlx::SqlitePool;
use uuid::Uuid;

pub const ROLE_HOST: &str = "host";
pub const ROLE_GUEST: &str = "guest";

#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a session and its creator as host in one transaction
    ///
    /// Returns false when the invite code is already taken.
    pub async fn insert_with_host(&self, session: &Session) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (
                id, kind, status, creator_id, invite_code, invite_expires_at,
                conversation_id, conversation_url, fallback_mode,
                max_duration_minutes, minutes_consumed, started_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.kind.as_str())
        .bind(session.status.as_str())
        .bind(&session.creator_id)
        .bind(&session.invite_code)
        .bind(session.invite_expires_at)
        .bind(&session.conversation_id)
        .bind(&session.conversation_url)
        .bind(session.fallback_mode)
        .bind(session.max_duration_minutes as i64)
        .bind(session.started_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            "INSERT INTO session_participants (session_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(&session.creator_id)
        .bind(ROLE_HOST)
        .bind(session.started_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Add a guest; joining twice is a no-op
    pub async fn add_participant(
        &self,
        session_id: Uuid,
        user_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO session_participants (session_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id.to_string())
        .bind(user_id)
        .bind(ROLE_GUEST)
        .bind(joined_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut session = Session::from_row(&row)?;
                session.participants = self.participants(session_id).await?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn find_by_invite_code(&self, code: &str) -> Result<Option<Session>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM sessions WHERE invite_code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        match id.and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        let rows = sqlx::query(
            "SELECT * FROM session_participants WHERE session_id = ? ORDER BY julianday(joined_at), user_id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut participants = Vec::with_capacity(rows.len());
        for row in &rows {
            participants.push(Participant::from_row(row)?);
        }
        Ok(participants)
    }

    /// Move an active session to completed
    ///
    /// Only the first call for a session applies; the return value says
    /// whether this call did.
    pub async fn mark_completed(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
        minutes_consumed: u32,
        trigger: SessionCompletionTrigger,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'completed',
                ended_at = ?,
                minutes_consumed = ?,
                completion_trigger = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(ended_at)
        .bind(minutes_consumed as i64)
        .bind(trigger.as_str())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Sessions the user created or joined, started at or after `since`,
    /// newest first
    pub async fn list_for_user(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM sessions s
            WHERE (s.creator_id = ?1
                   OR EXISTS (SELECT 1 FROM session_participants p
                              WHERE p.session_id = s.id AND p.user_id = ?1))
              AND julianday(s.started_at) >= julianday(?2)
            ORDER BY julianday(s.started_at) DESC, s.id
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut session = Session::from_row(row)?;
            session.participants = self.participants(session.id).await?;
            sessions.push(session);
        }
        Ok(sessions)
    }
}
