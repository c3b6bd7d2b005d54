// crates/db/src/queries/sessions.rs
// Session lifecycle and sync bookkeeping.

use crate::{Database, DbResult};
use chrono::Utc;
use lumina_core::{format_timestamp, RemoteSessionId, Session, SessionId, SessionSummary};
use std::collections::HashMap;

use super::row_types::{sessions_from_rows, SessionRow, SESSION_COLUMNS};

/// Blank names are stored as NULL so listings fall back to the start time.
fn normalize_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

impl Database {
    /// Open a new session for `owner`, stamped with the current time.
    ///
    /// Does not check for an existing open session; the lifecycle controller
    /// owns the single-active-session rule.
    pub async fn create_session(&self, owner: &str, name: Option<&str>) -> DbResult<SessionId> {
        let start_time = format_timestamp(Utc::now());
        let _guard = self.write_lock().await;
        let result = sqlx::query(
            "INSERT INTO sessions (user_email, name, start_time, synced, deleted)
             VALUES (?, ?, ?, 0, 0)",
        )
        .bind(owner)
        .bind(normalize_name(name))
        .bind(&start_time)
        .execute(self.pool())
        .await?;

        let id = SessionId(result.last_insert_rowid());
        tracing::debug!(owner, session_id = %id, "Session created");
        Ok(id)
    }

    /// Close a session. Returns `false` when it was already closed (or does
    /// not exist), which is not an error.
    pub async fn end_session(&self, id: SessionId) -> DbResult<bool> {
        let end_time = format_timestamp(Utc::now());
        let _guard = self.write_lock().await;
        let result = sqlx::query(
            "UPDATE sessions SET end_time = ? WHERE id = ? AND end_time IS NULL",
        )
        .bind(&end_time)
        .bind(id.0)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The most recently started open, non-deleted session for `owner`.
    pub async fn active_session(&self, owner: &str) -> DbResult<Option<SessionId>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM sessions
             WHERE user_email = ? AND end_time IS NULL AND deleted = 0
             ORDER BY start_time DESC, id DESC
             LIMIT 1",
        )
        .bind(owner)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id,)| SessionId(id)))
    }

    /// Fetch a single non-deleted session.
    pub async fn get_session(&self, id: SessionId) -> DbResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ? AND deleted = 0"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// All non-deleted sessions for `owner`, newest first.
    pub async fn list_sessions(&self, owner: &str) -> DbResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_email = ? AND deleted = 0
             ORDER BY start_time DESC, id DESC"
        ))
        .bind(owner)
        .fetch_all(self.pool())
        .await?;
        sessions_from_rows(rows)
    }

    pub async fn rename_session(&self, id: SessionId, name: Option<&str>) -> DbResult<()> {
        let _guard = self.write_lock().await;
        sqlx::query("UPDATE sessions SET name = ? WHERE id = ?")
            .bind(normalize_name(name))
            .bind(id.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Hide a session from every listing and active-session query. The row
    /// and its samples stay on disk.
    pub async fn soft_delete_session(&self, id: SessionId) -> DbResult<()> {
        let _guard = self.write_lock().await;
        sqlx::query("UPDATE sessions SET deleted = 1 WHERE id = ?")
            .bind(id.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Oldest-first unsynced, non-deleted sessions, capped at `limit`.
    pub async fn unsynced_sessions(&self, owner: &str, limit: u32) -> DbResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_email = ? AND synced = 0 AND deleted = 0
             ORDER BY id ASC
             LIMIT ?"
        ))
        .bind(owner)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        sessions_from_rows(rows)
    }

    /// Mark a session synced, recording the remote id when one is given.
    ///
    /// Idempotent: a repeat call leaves the row unchanged, and a call without
    /// a remote id never clears one recorded earlier.
    pub async fn mark_session_synced(
        &self,
        id: SessionId,
        remote_id: Option<RemoteSessionId>,
    ) -> DbResult<()> {
        let _guard = self.write_lock().await;
        sqlx::query(
            "UPDATE sessions
             SET synced = 1, cloud_session_id = COALESCE(?, cloud_session_id)
             WHERE id = ?",
        )
        .bind(remote_id.map(|r| r.0))
        .bind(id.0)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remote ids for the given local sessions. Sessions not yet synced are absent.
    pub async fn remote_session_ids(
        &self,
        ids: &[SessionId],
    ) -> DbResult<HashMap<SessionId, RemoteSessionId>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, cloud_session_id FROM sessions
             WHERE id IN ({placeholders}) AND cloud_session_id IS NOT NULL"
        );
        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
        for id in ids {
            query = query.bind(id.0);
        }
        for (local, remote) in query.fetch_all(self.pool()).await? {
            out.insert(SessionId(local), RemoteSessionId(remote));
        }
        Ok(out)
    }

    /// Sample count and peak value for one session.
    pub async fn session_summary(&self, id: SessionId) -> DbResult<SessionSummary> {
        let (sample_count, peak): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(count) FROM local_blinks WHERE session_id = ?",
        )
        .bind(id.0)
        .fetch_one(self.pool())
        .await?;
        Ok(SessionSummary {
            sample_count,
            peak_value: peak.and_then(|p| u32::try_from(p).ok()),
        })
    }
}
