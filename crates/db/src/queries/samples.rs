// crates/db/src/queries/samples.rs
//! Blink sample persistence: batched inserts, the resend cursor, sync marking.

use crate::{Database, DbResult};
use chrono::Utc;
use lumina_core::{format_timestamp, NewSample, Sample, SampleId, SessionId};

use super::row_types::{samples_from_rows, SampleRow, SAMPLE_COLUMNS};

/// Stay well under SQLite's bound-parameter limit for `IN (...)` lists.
const MARK_CHUNK: usize = 500;

/// Rows still waiting for remote acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub sessions: i64,
    pub samples: i64,
}

impl Database {
    /// Insert a batch of samples in a single transaction.
    ///
    /// `session` is `None` for unassigned samples. Samples without their own
    /// timestamp all receive the same insert-time stamp. Returns the new ids
    /// in input order.
    pub async fn insert_samples_batch(
        &self,
        owner: &str,
        session: Option<SessionId>,
        samples: &[NewSample],
    ) -> DbResult<Vec<SampleId>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let now = format_timestamp(Utc::now());
        let mut ids = Vec::with_capacity(samples.len());

        let _guard = self.write_lock().await;
        let mut tx = self.pool().begin().await?;
        for sample in samples {
            let timestamp = sample.timestamp.map(format_timestamp);
            let result = sqlx::query(
                "INSERT INTO local_blinks (user_email, timestamp, count, session_id, synced)
                 VALUES (?, ?, ?, ?, 0)",
            )
            .bind(owner)
            .bind(timestamp.as_deref().unwrap_or(&now))
            .bind(i64::from(sample.value))
            .bind(session.map(|s| s.0))
            .execute(&mut *tx)
            .await?;
            ids.push(SampleId(result.last_insert_rowid()));
        }
        tx.commit().await?;

        tracing::debug!(owner, count = ids.len(), "Sample batch committed");
        Ok(ids)
    }

    /// Oldest-first unsynced samples for `owner`, capped at `limit`.
    pub async fn unsynced_samples(&self, owner: &str, limit: u32) -> DbResult<Vec<Sample>> {
        let rows: Vec<SampleRow> = sqlx::query_as(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM local_blinks
             WHERE user_email = ? AND synced = 0
             ORDER BY id ASC
             LIMIT ?"
        ))
        .bind(owner)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        samples_from_rows(rows)
    }

    /// Mark samples synced. Already-synced and unknown ids are ignored.
    /// Returns how many rows actually changed state.
    pub async fn mark_samples_synced(&self, ids: &[SampleId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut changed = 0;
        let _guard = self.write_lock().await;
        let mut tx = self.pool().begin().await?;
        for chunk in ids.chunks(MARK_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "UPDATE local_blinks SET synced = 1 WHERE synced = 0 AND id IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.0);
            }
            changed += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Every sample attached to a session, in capture order.
    pub async fn samples_for_session(&self, session: SessionId) -> DbResult<Vec<Sample>> {
        let rows: Vec<SampleRow> = sqlx::query_as(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM local_blinks
             WHERE session_id = ?
             ORDER BY timestamp ASC, id ASC"
        ))
        .bind(session.0)
        .fetch_all(self.pool())
        .await?;
        samples_from_rows(rows)
    }

    /// Size of the sync backlog for `owner`.
    pub async fn pending_counts(&self, owner: &str) -> DbResult<PendingCounts> {
        let (sessions,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sessions WHERE user_email = ? AND synced = 0 AND deleted = 0",
        )
        .bind(owner)
        .fetch_one(self.pool())
        .await?;
        let (samples,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM local_blinks WHERE user_email = ? AND synced = 0",
        )
        .bind(owner)
        .fetch_one(self.pool())
        .await?;
        Ok(PendingCounts { sessions, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lumina_core::SyncState;

    #[tokio::test]
    async fn test_insert_batch_assigns_ascending_ids() {
        let db = Database::new_in_memory().await.unwrap();
        let session = db.create_session("a@x.com", None).await.unwrap();

        let ids = db
            .insert_samples_batch(
                "a@x.com",
                Some(session),
                &[NewSample::now(1), NewSample::now(2), NewSample::now(3)],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![SampleId(1), SampleId(2), SampleId(3)]);

        let rows = db.samples_for_session(session).await.unwrap();
        assert_eq!(rows.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(rows.iter().all(|s| s.sync_state == SyncState::Unsynced));
        assert!(rows.iter().all(|s| s.session_local_id == Some(session)));
    }

    #[tokio::test]
    async fn test_insert_empty_batch() {
        let db = Database::new_in_memory().await.unwrap();
        let ids = db.insert_samples_batch("a@x.com", None, &[]).await.unwrap();
        assert!(ids.is_empty());
        assert!(db.unsynced_samples("a@x.com", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_keeps_per_sample_timestamps() {
        let db = Database::new_in_memory().await.unwrap();
        let captured = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();

        db.insert_samples_batch(
            "a@x.com",
            None,
            &[NewSample::at(captured, 4), NewSample::now(5)],
        )
        .await
        .unwrap();

        let rows = db.unsynced_samples("a@x.com", 50).await.unwrap();
        assert_eq!(rows[0].timestamp, captured);
        assert!(rows[1].timestamp > captured, "missing timestamp is stamped at insert");
        assert_eq!(rows[0].session_local_id, None);
    }

    #[tokio::test]
    async fn test_unsynced_samples_scoped_and_limited() {
        let db = Database::new_in_memory().await.unwrap();
        let batch: Vec<NewSample> = (0..5).map(NewSample::now).collect();
        db.insert_samples_batch("a@x.com", None, &batch).await.unwrap();
        db.insert_samples_batch("b@x.com", None, &batch).await.unwrap();

        let rows = db.unsynced_samples("a@x.com", 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|s| s.owner_email == "a@x.com"));
        assert!(rows.windows(2).all(|w| w[0].local_id < w[1].local_id));
    }

    #[tokio::test]
    async fn test_mark_samples_synced_twice_is_identical() {
        let db = Database::new_in_memory().await.unwrap();
        let ids = db
            .insert_samples_batch("a@x.com", None, &[NewSample::now(1), NewSample::now(2)])
            .await
            .unwrap();

        assert_eq!(db.mark_samples_synced(&ids).await.unwrap(), 2);
        let after_once: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, synced FROM local_blinks ORDER BY id")
                .fetch_all(db.pool())
                .await
                .unwrap();

        assert_eq!(db.mark_samples_synced(&ids).await.unwrap(), 0);
        let after_twice: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, synced FROM local_blinks ORDER BY id")
                .fetch_all(db.pool())
                .await
                .unwrap();

        assert_eq!(after_once, after_twice);
        assert!(db.unsynced_samples("a@x.com", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_samples_synced_spans_chunks() {
        let db = Database::new_in_memory().await.unwrap();
        let batch: Vec<NewSample> = (0..1_200).map(NewSample::now).collect();
        let ids = db.insert_samples_batch("a@x.com", None, &batch).await.unwrap();

        assert_eq!(db.mark_samples_synced(&ids).await.unwrap(), 1_200);
        assert_eq!(db.pending_counts("a@x.com").await.unwrap().samples, 0);
    }

    #[tokio::test]
    async fn test_pending_counts() {
        let db = Database::new_in_memory().await.unwrap();
        let s = db.create_session("a@x.com", None).await.unwrap();
        let deleted = db.create_session("a@x.com", None).await.unwrap();
        db.soft_delete_session(deleted).await.unwrap();
        db.insert_samples_batch("a@x.com", Some(s), &[NewSample::now(1), NewSample::now(2)])
            .await
            .unwrap();

        let counts = db.pending_counts("a@x.com").await.unwrap();
        assert_eq!(counts, PendingCounts { sessions: 1, samples: 2 });
    }
}
