// crates/db/src/queries/row_types.rs
// Internal row types and their conversion into domain records.

use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use lumina_core::{
    parse_timestamp, RemoteSessionId, Sample, SampleId, Session, SessionId, SyncState,
};
use sqlx::Row;

/// Column list matching [`SessionRow`]'s `FromRow` impl.
pub(crate) const SESSION_COLUMNS: &str =
    "id, user_email, name, start_time, end_time, synced, cloud_session_id, deleted";

/// Column list matching [`SampleRow`]'s `FromRow` impl.
pub(crate) const SAMPLE_COLUMNS: &str = "id, user_email, timestamp, count, session_id, synced";

#[derive(Debug)]
pub(crate) struct SessionRow {
    id: i64,
    user_email: String,
    name: Option<String>,
    start_time: String,
    end_time: Option<String>,
    synced: i64,
    cloud_session_id: Option<i64>,
    deleted: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SessionRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_email: row.try_get("user_email")?,
            name: row.try_get("name")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            synced: row.try_get("synced")?,
            cloud_session_id: row.try_get("cloud_session_id")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

impl SessionRow {
    pub(crate) fn into_session(self) -> DbResult<Session> {
        let start_time = parse_column("sessions", self.id, "start_time", &self.start_time)?;
        let end_time = self
            .end_time
            .as_deref()
            .map(|raw| parse_column("sessions", self.id, "end_time", raw))
            .transpose()?;
        Ok(Session {
            local_id: SessionId(self.id),
            owner_email: self.user_email,
            display_name: self.name,
            start_time,
            end_time,
            sync_state: SyncState::from_db(self.synced),
            remote_id: self.cloud_session_id.map(RemoteSessionId),
            deleted: self.deleted != 0,
        })
    }
}

#[derive(Debug)]
pub(crate) struct SampleRow {
    id: i64,
    user_email: String,
    timestamp: String,
    count: i64,
    session_id: Option<i64>,
    synced: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SampleRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_email: row.try_get("user_email")?,
            timestamp: row.try_get("timestamp")?,
            count: row.try_get("count")?,
            session_id: row.try_get("session_id")?,
            synced: row.try_get("synced")?,
        })
    }
}

impl SampleRow {
    pub(crate) fn into_sample(self) -> DbResult<Sample> {
        let timestamp = parse_column("local_blinks", self.id, "timestamp", &self.timestamp)?;
        let value = u32::try_from(self.count).map_err(|_| DbError::Corrupt {
            table: "local_blinks",
            id: self.id,
            message: format!("count {} out of range", self.count),
        })?;
        Ok(Sample {
            local_id: SampleId(self.id),
            owner_email: self.user_email,
            timestamp,
            value,
            session_local_id: self.session_id.map(SessionId),
            sync_state: SyncState::from_db(self.synced),
        })
    }
}

fn parse_column(
    table: &'static str,
    id: i64,
    column: &str,
    raw: &str,
) -> DbResult<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| DbError::Corrupt {
        table,
        id,
        message: format!("unparseable {column} {raw:?}"),
    })
}

/// Convert a batch of rows, failing on the first corrupt one.
pub(crate) fn sessions_from_rows(rows: Vec<SessionRow>) -> DbResult<Vec<Session>> {
    rows.into_iter().map(SessionRow::into_session).collect()
}

pub(crate) fn samples_from_rows(rows: Vec<SampleRow>) -> DbResult<Vec<Sample>> {
    rows.into_iter().map(SampleRow::into_sample).collect()
}
