// crates/core/src/types.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Locally assigned session identifier (SQLite rowid, monotonic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

/// Locally assigned sample identifier. Doubles as the resend cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub i64);

/// Identifier handed out by the remote authority for a pushed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteSessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RemoteSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a local record has been acknowledged by the remote authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Unsynced,
    Synced,
}

impl SyncState {
    /// Map the `synced` INTEGER column. Anything non-zero counts as synced.
    pub fn from_db(v: i64) -> Self {
        if v == 0 {
            Self::Unsynced
        } else {
            Self::Synced
        }
    }

    pub fn is_synced(self) -> bool {
        self == Self::Synced
    }
}

/// A bounded capture interval for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub local_id: SessionId,
    pub owner_email: String,
    pub display_name: Option<String>,
    pub start_time: DateTime<Utc>,
    /// `None` while the session is still open.
    pub end_time: Option<DateTime<Utc>>,
    pub sync_state: SyncState,
    pub remote_id: Option<RemoteSessionId>,
    pub deleted: bool,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed time of the session; open sessions are measured up to `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }
}

/// One captured value. Append-only apart from `sync_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub local_id: SampleId,
    pub owner_email: String,
    pub timestamp: DateTime<Utc>,
    pub value: u32,
    /// `None` marks an unassigned (legacy) sample.
    pub session_local_id: Option<SessionId>,
    pub sync_state: SyncState,
}

/// A sample awaiting insertion. A missing timestamp is stamped at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSample {
    pub timestamp: Option<DateTime<Utc>>,
    pub value: u32,
}

impl NewSample {
    pub fn at(timestamp: DateTime<Utc>, value: u32) -> Self {
        Self {
            timestamp: Some(timestamp),
            value,
        }
    }

    pub fn now(value: u32) -> Self {
        Self {
            timestamp: None,
            value,
        }
    }
}

/// Per-session aggregate used by listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub sample_count: i64,
    pub peak_value: Option<u32>,
}

/// The signed-in identity. `token` is absent while offline or logged out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Bearer credential, ignoring empty strings left behind by a bad login.
    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Canonical on-disk and on-wire timestamp form: RFC 3339, millisecond precision, UTC.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Accepts RFC 3339 and the naive ISO form older
/// databases were written with, which holds local wall-clock time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(chrono::Local).earliest())
        .map(|ts| ts.with_timezone(&Utc))
}
