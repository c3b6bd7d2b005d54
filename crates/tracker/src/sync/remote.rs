//! Remote Authority contract and its HTTP client.
//!
//! - `POST /sync/sessions`: JSON array of [`SessionPayload`], `200 {ids: [...]}`
//!   with one remote id per submitted item, in request order.
//! - `POST /sync/blinks`: JSON array of [`SamplePayload`], `200 {status, received}`.
//!
//! Both require `Authorization: Bearer <token>`. Anything other than 200 is a
//! whole-batch failure.

use async_trait::async_trait;
use lumina_core::{format_timestamp, RemoteSessionId, Sample, Session};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote rejected the batch with status {status}")]
    RemoteRejected { status: u16 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Credential rejected by the remote")]
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub local_id: i64,
    pub name: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
}

impl From<&Session> for SessionPayload {
    fn from(session: &Session) -> Self {
        Self {
            local_id: session.local_id.0,
            name: session.display_name.clone(),
            start_time: format_timestamp(session.start_time),
            end_time: session.end_time.map(format_timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePayload {
    pub timestamp: String,
    pub count: u32,
    /// Remote session id, not the local one.
    pub session_id: Option<i64>,
}

impl SamplePayload {
    pub fn new(sample: &Sample, remote_session: Option<RemoteSessionId>) -> Self {
        Self {
            timestamp: format_timestamp(sample.timestamp),
            count: sample.value,
            session_id: remote_session.map(|r| r.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionIdsResponse {
    ids: Vec<i64>,
}

/// Acknowledgement body of `POST /sync/blinks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SampleAck {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub received: Option<usize>,
}

/// The service of record. Implementations must treat a returned `Ok` as
/// durable acceptance of the whole batch.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn push_sessions(
        &self,
        token: &str,
        idempotency_key: &str,
        sessions: &[SessionPayload],
    ) -> Result<Vec<RemoteSessionId>, RemoteError>;

    async fn push_samples(
        &self,
        token: &str,
        idempotency_key: &str,
        samples: &[SamplePayload],
    ) -> Result<SampleAck, RemoteError>;
}

/// Deterministic per-batch key: hex SHA-256 of the endpoint kind, the owner
/// and the ordered local ids. Resending the same rows yields the same key.
pub fn idempotency_key(kind: &str, owner: &str, local_ids: impl IntoIterator<Item = i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(owner.as_bytes());
    hasher.update([0u8]);
    for id in local_ids {
        hasher.update(id.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

/// reqwest-backed [`RemoteAuthority`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<reqwest::Response, RemoteError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::Unauthenticated),
            status => {
                let text = resp.text().await.unwrap_or_default();
                tracing::debug!(%status, path, body = %text, "Remote rejected batch");
                Err(RemoteError::RemoteRejected {
                    status: status.as_u16(),
                })
            }
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn push_sessions(
        &self,
        token: &str,
        idempotency_key: &str,
        sessions: &[SessionPayload],
    ) -> Result<Vec<RemoteSessionId>, RemoteError> {
        let resp = self.post("/sync/sessions", token, idempotency_key, sessions).await?;
        let body: SessionIdsResponse = resp
            .json()
            .await
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
        Ok(body.ids.into_iter().map(RemoteSessionId).collect())
    }

    async fn push_samples(
        &self,
        token: &str,
        idempotency_key: &str,
        samples: &[SamplePayload],
    ) -> Result<SampleAck, RemoteError> {
        let resp = self.post("/sync/blinks", token, idempotency_key, samples).await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lumina_core::{SampleId, SessionId, SyncState};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_idempotency_key_is_stable_and_scoped() {
        let a = idempotency_key("samples", "a@x.com", [1, 2, 3]);
        assert_eq!(a, idempotency_key("samples", "a@x.com", [1, 2, 3]));
        assert_eq!(a.len(), 64);
        assert_ne!(a, idempotency_key("sessions", "a@x.com", [1, 2, 3]));
        assert_ne!(a, idempotency_key("samples", "b@x.com", [1, 2, 3]));
        assert_ne!(a, idempotency_key("samples", "a@x.com", [1, 2, 4]));
    }

    #[test]
    fn test_payload_shapes() {
        let start = chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let session = Session {
            local_id: SessionId(7),
            owner_email: "a@x.com".into(),
            display_name: Some("desk".into()),
            start_time: start,
            end_time: None,
            sync_state: SyncState::Unsynced,
            remote_id: None,
            deleted: false,
        };
        assert_eq!(
            serde_json::to_value(SessionPayload::from(&session)).unwrap(),
            serde_json::json!({
                "local_id": 7,
                "name": "desk",
                "start_time": "2025-01-02T03:04:05.000Z",
                "end_time": null,
            })
        );

        let sample = Sample {
            local_id: SampleId(1),
            owner_email: "a@x.com".into(),
            timestamp: start,
            value: 4,
            session_local_id: Some(SessionId(7)),
            sync_state: SyncState::Unsynced,
        };
        assert_eq!(
            serde_json::to_value(SamplePayload::new(&sample, Some(RemoteSessionId(90)))).unwrap(),
            serde_json::json!({
                "timestamp": "2025-01-02T03:04:05.000Z",
                "count": 4,
                "session_id": 90,
            })
        );
    }

    #[tokio::test]
    async fn test_push_sessions_parses_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/sessions"))
            .and(header("authorization", "Bearer tok"))
            .and(header("idempotency-key", "k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ids": [11, 12]})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let payload = SessionPayload {
            local_id: 1,
            name: None,
            start_time: "2025-01-02T03:04:05.000Z".into(),
            end_time: None,
        };
        let ids = remote
            .push_sessions("tok", "k1", &[payload.clone(), SessionPayload { local_id: 2, ..payload }])
            .await
            .unwrap();
        assert_eq!(ids, vec![RemoteSessionId(11), RemoteSessionId(12)]);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/blinks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sync/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            remote.push_samples("tok", "k", &[]).await,
            Err(RemoteError::RemoteRejected { status: 500 })
        ));
        assert!(matches!(
            remote.push_sessions("tok", "k", &[]).await,
            Err(RemoteError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            remote.push_sessions("tok", "k", &[]).await,
            Err(RemoteError::MalformedResponse(_))
        ));
    }
}
