//! Background reconciliation loop.
//!
//! Each tick pushes unsynced sessions, then unsynced samples, and marks rows
//! synced only after the remote acknowledged the batch. Nothing escapes a
//! tick: failures are logged, counted in [`SyncProgress`] and retried on the
//! next interval.

use chrono::Utc;
use lumina_core::{Config, SampleId, SessionId, User};
use lumina_db::{Database, DbError};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::progress::{SyncProgress, TickOutcome};
use super::remote::{idempotency_key, RemoteAuthority, RemoteError, SamplePayload, SessionPayload};

/// Identity shared between the foreground (login/logout) and the worker.
pub type SharedUser = Arc<RwLock<User>>;

#[derive(Debug, Error)]
enum PhaseError {
    #[error(transparent)]
    Storage(#[from] DbError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub struct SyncWorker {
    db: Database,
    remote: Arc<dyn RemoteAuthority>,
    user: SharedUser,
    progress: Arc<SyncProgress>,
    session_limit: u32,
    sample_limit: u32,
    request_timeout: Duration,
}

impl SyncWorker {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteAuthority>,
        user: SharedUser,
        config: &Config,
    ) -> Self {
        Self {
            db,
            remote,
            user,
            progress: Arc::new(SyncProgress::new()),
            session_limit: config.session_push_limit,
            sample_limit: config.sample_push_limit,
            request_timeout: config.request_timeout,
        }
    }

    pub fn progress(&self) -> Arc<SyncProgress> {
        self.progress.clone()
    }

    fn credentials(&self) -> Option<(String, String)> {
        let user = match self.user.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("User lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let token = user.bearer()?.to_string();
        if user.email.trim().is_empty() {
            return None;
        }
        Some((user.email.clone(), token))
    }

    /// Run one tick. Never fails; the outcome is also recorded in
    /// [`SyncProgress`] and the `sync_ticks_total` metric.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickOutcome {
        let started = Instant::now();
        let outcome = self.run_tick(cancel).await;
        let elapsed = started.elapsed();

        self.progress.finish_tick(outcome);
        crate::metrics::record_tick(outcome.as_str(), elapsed);
        tracing::debug!(
            outcome = outcome.as_str(),
            duration_secs = elapsed.as_secs_f64(),
            "Sync tick finished"
        );
        outcome
    }

    async fn run_tick(&self, cancel: &CancellationToken) -> TickOutcome {
        if cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        let Some((owner, token)) = self.credentials() else {
            tracing::debug!("No credential, skipping sync tick");
            return TickOutcome::Skipped;
        };

        let mut clean = true;

        match self.push_sessions(&owner, &token).await {
            Ok(pushed) => {
                self.progress.add_sessions_pushed(pushed);
                crate::metrics::record_pushed("sessions", pushed);
            }
            Err(e) => {
                clean = false;
                if let Some(outcome) = self.phase_failed("sessions", e) {
                    return outcome;
                }
            }
        }

        if cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }

        match self.push_samples(&owner, &token).await {
            Ok(pushed) => {
                self.progress.add_samples_pushed(pushed);
                crate::metrics::record_pushed("samples", pushed);
            }
            Err(e) => {
                clean = false;
                if let Some(outcome) = self.phase_failed("samples", e) {
                    return outcome;
                }
            }
        }

        if clean {
            self.progress.mark_success(Utc::now());
        }
        TickOutcome::Completed
    }

    /// Log and count a phase failure. A storage error ends the tick; a remote
    /// error lets the next phase run.
    fn phase_failed(&self, phase: &'static str, err: PhaseError) -> Option<TickOutcome> {
        tracing::warn!(phase, error = %err, "Sync phase failed (will retry next tick)");
        self.progress.record_error(format!("{phase}: {err}"));
        match err {
            PhaseError::Storage(_) => Some(TickOutcome::Failed),
            PhaseError::Remote(_) => None,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| RemoteError::Timeout(self.request_timeout))?
    }

    async fn push_sessions(&self, owner: &str, token: &str) -> Result<usize, PhaseError> {
        let sessions = self.db.unsynced_sessions(owner, self.session_limit).await?;
        if sessions.is_empty() {
            return Ok(0);
        }

        let payload: Vec<SessionPayload> = sessions.iter().map(SessionPayload::from).collect();
        let key = idempotency_key("sessions", owner, sessions.iter().map(|s| s.local_id.0));
        let remote_ids = self
            .bounded(self.remote.push_sessions(token, &key, &payload))
            .await?;

        if remote_ids.len() != sessions.len() {
            return Err(RemoteError::MalformedResponse(format!(
                "expected {} session ids, got {}",
                sessions.len(),
                remote_ids.len()
            ))
            .into());
        }

        for (session, remote_id) in sessions.iter().zip(remote_ids) {
            self.db
                .mark_session_synced(session.local_id, Some(remote_id))
                .await?;
        }
        tracing::info!(owner, count = sessions.len(), "Sessions synced");
        Ok(sessions.len())
    }

    async fn push_samples(&self, owner: &str, token: &str) -> Result<usize, PhaseError> {
        let samples = self.db.unsynced_samples(owner, self.sample_limit).await?;
        if samples.is_empty() {
            return Ok(0);
        }

        let linked: Vec<SessionId> = samples
            .iter()
            .filter_map(|s| s.session_local_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let remote_sessions = self.db.remote_session_ids(&linked).await?;

        let payload: Vec<SamplePayload> = samples
            .iter()
            .map(|s| {
                let remote = s
                    .session_local_id
                    .and_then(|id| remote_sessions.get(&id).copied());
                SamplePayload::new(s, remote)
            })
            .collect();
        let ids: Vec<SampleId> = samples.iter().map(|s| s.local_id).collect();
        let key = idempotency_key("samples", owner, ids.iter().map(|id| id.0));

        let ack = self
            .bounded(self.remote.push_samples(token, &key, &payload))
            .await?;
        if let Some(received) = ack.received.filter(|n| *n != ids.len()) {
            tracing::warn!(sent = ids.len(), received, "Remote acknowledged a different sample count");
        }

        self.db.mark_samples_synced(&ids).await?;
        tracing::info!(owner, count = ids.len(), status = %ack.status, "Samples synced");
        Ok(ids.len())
    }

    /// Run [`Self::tick`] every `interval` until `cancel` fires. The first
    /// tick runs immediately.
    ///
    /// Sessions are pushed while still open and are not re-pushed once they
    /// end, so the remote copy keeps `end_time: null`.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> SyncHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick(&token).await;
                    }
                }
            }
            tracing::debug!("Sync worker stopped");
        });
        SyncHandle { cancel, task }
    }
}

/// Owner side of a spawned [`SyncWorker`].
pub struct SyncHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Request a cooperative stop and wait up to `grace` for the loop to
    /// exit. Returns `false` if it was still busy; the task is left to finish
    /// its in-flight work on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Sync worker task ended abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(grace_secs = grace.as_secs_f64(), "Sync worker did not stop in time");
                false
            }
        }
    }
}
