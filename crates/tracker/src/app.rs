//! Wires the capture pipeline and the sync worker together for a long-running
//! process, and tears them down in a data-safe order.

use lumina_core::Config;
use lumina_db::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{spawn_flush_timer, BatchBuffer};
use crate::error::TrackerResult;
use crate::lifecycle::LifecycleController;
use crate::sensor::Sensor;
use crate::sync::{RemoteAuthority, SharedUser, SyncHandle, SyncProgress, SyncWorker};

pub struct TrackerApp {
    db: Database,
    lifecycle: LifecycleController,
    progress: Arc<SyncProgress>,
    timer_cancel: CancellationToken,
    flush_timer: JoinHandle<()>,
    sync: SyncHandle,
    shutdown_grace: Duration,
}

impl TrackerApp {
    /// Restore any open session for the user, then start the flush timer and
    /// the sync worker.
    pub async fn start(
        config: &Config,
        db: Database,
        user: SharedUser,
        remote: Arc<dyn RemoteAuthority>,
        sensor: Arc<dyn Sensor>,
    ) -> TrackerResult<Self> {
        crate::metrics::describe_metrics();

        let owner = match user.read() {
            Ok(u) => u.email.clone(),
            Err(poisoned) => poisoned.into_inner().email.clone(),
        };
        let buffer = Arc::new(BatchBuffer::new(db.clone(), owner, config.batch_size));
        let lifecycle = LifecycleController::restore(db.clone(), buffer.clone(), sensor).await?;

        let timer_cancel = CancellationToken::new();
        let flush_timer = spawn_flush_timer(buffer, config.flush_interval, timer_cancel.clone());

        let worker = Arc::new(SyncWorker::new(db.clone(), remote, user, config));
        let progress = worker.progress();
        let sync = worker.spawn(config.sync_interval, CancellationToken::new());

        tracing::info!(
            owner = lifecycle.owner(),
            batch_size = config.batch_size,
            flush_secs = config.flush_interval.as_secs(),
            sync_secs = config.sync_interval.as_secs(),
            "Tracker started"
        );

        Ok(Self {
            db,
            lifecycle,
            progress,
            timer_cancel,
            flush_timer,
            sync,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn progress(&self) -> &Arc<SyncProgress> {
        &self.progress
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Close the active session (final flush included), stop the timer, give
    /// the sync worker `shutdown_grace` to finish its tick, then close the
    /// store. A storage error from the final flush is returned after the
    /// remaining teardown has run.
    pub async fn shutdown(self) -> TrackerResult<()> {
        let stopped = self.lifecycle.stop().await;
        if let Err(e) = &stopped {
            tracing::error!(error = %e, "Final flush failed during shutdown");
        }

        self.timer_cancel.cancel();
        if let Err(e) = self.flush_timer.await {
            tracing::warn!(error = %e, "Flush timer ended abnormally");
        }

        if !self.sync.shutdown(self.shutdown_grace).await {
            tracing::warn!("Closing the store while a sync tick is still in flight");
        }

        self.db.close().await;
        tracing::info!("Tracker stopped");
        stopped.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::sensor::NoopSensor;
    use crate::sync::{RemoteError, SampleAck, SamplePayload, SessionPayload};
    use async_trait::async_trait;
    use lumina_core::{RemoteSessionId, User};
    use std::sync::RwLock;

    struct Offline;

    #[async_trait]
    impl RemoteAuthority for Offline {
        async fn push_sessions(
            &self,
            _token: &str,
            _key: &str,
            _sessions: &[SessionPayload],
        ) -> Result<Vec<RemoteSessionId>, RemoteError> {
            Err(RemoteError::RemoteRejected { status: 503 })
        }

        async fn push_samples(
            &self,
            _token: &str,
            _key: &str,
            _samples: &[SamplePayload],
        ) -> Result<SampleAck, RemoteError> {
            Err(RemoteError::RemoteRejected { status: 503 })
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes_session() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lumina.db");
        let db = Database::new(&path).await.unwrap();
        let user = Arc::new(RwLock::new(User::new("a@x.com").with_token("tok")));

        let app = TrackerApp::start(
            &Config::default(),
            db,
            user,
            Arc::new(Offline),
            Arc::new(NoopSensor::new()),
        )
        .await
        .unwrap();

        let id = app.lifecycle().start(None).await.unwrap();
        for v in 1..=3 {
            app.lifecycle().buffer().record(v).await.unwrap();
        }
        assert_eq!(app.lifecycle().state().await, LifecycleState::Active(id));
        app.shutdown().await.unwrap();

        let db = Database::new(&path).await.unwrap();
        assert_eq!(db.active_session("a@x.com").await.unwrap(), None);
        assert_eq!(db.samples_for_session(id).await.unwrap().len(), 3);
        assert_eq!(db.pending_counts("a@x.com").await.unwrap().samples, 3);
    }
}
