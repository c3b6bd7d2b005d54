//! Session state machine: `Idle <-> Active(session)`.
//!
//! The controller never caches the active session beyond its own lifetime.
//! [`LifecycleController::restore`] re-derives it from the store, so a
//! crash between `start` and `stop` resumes the same session on the next run
//! instead of opening a second one.

use lumina_core::{SessionId, ValidationError};
use lumina_db::Database;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::buffer::BatchBuffer;
use crate::error::TrackerResult;
use crate::sensor::Sensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Active(SessionId),
}

impl LifecycleState {
    pub fn session(self) -> Option<SessionId> {
        match self {
            Self::Idle => None,
            Self::Active(id) => Some(id),
        }
    }
}

pub struct LifecycleController {
    db: Database,
    buffer: Arc<BatchBuffer>,
    sensor: Arc<dyn Sensor>,
    state: Mutex<LifecycleState>,
}

impl LifecycleController {
    /// Build a controller for the buffer's owner, re-entering `Active` if the
    /// store still has an open session for them.
    pub async fn restore(
        db: Database,
        buffer: Arc<BatchBuffer>,
        sensor: Arc<dyn Sensor>,
    ) -> TrackerResult<Self> {
        if buffer.owner().trim().is_empty() {
            return Err(ValidationError::EmptyEmail.into());
        }

        let state = match db.active_session(buffer.owner()).await? {
            Some(id) => {
                tracing::info!(owner = buffer.owner(), session_id = %id, "Resuming open session");
                buffer.activate(id);
                sensor.start(buffer.clone());
                LifecycleState::Active(id)
            }
            None => LifecycleState::Idle,
        };

        Ok(Self {
            db,
            buffer,
            sensor,
            state: Mutex::new(state),
        })
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    pub fn owner(&self) -> &str {
        self.buffer.owner()
    }

    pub fn buffer(&self) -> &Arc<BatchBuffer> {
        &self.buffer
    }

    /// The counter shown to the user: last recorded value, zero when idle.
    pub fn visible_count(&self) -> u32 {
        self.buffer.last_value()
    }

    /// `Idle -> Active`. Returns the active session; a no-op returning the
    /// current session when already active. A storage failure leaves the
    /// controller `Idle`.
    pub async fn start(&self, name: Option<&str>) -> TrackerResult<SessionId> {
        let mut state = self.state.lock().await;
        if let LifecycleState::Active(id) = *state {
            tracing::debug!(session_id = %id, "start() ignored, session already active");
            return Ok(id);
        }

        let id = self.db.create_session(self.owner(), name).await?;
        self.buffer.activate(id);
        self.sensor.start(self.buffer.clone());
        *state = LifecycleState::Active(id);

        tracing::info!(owner = self.owner(), session_id = %id, "Session started");
        Ok(id)
    }

    /// `Active -> Idle`. Returns the session that was closed, or `None` when
    /// already idle.
    ///
    /// Buffered samples are flushed before the sensor stops and once more for
    /// anything it recorded while stopping. If either flush or closing the
    /// session fails the controller stays `Active` with the sensor running,
    /// so the call can be retried without losing samples.
    pub async fn stop(&self) -> TrackerResult<Option<SessionId>> {
        let mut state = self.state.lock().await;
        let LifecycleState::Active(id) = *state else {
            return Ok(None);
        };

        self.buffer.flush().await?;
        self.sensor.stop().await;
        if let Err(e) = self.buffer.flush().await {
            self.sensor.start(self.buffer.clone());
            return Err(e);
        }

        if let Err(e) = self.db.end_session(id).await {
            self.sensor.start(self.buffer.clone());
            return Err(e.into());
        }
        self.buffer.deactivate();
        self.buffer.reset_counter();
        *state = LifecycleState::Idle;

        tracing::info!(owner = self.owner(), session_id = %id, "Session stopped");
        Ok(Some(id))
    }
}
