//! In-memory batching between the sample producer and the local store.
//!
//! The producer appends under a short `std::sync::Mutex`; the lock is never
//! held across the storage call. Flushes are serialized by a second, async
//! gate so batches commit in capture order.

use chrono::Utc;
use lumina_core::{NewSample, SessionId};
use lumina_db::Database;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TrackerResult;

/// What happened to a value handed to [`BatchBuffer::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Held in memory until the next flush.
    Buffered,
    /// Reached the batch size; this many samples were committed.
    Flushed(usize),
    /// No session is active, so the value was dropped.
    Rejected,
}

#[derive(Debug, Default)]
struct Pending {
    session: Option<SessionId>,
    samples: Vec<NewSample>,
}

pub struct BatchBuffer {
    db: Database,
    owner: String,
    batch_size: usize,
    pending: Mutex<Pending>,
    flush_gate: tokio::sync::Mutex<()>,
    last_value: AtomicU32,
}

impl BatchBuffer {
    pub fn new(db: Database, owner: impl Into<String>, batch_size: usize) -> Self {
        Self {
            db,
            owner: owner.into(),
            batch_size: batch_size.max(1),
            pending: Mutex::new(Pending::default()),
            flush_gate: tokio::sync::Mutex::new(()),
            last_value: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("BatchBuffer lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Start accepting samples for `session`. Anything still buffered for a
    /// previous session is dropped.
    pub fn activate(&self, session: SessionId) {
        let mut pending = self.lock();
        pending.session = Some(session);
        pending.samples.clear();
    }

    /// Stop accepting samples. Returns how many buffered samples were dropped;
    /// callers flush first, so this is normally zero.
    pub fn deactivate(&self) -> usize {
        let mut pending = self.lock();
        pending.session = None;
        let dropped = pending.samples.len();
        pending.samples.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "Discarded samples buffered without a session");
        }
        dropped
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.lock().session
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent accepted value, for display.
    pub fn last_value(&self) -> u32 {
        self.last_value.load(Ordering::Relaxed)
    }

    pub fn reset_counter(&self) {
        self.last_value.store(0, Ordering::Relaxed);
    }

    /// Append `(now, value)`. Triggers an immediate flush once the batch size
    /// is reached.
    pub async fn record(&self, value: u32) -> TrackerResult<RecordOutcome> {
        let full = {
            let mut pending = self.lock();
            if pending.session.is_none() {
                return Ok(RecordOutcome::Rejected);
            }
            pending.samples.push(NewSample::at(Utc::now(), value));
            self.last_value.store(value, Ordering::Relaxed);
            pending.samples.len() >= self.batch_size
        };

        if full {
            let flushed = self.flush().await?;
            Ok(RecordOutcome::Flushed(flushed))
        } else {
            Ok(RecordOutcome::Buffered)
        }
    }

    /// Hand everything buffered to the store as one transaction.
    ///
    /// A no-op without an active session or with nothing buffered. On a
    /// storage error the drained samples are put back in front of anything
    /// recorded meanwhile, and the error is returned.
    pub async fn flush(&self) -> TrackerResult<usize> {
        let _gate = self.flush_gate.lock().await;

        let (session, batch) = {
            let mut pending = self.lock();
            match pending.session {
                Some(session) if !pending.samples.is_empty() => {
                    (session, std::mem::take(&mut pending.samples))
                }
                _ => return Ok(0),
            }
        };

        match self
            .db
            .insert_samples_batch(&self.owner, Some(session), &batch)
            .await
        {
            Ok(ids) => {
                crate::metrics::record_flush(ids.len());
                tracing::debug!(session_id = %session, count = ids.len(), "Buffer flushed");
                Ok(ids.len())
            }
            Err(e) => {
                let mut pending = self.lock();
                if pending.session == Some(session) {
                    let newer = std::mem::replace(&mut pending.samples, batch);
                    pending.samples.extend(newer);
                }
                Err(e.into())
            }
        }
    }
}

/// Flush `buffer` every `interval` until `cancel` fires. Errors are logged
/// and swallowed so the timer never dies.
pub fn spawn_flush_timer(
    buffer: Arc<BatchBuffer>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = buffer.flush().await {
                        tracing::warn!(error = %e, "Timer flush failed (will retry)");
                    }
                }
            }
        }
        tracing::debug!("Flush timer stopped");
    })
}
