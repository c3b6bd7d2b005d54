//! Lock-free sync progress, written by the worker and read by the foreground.
//!
//! Counters use [`Ordering::Relaxed`]; readers only need eventually-visible,
//! monotonically increasing values, not cross-field consistency.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::RwLock;

/// How the most recent tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TickOutcome {
    /// No tick has run yet.
    Never = 0,
    /// Both phases ran. Individual phases may still have failed remotely.
    Completed = 1,
    /// No credential available.
    Skipped = 2,
    /// A local storage error aborted the tick.
    Failed = 3,
    /// Cancellation was observed before the tick finished.
    Cancelled = 4,
}

impl TickOutcome {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Never),
            1 => Some(Self::Completed),
            2 => Some(Self::Skipped),
            3 => Some(Self::Failed),
            4 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Label used for the `outcome` metric dimension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct SyncProgress {
    last_outcome: AtomicU8,
    ticks: AtomicUsize,
    failures: AtomicUsize,
    sessions_pushed: AtomicUsize,
    samples_pushed: AtomicUsize,
    /// Unix millis of the last tick where every phase succeeded; 0 = never.
    last_success_ms: AtomicI64,
    last_error: RwLock<Option<String>>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            last_outcome: AtomicU8::new(TickOutcome::Never as u8),
            ticks: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            sessions_pushed: AtomicUsize::new(0),
            samples_pushed: AtomicUsize::new(0),
            last_success_ms: AtomicI64::new(0),
            last_error: RwLock::new(None),
        }
    }

    // -- Outcome --------------------------------------------------------------

    pub fn last_outcome(&self) -> TickOutcome {
        let raw = self.last_outcome.load(Ordering::Relaxed);
        TickOutcome::from_u8(raw).unwrap_or(TickOutcome::Failed)
    }

    /// Record the end of a tick.
    pub fn finish_tick(&self, outcome: TickOutcome) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_outcome.store(outcome as u8, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }

    // -- Counters -------------------------------------------------------------

    pub fn sessions_pushed(&self) -> usize {
        self.sessions_pushed.load(Ordering::Relaxed)
    }

    pub fn add_sessions_pushed(&self, count: usize) -> usize {
        self.sessions_pushed.fetch_add(count, Ordering::Relaxed)
    }

    pub fn samples_pushed(&self) -> usize {
        self.samples_pushed.load(Ordering::Relaxed)
    }

    pub fn add_samples_pushed(&self, count: usize) -> usize {
        self.samples_pushed.fetch_add(count, Ordering::Relaxed)
    }

    /// Phase failures, local or remote, across all ticks.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    // -- Success / error ------------------------------------------------------

    pub fn mark_success(&self, at: DateTime<Utc>) {
        self.last_success_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
        match self.last_error.write() {
            Ok(mut guard) => *guard = None,
            Err(e) => tracing::error!("SyncProgress error lock poisoned during mark_success: {e}"),
        }
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Count a failure and keep its message for display.
    pub fn record_error(&self, msg: String) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        match self.last_error.write() {
            Ok(mut guard) => *guard = Some(msg),
            Err(e) => tracing::error!("SyncProgress error lock poisoned during record_error: {e}"),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        match self.last_error.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("SyncProgress error lock poisoned during read: {e}");
                None
            }
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        let progress = SyncProgress::new();
        assert_eq!(progress.last_outcome(), TickOutcome::Never);
        assert_eq!(progress.ticks(), 0);
        assert_eq!(progress.last_success(), None);
        assert_eq!(progress.last_error(), None);
    }

    #[test]
    fn test_outcome_roundtrip() {
        let progress = SyncProgress::new();
        for outcome in [
            TickOutcome::Completed,
            TickOutcome::Skipped,
            TickOutcome::Failed,
            TickOutcome::Cancelled,
        ] {
            progress.finish_tick(outcome);
            assert_eq!(progress.last_outcome(), outcome);
        }
        assert_eq!(progress.ticks(), 4);
        assert_eq!(TickOutcome::from_u8(200), None);
    }

    #[test]
    fn test_success_clears_error() {
        let progress = SyncProgress::new();
        progress.record_error("Network error: refused".into());
        assert_eq!(progress.failures(), 1);
        assert_eq!(progress.last_error().as_deref(), Some("Network error: refused"));

        let now = Utc::now();
        progress.mark_success(now);
        assert_eq!(progress.last_error(), None);
        assert_eq!(
            progress.last_success().map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
        assert_eq!(progress.failures(), 1, "failure count is cumulative");
    }

    #[test]
    fn test_concurrent_adds() {
        let progress = Arc::new(SyncProgress::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = progress.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        p.add_samples_pushed(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(progress.samples_pushed(), 800);
    }
}
