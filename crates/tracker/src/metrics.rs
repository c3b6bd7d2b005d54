//! Capture and sync metrics.
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the
//! embedding process installs a recorder; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::Once;
use std::time::Duration;

static DESCRIBE: Once = Once::new();

/// Register metric descriptions with whatever recorder is installed.
/// Safe to call repeatedly.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "samples_flushed_total",
            "Samples committed to the local store by the batching buffer"
        );
        describe_counter!("sync_ticks_total", "Sync worker ticks by outcome");
        describe_counter!(
            "sync_items_pushed_total",
            "Records acknowledged by the remote authority"
        );
        describe_histogram!("sync_duration_seconds", "Duration of one sync tick in seconds");
    });
}

/// Record a committed buffer flush.
pub fn record_flush(samples: usize) {
    counter!("samples_flushed_total").increment(samples as u64);
}

/// Record a finished sync tick.
///
/// # Arguments
/// * `outcome` - "completed", "skipped", "failed" or "cancelled"
/// * `duration` - Wall time of the tick
pub fn record_tick(outcome: &'static str, duration: Duration) {
    counter!("sync_ticks_total", "outcome" => outcome).increment(1);
    histogram!("sync_duration_seconds").record(duration.as_secs_f64());
}

/// Record records acknowledged by the remote side.
///
/// # Arguments
/// * `kind` - "sessions" or "samples"
pub fn record_pushed(kind: &'static str, count: usize) {
    if count > 0 {
        counter!("sync_items_pushed_total", "kind" => kind).increment(count as u64);
    }
}
