// crates/tracker/src/lib.rs
//! Capture pipeline and background reconciliation for lumina.
//!
//! Producer -> [`buffer::BatchBuffer`] -> local store, gated by
//! [`lifecycle::LifecycleController`]; [`sync::SyncWorker`] pushes what the
//! store holds to the remote authority on its own schedule.

pub mod app;
pub mod auth;
pub mod buffer;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod sensor;
pub mod sync;

pub use app::TrackerApp;
pub use buffer::{BatchBuffer, RecordOutcome};
pub use error::{TrackerError, TrackerResult};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use sensor::{LineSensor, NoopSensor, Sensor};
