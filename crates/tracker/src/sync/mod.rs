pub mod progress;
pub mod remote;
pub mod worker;

pub use progress::{SyncProgress, TickOutcome};
pub use remote::{
    idempotency_key, HttpRemote, RemoteAuthority, RemoteError, SampleAck, SamplePayload,
    SessionPayload, IDEMPOTENCY_HEADER,
};
pub use worker::{SharedUser, SyncHandle, SyncWorker};
