// crates/db/src/queries/mod.rs
// Session and sample operations for the lumina SQLite database.

pub(crate) mod row_types;
mod samples;
mod sessions;

pub use samples::PendingCounts;
