// crates/core/src/lib.rs
pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::*;
pub use types::*;
