//! Centralized path functions for all app storage locations.
//!
//! Single source of truth, so no crate builds `dirs::cache_dir().join(...)` ad hoc.

use std::path::PathBuf;

/// App cache root: `~/Library/Caches/lumina/` (macOS) or `~/.cache/lumina/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("lumina"))
}

/// App config root, where the signed-in profile lives.
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lumina"))
}

/// SQLite database file: `<app_cache_dir>/lumina.db`.
pub fn db_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("lumina.db"))
}

/// Persisted user profile: `<app_config_dir>/user.json`.
pub fn user_profile_path() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("user.json"))
}
