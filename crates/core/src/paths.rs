//! Centralized path functions for all app storage locations.
//!
//! Single source of truth for `dirs::*_dir().join("questline")` lookups.

use std::path::PathBuf;

/// App data root: `~/Library/Application Support/questline/` (macOS) or `~/.local/share/questline/` (Linux).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("questline"))
}

/// SQLite database file: `<app_data_dir>/questline.db`.
pub fn db_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("questline.db"))
}

/// Default config file: `<config_dir>/questline/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("questline").join("config.toml"))
}
