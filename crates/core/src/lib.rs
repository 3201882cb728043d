// crates/core/src/lib.rs
pub mod accounting;
pub mod config;
pub mod error;
pub mod paths;
pub mod session;

pub use accounting::{reconcile, reconcile_checked, validate, Reconciliation};
pub use config::AppConfig;
pub use error::*;
pub use session::*;
