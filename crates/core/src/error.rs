// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// A session snapshot that breaks the accounting invariants.
///
/// These are rejected before reconciliation runs; nothing is ever repaired
/// silently.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Session {session_id} has no rate segments")]
    NoRateSegments { session_id: String },

    #[error("Session {session_id}: first rate segment starts at {at_second}s, expected 0")]
    FirstSegmentNotAtZero { session_id: String, at_second: f64 },

    #[error("Session {session_id}: rate segment {index} at {at_second}s does not follow {previous}s")]
    SegmentsNotIncreasing {
        session_id: String,
        index: usize,
        at_second: f64,
        previous: f64,
    },

    #[error("Session {session_id}: rate segment {index} has a negative or non-finite {field}")]
    InvalidRate {
        session_id: String,
        index: usize,
        field: &'static str,
    },

    #[error("Session {session_id}: pause {index} is open but is not the last pause")]
    OpenPauseNotLast { session_id: String, index: usize },

    #[error("Session {session_id}: pause {index} starts before the previous pause")]
    PausesOutOfOrder { session_id: String, index: usize },

    #[error("Session {session_id}: pause {index} resumes before it was paused")]
    ResumeBeforePause { session_id: String, index: usize },

    #[error("Session {session_id}: reference time is before the session started")]
    ReferenceBeforeStart { session_id: String },
}

impl ValidationError {
    pub fn session_id(&self) -> &str {
        match self {
            Self::NoRateSegments { session_id }
            | Self::FirstSegmentNotAtZero { session_id, .. }
            | Self::SegmentsNotIncreasing { session_id, .. }
            | Self::InvalidRate { session_id, .. }
            | Self::OpenPauseNotLast { session_id, .. }
            | Self::PausesOutOfOrder { session_id, .. }
            | Self::ResumeBeforePause { session_id, .. }
            | Self::ReferenceBeforeStart { session_id } => session_id,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}
