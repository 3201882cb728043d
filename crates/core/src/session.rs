// crates/core/src/session.rs
//! Session record shape shared by the store, the jobs and the sync payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interruption tag written by the staleness sweep.
pub const HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout";

/// Lifecycle state of a session. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Live,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Live => "live",
            SessionStatus::Completed => "completed",
        }
    }

    /// Parse the persisted form. Returns `None` for unknown values.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "live" => Some(SessionStatus::Live),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// Why a session reached `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletedReason {
    /// The player finished the session themselves.
    Explicit,
    /// The staleness sweep closed it after the heartbeat went quiet.
    Abandoned,
}

impl CompletedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletedReason::Explicit => "explicit",
            CompletedReason::Abandoned => "abandoned",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(CompletedReason::Explicit),
            "abandoned" => Some(CompletedReason::Abandoned),
            _ => None,
        }
    }
}

/// One of the five skill dimensions XP is apportioned across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aspect {
    Physique,
    Energy,
    Logic,
    Creativity,
    Social,
}

impl Aspect {
    pub const ALL: [Aspect; 5] = [
        Aspect::Physique,
        Aspect::Energy,
        Aspect::Logic,
        Aspect::Creativity,
        Aspect::Social,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::Physique => "physique",
            Aspect::Energy => "energy",
            Aspect::Logic => "logic",
            Aspect::Creativity => "creativity",
            Aspect::Social => "social",
        }
    }
}

/// A span during which the session was paused. Open while `resumed_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseInterval {
    pub paused_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
}

impl PauseInterval {
    pub fn open(paused_at: DateTime<Utc>) -> Self {
        Self {
            paused_at,
            resumed_at: None,
        }
    }

    pub fn closed(paused_at: DateTime<Utc>, resumed_at: DateTime<Utc>) -> Self {
        Self {
            paused_at,
            resumed_at: Some(resumed_at),
        }
    }

    pub fn is_open(&self) -> bool {
        self.resumed_at.is_none()
    }
}

/// Per-second XP accrual rate for each aspect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AspectRates {
    #[serde(default)]
    pub physique: f64,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub logic: f64,
    #[serde(default)]
    pub creativity: f64,
    #[serde(default)]
    pub social: f64,
}

impl AspectRates {
    pub fn get(&self, aspect: Aspect) -> f64 {
        match aspect {
            Aspect::Physique => self.physique,
            Aspect::Energy => self.energy,
            Aspect::Logic => self.logic,
            Aspect::Creativity => self.creativity,
            Aspect::Social => self.social,
        }
    }

    /// Builder-style setter, mostly useful for constructing fixtures.
    pub fn with(mut self, aspect: Aspect, rate: f64) -> Self {
        match aspect {
            Aspect::Physique => self.physique = rate,
            Aspect::Energy => self.energy = rate,
            Aspect::Logic => self.logic = rate,
            Aspect::Creativity => self.creativity = rate,
            Aspect::Social => self.social = rate,
        }
        self
    }
}

/// A change of accrual rate, effective from `at_second` of focused time
/// until the next segment (or the end of the session).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSegment {
    pub at_second: f64,
    pub rates: AspectRates,
}

/// Accumulated XP per aspect. Values stay fractional; only the combined
/// total is floored when awarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct XpBreakdown {
    pub physique: f64,
    pub energy: f64,
    pub logic: f64,
    pub creativity: f64,
    pub social: f64,
}

impl XpBreakdown {
    pub fn get(&self, aspect: Aspect) -> f64 {
        match aspect {
            Aspect::Physique => self.physique,
            Aspect::Energy => self.energy,
            Aspect::Logic => self.logic,
            Aspect::Creativity => self.creativity,
            Aspect::Social => self.social,
        }
    }

    /// Add `rates × seconds` to every aspect.
    pub fn accrue(&mut self, rates: &AspectRates, seconds: f64) {
        self.physique += rates.physique * seconds;
        self.energy += rates.energy * seconds;
        self.logic += rates.logic * seconds;
        self.creativity += rates.creativity * seconds;
        self.social += rates.social * seconds;
    }

    /// Unfloored sum across aspects.
    pub fn sum(&self) -> f64 {
        // Fixed order keeps the result bit-for-bit reproducible.
        self.physique + self.energy + self.logic + self.creativity + self.social
    }
}

/// One timed activity-tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pause_intervals: Vec<PauseInterval>,
    pub rate_segments: Vec<RateSegment>,
    pub total_duration_seconds: Option<f64>,
    pub focused_duration_seconds: Option<f64>,
    pub xp_total: Option<i64>,
    pub xp_breakdown: Option<XpBreakdown>,
    pub completed_reason: Option<CompletedReason>,
    pub interruption_reason: Option<String>,
    pub synced_to_django: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Store-maintained write counter, bumped by every persisted mutation.
    #[serde(default)]
    pub revision: i64,
}

impl Session {
    /// A freshly created Live session with a single rate segment at second 0.
    pub fn new_live(
        id: impl Into<String>,
        user_id: impl Into<String>,
        started_at: DateTime<Utc>,
        initial_rates: AspectRates,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            status: SessionStatus::Live,
            started_at,
            last_heartbeat_at: started_at,
            ended_at: None,
            pause_intervals: Vec::new(),
            rate_segments: vec![RateSegment {
                at_second: 0.0,
                rates: initial_rates,
            }],
            total_duration_seconds: None,
            focused_duration_seconds: None,
            xp_total: None,
            xp_breakdown: None,
            completed_reason: None,
            interruption_reason: None,
            synced_to_django: false,
            last_synced_at: None,
            revision: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Live
    }

    /// The currently open pause, if any.
    pub fn open_pause(&self) -> Option<&PauseInterval> {
        self.pause_intervals.last().filter(|p| p.is_open())
    }
}

/// Completion record pushed to the external system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub pause_intervals: Vec<PauseInterval>,
    pub total_duration_seconds: f64,
    pub focused_duration_seconds: f64,
    pub xp_total: i64,
    pub xp_breakdown: XpBreakdown,
    pub completed_reason: CompletedReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption_reason: Option<String>,
}

impl SyncPayload {
    /// Build the payload for a completed session. Returns `None` for Live
    /// sessions or completed ones missing derived fields.
    pub fn from_session(session: &Session) -> Option<Self> {
        if session.status != SessionStatus::Completed {
            return None;
        }
        Some(Self {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at?,
            pause_intervals: session.pause_intervals.clone(),
            total_duration_seconds: session.total_duration_seconds?,
            focused_duration_seconds: session.focused_duration_seconds?,
            xp_total: session.xp_total?,
            xp_breakdown: session.xp_breakdown?,
            completed_reason: session.completed_reason?,
            interruption_reason: session.interruption_reason.clone(),
        })
    }
}
