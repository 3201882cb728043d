// crates/core/src/accounting.rs
//! Focused-time and XP accounting for a session snapshot.
//!
//! [`reconcile`] is a pure function of `(session, now)`: it closes any open
//! pause at `now` on a working copy, derives total/paused/focused durations
//! and integrates the piecewise-constant rate segments over focused time.
//! Callers must run [`validate`] first (or use [`reconcile_checked`]); on a
//! snapshot that breaks the invariants the output is meaningless.

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::session::{Aspect, PauseInterval, Session, XpBreakdown};

/// Everything derived when a session is closed at a reference time.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Pause list with the trailing open pause (if any) closed at `now`.
    pub pause_intervals: Vec<PauseInterval>,
    pub total_duration_seconds: f64,
    pub pause_duration_seconds: f64,
    pub focused_duration_seconds: f64,
    pub xp_breakdown: XpBreakdown,
    /// Floor of the summed aspect totals.
    pub xp_total: i64,
}

/// Fractional seconds from `from` to `to`, at microsecond resolution.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let span = to - from;
    match span.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        // Overflows only past ~292k years.
        None => span.num_milliseconds() as f64 / 1000.0,
    }
}

/// Check the snapshot against the accounting invariants.
pub fn validate(session: &Session, now: DateTime<Utc>) -> Result<(), ValidationError> {
    let session_id = || session.id.clone();

    if now < session.started_at {
        return Err(ValidationError::ReferenceBeforeStart {
            session_id: session_id(),
        });
    }

    let Some(first) = session.rate_segments.first() else {
        return Err(ValidationError::NoRateSegments {
            session_id: session_id(),
        });
    };
    if first.at_second != 0.0 {
        return Err(ValidationError::FirstSegmentNotAtZero {
            session_id: session_id(),
            at_second: first.at_second,
        });
    }

    for (index, segment) in session.rate_segments.iter().enumerate() {
        let fields = std::iter::once(("at_second", segment.at_second)).chain(
            Aspect::ALL
                .iter()
                .map(|aspect| (aspect.as_str(), segment.rates.get(*aspect))),
        );
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidRate {
                    session_id: session_id(),
                    index,
                    field,
                });
            }
        }
        if index > 0 {
            let previous = session.rate_segments[index - 1].at_second;
            if segment.at_second <= previous {
                return Err(ValidationError::SegmentsNotIncreasing {
                    session_id: session_id(),
                    index,
                    at_second: segment.at_second,
                    previous,
                });
            }
        }
    }

    let last = session.pause_intervals.len().saturating_sub(1);
    for (index, pause) in session.pause_intervals.iter().enumerate() {
        if pause.is_open() && index != last {
            return Err(ValidationError::OpenPauseNotLast {
                session_id: session_id(),
                index,
            });
        }
        if let Some(resumed_at) = pause.resumed_at {
            if resumed_at < pause.paused_at {
                return Err(ValidationError::ResumeBeforePause {
                    session_id: session_id(),
                    index,
                });
            }
        }
        if index > 0 && pause.paused_at < session.pause_intervals[index - 1].paused_at {
            return Err(ValidationError::PausesOutOfOrder {
                session_id: session_id(),
                index,
            });
        }
    }

    Ok(())
}

/// Derive durations and XP for `session` as if it ended at `now`.
pub fn reconcile(session: &Session, now: DateTime<Utc>) -> Reconciliation {
    let pause_intervals = close_open_pause(&session.pause_intervals, now);

    let total_duration_seconds = seconds_between(session.started_at, now);
    let pause_duration_seconds: f64 = pause_intervals
        .iter()
        .map(|p| seconds_between(p.paused_at, p.resumed_at.unwrap_or(now)))
        .sum();
    // Heartbeat/pause clock skew can push this negative.
    let focused_duration_seconds = (total_duration_seconds - pause_duration_seconds).max(0.0);

    let xp_breakdown = integrate_xp(session, focused_duration_seconds);
    let xp_total = xp_breakdown.sum().floor() as i64;

    Reconciliation {
        pause_intervals,
        total_duration_seconds,
        pause_duration_seconds,
        focused_duration_seconds,
        xp_breakdown,
        xp_total,
    }
}

/// [`validate`] then [`reconcile`].
pub fn reconcile_checked(
    session: &Session,
    now: DateTime<Utc>,
) -> Result<Reconciliation, ValidationError> {
    validate(session, now)?;
    Ok(reconcile(session, now))
}

fn close_open_pause(pauses: &[PauseInterval], now: DateTime<Utc>) -> Vec<PauseInterval> {
    let mut closed = pauses.to_vec();
    if let Some(last) = closed.last_mut() {
        if last.resumed_at.is_none() {
            last.resumed_at = Some(now);
        }
    }
    closed
}

fn integrate_xp(session: &Session, focused: f64) -> XpBreakdown {
    let mut xp = XpBreakdown::default();
    let segments = &session.rate_segments;

    for (i, segment) in segments.iter().enumerate() {
        if segment.at_second >= focused {
            break;
        }
        let end = segments
            .get(i + 1)
            .map_or(focused, |next| next.at_second)
            .min(focused);
        xp.accrue(&segment.rates, end - segment.at_second);
    }

    xp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Aspect, AspectRates, RateSegment};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session_with(pauses: Vec<PauseInterval>, segments: Vec<RateSegment>) -> Session {
        let mut s = Session::new_live("sess-1", "user-1", t(0), AspectRates::default());
        s.pause_intervals = pauses;
        s.rate_segments = segments;
        s
    }

    fn segment(at_second: f64, aspect: Aspect, rate: f64) -> RateSegment {
        RateSegment {
            at_second,
            rates: AspectRates::default().with(aspect, rate),
        }
    }

    #[test]
    fn test_closed_pause_accounting() {
        let s = session_with(
            vec![PauseInterval::closed(t(10), t(20))],
            vec![segment(0.0, Aspect::Physique, 0.0)],
        );
        let r = reconcile(&s, t(100));
        assert_eq!(r.total_duration_seconds, 100.0);
        assert_eq!(r.pause_duration_seconds, 10.0);
        assert_eq!(r.focused_duration_seconds, 90.0);
    }

    #[test]
    fn test_open_pause_closed_at_now() {
        let s = session_with(
            vec![PauseInterval::open(t(10))],
            vec![segment(0.0, Aspect::Physique, 0.0)],
        );
        let r = reconcile(&s, t(100));
        assert_eq!(r.pause_duration_seconds, 90.0);
        assert_eq!(r.focused_duration_seconds, 10.0);
        assert_eq!(r.pause_intervals[0].resumed_at, Some(t(100)));
        // The caller's snapshot is untouched.
        assert!(s.pause_intervals[0].is_open());
    }

    #[test]
    fn test_xp_integration_across_segments() {
        let s = session_with(
            vec![],
            vec![
                segment(0.0, Aspect::Physique, 1.0),
                segment(50.0, Aspect::Energy, 2.0),
            ],
        );
        let r = reconcile(&s, t(80));
        assert_eq!(r.focused_duration_seconds, 80.0);
        assert_eq!(r.xp_breakdown.physique, 50.0);
        assert_eq!(r.xp_breakdown.energy, 60.0);
        assert_eq!(r.xp_total, 110);
    }

    #[test]
    fn test_segment_at_focused_boundary_contributes_nothing() {
        let s = session_with(
            vec![],
            vec![
                segment(0.0, Aspect::Logic, 1.0),
                segment(30.0, Aspect::Social, 100.0),
                segment(45.0, Aspect::Creativity, 100.0),
            ],
        );
        let r = reconcile(&s, t(30));
        assert_eq!(r.xp_breakdown.logic, 30.0);
        assert_eq!(r.xp_breakdown.social, 0.0);
        assert_eq!(r.xp_breakdown.creativity, 0.0);
        assert_eq!(r.xp_total, 30);
    }

    #[test]
    fn test_only_total_is_floored() {
        let s = session_with(
            vec![],
            vec![RateSegment {
                at_second: 0.0,
                rates: AspectRates::default()
                    .with(Aspect::Physique, 0.05)
                    .with(Aspect::Energy, 0.05),
            }],
        );
        // 0.05 * 15 = 0.75 per aspect; sum 1.5 floors to 1, not 0.
        let r = reconcile(&s, t(15));
        assert!((r.xp_breakdown.physique - 0.75).abs() < 1e-9);
        assert!((r.xp_breakdown.energy - 0.75).abs() < 1e-9);
        assert_eq!(r.xp_total, 1);
    }

    #[test]
    fn test_focused_floors_at_zero_under_clock_skew() {
        // Pause recorded as resuming after the reference time.
        let s = session_with(
            vec![PauseInterval::closed(t(0), t(200))],
            vec![segment(0.0, Aspect::Physique, 1.0)],
        );
        let r = reconcile(&s, t(100));
        assert_eq!(r.focused_duration_seconds, 0.0);
        assert_eq!(r.xp_total, 0);
    }

    #[test]
    fn test_fractional_seconds() {
        let mut s = session_with(vec![], vec![segment(0.0, Aspect::Energy, 2.0)]);
        s.started_at = t(0);
        let now = t(10) + chrono::Duration::milliseconds(250);
        let r = reconcile(&s, now);
        assert_eq!(r.total_duration_seconds, 10.25);
        assert_eq!(r.xp_breakdown.energy, 20.5);
        assert_eq!(r.xp_total, 20);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let s = session_with(
            vec![
                PauseInterval::closed(t(5), t(9)),
                PauseInterval::open(t(40)),
            ],
            vec![
                segment(0.0, Aspect::Physique, 0.3),
                segment(12.5, Aspect::Logic, 1.7),
            ],
        );
        let a = reconcile(&s, t(77));
        let b = reconcile(&s, t(77));
        assert_eq!(a, b);
        assert_eq!(a.xp_breakdown.sum().to_bits(), b.xp_breakdown.sum().to_bits());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let s = session_with(
            vec![PauseInterval::closed(t(1), t(2)), PauseInterval::open(t(3))],
            vec![segment(0.0, Aspect::Physique, 1.0), segment(5.0, Aspect::Energy, 1.0)],
        );
        assert!(validate(&s, t(10)).is_ok());
        assert!(reconcile_checked(&s, t(10)).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_segments() {
        let s = session_with(vec![], vec![]);
        assert!(matches!(
            validate(&s, t(10)),
            Err(ValidationError::NoRateSegments { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_first_segment_offset() {
        let s = session_with(vec![], vec![segment(3.0, Aspect::Physique, 1.0)]);
        assert!(matches!(
            validate(&s, t(10)),
            Err(ValidationError::FirstSegmentNotAtZero { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unsorted_or_duplicate_segments() {
        let unsorted = session_with(
            vec![],
            vec![
                segment(0.0, Aspect::Physique, 1.0),
                segment(20.0, Aspect::Energy, 1.0),
                segment(10.0, Aspect::Logic, 1.0),
            ],
        );
        assert!(matches!(
            validate(&unsorted, t(30)),
            Err(ValidationError::SegmentsNotIncreasing { index: 2, .. })
        ));

        let duplicate = session_with(
            vec![],
            vec![segment(0.0, Aspect::Physique, 1.0), segment(0.0, Aspect::Energy, 1.0)],
        );
        assert!(matches!(
            validate(&duplicate, t(30)),
            Err(ValidationError::SegmentsNotIncreasing { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_rate() {
        let s = session_with(vec![], vec![segment(0.0, Aspect::Social, -1.0)]);
        assert!(matches!(
            validate(&s, t(30)),
            Err(ValidationError::InvalidRate { index: 0, field: "social", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite_segment_start() {
        let mut s = session_with(
            vec![],
            vec![segment(0.0, Aspect::Physique, 1.0), segment(10.0, Aspect::Logic, 1.0)],
        );
        s.rate_segments[1].at_second = f64::NAN;
        let err = validate(&s, t(30)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidRate {
                session_id: s.id.clone(),
                index: 1,
                field: "at_second",
            }
        );
    }

    #[test]
    fn test_sub_millisecond_spans_are_kept() {
        let start = t(0);
        let end = start + chrono::Duration::microseconds(1_500_250);
        assert_eq!(seconds_between(start, end), 1.50025);
    }

    #[test]
    fn test_validate_rejects_multiple_open_pauses() {
        let s = session_with(
            vec![PauseInterval::open(t(1)), PauseInterval::open(t(2))],
            vec![segment(0.0, Aspect::Physique, 1.0)],
        );
        let err = reconcile_checked(&s, t(30)).unwrap_err();
        assert!(matches!(err, ValidationError::OpenPauseNotLast { index: 0, .. }));
    }

    #[test]
    fn test_validate_rejects_bad_pause_ordering() {
        let backwards = session_with(
            vec![PauseInterval::closed(t(10), t(5))],
            vec![segment(0.0, Aspect::Physique, 1.0)],
        );
        assert!(matches!(
            validate(&backwards, t(30)),
            Err(ValidationError::ResumeBeforePause { .. })
        ));

        let out_of_order = session_with(
            vec![PauseInterval::closed(t(10), t(12)), PauseInterval::closed(t(4), t(6))],
            vec![segment(0.0, Aspect::Physique, 1.0)],
        );
        assert!(matches!(
            validate(&out_of_order, t(30)),
            Err(ValidationError::PausesOutOfOrder { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_reference_before_start() {
        let s = session_with(vec![], vec![segment(0.0, Aspect::Physique, 1.0)]);
        assert!(matches!(
            validate(&s, t(-1)),
            Err(ValidationError::ReferenceBeforeStart { .. })
        ));
    }
}
