//! Cadence evaluation.
//!
//! Pure functions over timestamps; the orchestrator feeds them from the
//! ledger so the same rules apply to every process.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Why a source is or is not due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    /// No successful run on record.
    NeverRun,
    /// Due early because cadences are capped at one day after deployment.
    InitialCollectionWindow,
    CadenceElapsed,
    Forced,
    RefreshNotDue,
}

impl RunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeverRun => "never_run",
            Self::InitialCollectionWindow => "initial_collection_window",
            Self::CadenceElapsed => "cadence_elapsed",
            Self::Forced => "forced",
            Self::RefreshNotDue => "refresh_not_due",
        }
    }
}

impl std::fmt::Display for RunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling decision for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub run: bool,
    pub reason: RunReason,
    /// `now` when due, otherwise the first instant the source becomes due.
    pub next_eligible_at: DateTime<Utc>,
}

impl Eligibility {
    pub fn forced(now: DateTime<Utc>) -> Self {
        Self {
            run: true,
            reason: RunReason::Forced,
            next_eligible_at: now,
        }
    }
}

/// Cadence in force at `now`: capped at one day while the initial
/// collection window is open.
pub fn effective_cadence(
    cadence: Duration,
    deployed_at: DateTime<Utc>,
    initial_window: Duration,
    now: DateTime<Utc>,
) -> Duration {
    if now < deployed_at + initial_window {
        cadence.min(Duration::days(1))
    } else {
        cadence
    }
}

/// Decide whether a source with the given history is due at `now`.
pub fn evaluate(
    cadence: Duration,
    last_success: Option<DateTime<Utc>>,
    deployed_at: DateTime<Utc>,
    initial_window: Duration,
    now: DateTime<Utc>,
) -> Eligibility {
    let Some(last) = last_success else {
        return Eligibility {
            run: true,
            reason: RunReason::NeverRun,
            next_eligible_at: now,
        };
    };

    let effective = effective_cadence(cadence, deployed_at, initial_window, now);
    let due_at = last + effective;
    if now < due_at {
        return Eligibility {
            run: false,
            reason: RunReason::RefreshNotDue,
            next_eligible_at: due_at,
        };
    }

    // Only credit the window when the uncapped cadence would have said no.
    let reason = if effective < cadence && now < last + cadence {
        RunReason::InitialCollectionWindow
    } else {
        RunReason::CadenceElapsed
    };
    Eligibility {
        run: true,
        reason,
        next_eligible_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    /// Deployed long enough ago that the initial window is closed.
    fn deployed() -> DateTime<Utc> {
        t0() - Duration::days(30)
    }

    #[test]
    fn test_never_run_is_due() {
        let e = evaluate(Duration::hours(24), None, deployed(), Duration::days(7), t0());
        assert!(e.run);
        assert_eq!(e.reason, RunReason::NeverRun);
        assert_eq!(e.next_eligible_at, t0());
    }

    #[test]
    fn test_daily_source_after_12_hours_is_not_due() {
        let last = t0() - Duration::hours(12);
        let e = evaluate(Duration::hours(24), Some(last), deployed(), Duration::days(7), t0());
        assert!(!e.run);
        assert_eq!(e.reason, RunReason::RefreshNotDue);
        assert_eq!(e.next_eligible_at, t0() + Duration::hours(12));
    }

    #[test]
    fn test_daily_source_after_25_hours_is_due() {
        let last = t0() - Duration::hours(25);
        let e = evaluate(Duration::hours(24), Some(last), deployed(), Duration::days(7), t0());
        assert!(e.run);
        assert_eq!(e.reason, RunReason::CadenceElapsed);
    }

    #[test]
    fn test_initial_window_caps_weekly_cadence() {
        let deployed_at = t0() - Duration::days(2);
        let last = t0() - Duration::hours(25);
        let e = evaluate(Duration::days(7), Some(last), deployed_at, Duration::days(7), t0());
        assert!(e.run);
        assert_eq!(e.reason, RunReason::InitialCollectionWindow);

        let recent = t0() - Duration::hours(5);
        let e = evaluate(Duration::days(7), Some(recent), deployed_at, Duration::days(7), t0());
        assert!(!e.run);
        assert_eq!(e.next_eligible_at, recent + Duration::days(1));
    }

    #[test]
    fn test_window_closes() {
        let deployed_at = t0() - Duration::days(8);
        let last = t0() - Duration::hours(25);
        let e = evaluate(Duration::days(7), Some(last), deployed_at, Duration::days(7), t0());
        assert!(!e.run);
        assert_eq!(e.next_eligible_at, last + Duration::days(7));
    }

    #[test]
    fn test_short_cadence_unaffected_by_window() {
        let deployed_at = t0() - Duration::hours(1);
        assert_eq!(
            effective_cadence(Duration::hours(6), deployed_at, Duration::days(7), t0()),
            Duration::hours(6)
        );
        let e = evaluate(
            Duration::hours(6),
            Some(t0() - Duration::hours(7)),
            deployed_at,
            Duration::days(7),
            t0(),
        );
        assert_eq!(e.reason, RunReason::CadenceElapsed);
    }
}
