//! Cron gating for event mode.
//!
//! Event mode polls wall-clock time on a fixed tick and fires its
//! actions when the cron expression matches. A cron window (a matching
//! minute) usually spans several ticks, so the gate latches after the
//! first fire and re-arms as soon as a non-matching tick is observed.
//! The latch is pure state over supplied timestamps, which keeps it
//! testable without a clock.

use chrono::{DateTime, Timelike, Utc};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from cron parsing or matching.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },
}

// ---------------------------------------------------------------------------
// CronGate
// ---------------------------------------------------------------------------

/// Outcome of observing one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoll {
    /// The window matches and has not fired yet: trigger now.
    Fire,
    /// The window matches but already fired this window.
    Hold,
    /// Outside any matching window; the latch re-arms.
    Idle,
}

/// A cron expression plus the once-per-window latch.
pub struct CronGate {
    cron: croner::Cron,
    expression: String,
    fired: bool,
}

impl CronGate {
    pub fn new(expression: &str) -> Result<Self, EventError> {
        let cron = expression
            .parse::<croner::Cron>()
            .map_err(|e| EventError::InvalidCron {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            cron,
            expression: expression.to_string(),
            fired: false,
        })
    }

    /// Observe one tick at `now` and decide what the caller should do.
    ///
    /// Matching is minute-granular: the timestamp is truncated to the
    /// start of its minute first, since croner treats a 5-field
    /// expression as having a seconds field of `0` and would otherwise
    /// only match ticks landing exactly on second zero.
    pub fn poll(&mut self, now: &DateTime<Utc>) -> Result<GatePoll, EventError> {
        let minute = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(*now);
        let matching =
            self.cron
                .is_time_matching(&minute)
                .map_err(|e| EventError::InvalidCron {
                    expression: self.expression.clone(),
                    message: e.to_string(),
                })?;

        Ok(if matching {
            if self.fired {
                GatePoll::Hold
            } else {
                self.fired = true;
                GatePoll::Fire
            }
        } else {
            self.fired = false;
            GatePoll::Idle
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
