use chrono::{DateTime, Duration, Utc};

use crate::database::models::{TargetStateUpdate, TargetStatus};

/// Which notification a decision calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Down,
    Recovered,
}

/// Result of one decision: what to send and what to store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDecision {
    pub notify: Option<AlertKind>,
    pub status: TargetStatus,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl AlertDecision {
    pub fn state_update(&self) -> TargetStateUpdate {
        TargetStateUpdate {
            last_status: self.status,
            last_alert_at: self.last_alert_at,
        }
    }
}

/// Status transitions with a cooldown on repeated down-alerts.
/// Recoveries are never throttled.
#[derive(Debug, Clone, Copy)]
pub struct AlertDecisionEngine {
    cooldown: Duration,
}

impl AlertDecisionEngine {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// A missing `last_alert_at` counts as an infinitely old alert.
    pub fn cooldown_elapsed(&self, last_alert_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_alert_at {
            None => true,
            Some(last) => now - last >= self.cooldown,
        }
    }

    pub fn decide(
        &self,
        previous: TargetStatus,
        ok: bool,
        last_alert_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AlertDecision {
        if ok {
            let notify = (previous == TargetStatus::Down).then_some(AlertKind::Recovered);
            return AlertDecision {
                notify,
                status: TargetStatus::Up,
                last_alert_at,
            };
        }

        if previous != TargetStatus::Down || self.cooldown_elapsed(last_alert_at, now) {
            AlertDecision {
                notify: Some(AlertKind::Down),
                status: TargetStatus::Down,
                last_alert_at: Some(now),
            }
        } else {
            AlertDecision {
                notify: None,
                status: TargetStatus::Down,
                last_alert_at,
            }
        }
    }
}
