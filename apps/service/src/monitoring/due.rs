use chrono::{DateTime, Duration, Utc};

use crate::database::models::{MonitorTarget, TargetStatus};

/// Minimum spacing between two selections of the same target, whatever its interval.
pub const RECHECK_GUARD: Duration = Duration::seconds(60);

/// A target selected for this tick, with the status it had going in
#[derive(Debug, Clone, PartialEq)]
pub struct DueTarget {
    pub target: MonitorTarget,
    pub previous_status: TargetStatus,
}

/// Whether `target` should be checked at `now`.
pub fn is_due(target: &MonitorTarget, now: DateTime<Utc>) -> bool {
    if !target.enabled {
        return false;
    }
    let Some(last) = target.last_checked_at else {
        return true;
    };

    let interval = Duration::minutes(i64::from(target.interval_minutes.max(1)));
    now - last >= RECHECK_GUARD && now >= last + interval
}

/// Filter `targets` down to the ones due at `now`, oldest-created first.
pub fn select_due(targets: impl IntoIterator<Item = MonitorTarget>, now: DateTime<Utc>) -> Vec<DueTarget> {
    let mut due: Vec<DueTarget> = targets
        .into_iter()
        .filter(|target| is_due(target, now))
        .map(|target| DueTarget {
            previous_status: target.last_status,
            target,
        })
        .collect();

    due.sort_by(|a, b| {
        a.target
            .created_at
            .cmp(&b.target.created_at)
            .then_with(|| a.target.id.cmp(&b.target.id))
    });
    due
}
