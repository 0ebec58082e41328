//! Time source and wall-clock cadences.
//!
//! Every component that needs "now" or a timed wait goes through [`Clock`],
//! so the scheduler can be driven tick by tick in tests without sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: std::time::Duration);
}

/// Wall clock backed by `chrono::Utc` and `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Start of the next whole minute strictly after `now`.
pub fn next_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::minutes(1)
}

/// Resolve a local wall-clock time to an instant. Ambiguous times (DST
/// fall-back) take the earlier instant; skipped times (spring-forward) move
/// forward minute by minute until a valid instant exists.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..180 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(at) => return at.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => candidate += Duration::minutes(1),
        }
    }
    Utc.from_utc_datetime(&local)
}

/// Next instant after `now` at which the local clock in `tz` reads `at`.
pub fn next_daily(now: DateTime<Utc>, tz: Tz, at: NaiveTime) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    for offset in 0..2 {
        let candidate = resolve_local(tz, (today + Duration::days(offset)).and_time(at));
        if candidate > now {
            return candidate;
        }
    }
    resolve_local(tz, (today + Duration::days(2)).and_time(at))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn shift_month(date: NaiveDate, months: i32) -> NaiveDate {
    let index = date.year() * 12 + date.month0() as i32 + months;
    first_of_month(index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// Next instant after `now` at which the local calendar in `tz` reads
/// `day` of some month at `at`.
pub fn next_monthly(now: DateTime<Utc>, tz: Tz, day: u32, at: NaiveTime) -> DateTime<Utc> {
    let local_today = now.with_timezone(&tz).date_naive();
    let mut month = first_of_month(local_today.year(), local_today.month());
    for _ in 0..2 {
        let date = month.with_day(day).unwrap_or(month);
        let candidate = resolve_local(tz, date.and_time(at));
        if candidate > now {
            return candidate;
        }
        month = shift_month(month, 1);
    }
    resolve_local(tz, month.with_day(day).unwrap_or(month).and_time(at))
}

/// The previous calendar month in `tz` as a half-open `[start, end)` window.
pub fn previous_month_window(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_today = now.with_timezone(&tz).date_naive();
    let this_month = first_of_month(local_today.year(), local_today.month());
    let previous = shift_month(this_month, -1);
    (
        resolve_local(tz, previous.and_time(NaiveTime::MIN)),
        resolve_local(tz, this_month.and_time(NaiveTime::MIN)),
    )
}
