//! Daily and monthly failure summaries sent by email.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::clock::{Clock, previous_month_window};
use crate::database::models::{FailedCheck, NotificationSettings};
use crate::database::{ResultStore, SettingsStore, StoreError};
use crate::notifications::message::{escape_html, format_local};
use crate::notifications::{ChannelOutcome, Notification, NotificationDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestPeriod {
    Daily,
    Monthly,
}

impl fmt::Display for DigestPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DigestPeriod::Daily => "daily",
            DigestPeriod::Monthly => "monthly",
        })
    }
}

impl DigestPeriod {
    fn wants(&self, settings: &NotificationSettings) -> bool {
        match self {
            DigestPeriod::Daily => settings.daily_digest,
            DigestPeriod::Monthly => settings.monthly_digest,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Render failures as an HTML table, one row per failed check.
pub fn render_table(intro: &str, failures: &[FailedCheck], tz: Tz) -> String {
    let rows: String = failures
        .iter()
        .map(|failure| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&format_local(failure.checked_at, tz)),
                escape_html(&failure.target_label),
                escape_html(failure.error.as_deref().unwrap_or("")),
            )
        })
        .collect();

    format!(
        "<p>{}</p><table border=\"1\" cellpadding=\"6\"><tr><th>When</th><th>Service</th><th>Error</th></tr>{rows}</table>",
        escape_html(intro)
    )
}

/// Read-only batch job over all users. Never touches target or alert state.
pub struct DigestReporter {
    settings: Arc<dyn SettingsStore>,
    results: Arc<dyn ResultStore>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl DigestReporter {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        results: Arc<dyn ResultStore>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            settings,
            results,
            dispatcher,
            clock,
            tz,
        }
    }

    pub async fn run_daily(&self) -> Result<DigestReport, StoreError> {
        self.run(DigestPeriod::Daily).await
    }

    pub async fn run_monthly(&self) -> Result<DigestReport, StoreError> {
        self.run(DigestPeriod::Monthly).await
    }

    /// The `[from, to)` window and email wording for `period` at `now`.
    fn window(&self, period: DigestPeriod, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, String, String) {
        match period {
            DigestPeriod::Daily => (
                now - Duration::hours(24),
                // Include checks stamped exactly at `now`.
                now + Duration::milliseconds(1),
                "Daily error summary".to_string(),
                "Errors in the last 24 hours".to_string(),
            ),
            DigestPeriod::Monthly => {
                let (start, end) = previous_month_window(now, self.tz);
                let month = start.with_timezone(&self.tz).format("%B %Y").to_string();
                (
                    start,
                    end,
                    format!("Monthly error summary ({month})"),
                    format!("Errors during {month}"),
                )
            }
        }
    }

    pub async fn run(&self, period: DigestPeriod) -> Result<DigestReport, StoreError> {
        let now = self.clock.now();
        let (from, to, subject, intro) = self.window(period, now);
        let mut report = DigestReport::default();

        for user in self.settings.list_users().await? {
            let settings = match self.settings.get_settings(user.id).await {
                Ok(settings) => settings,
                Err(err) => {
                    error!(user_id = %user.id, %period, error = %err, "failed to load settings for digest");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(settings) = settings.filter(|s| period.wants(s) && !s.email_recipients.is_empty()) else {
                report.skipped += 1;
                continue;
            };

            let failures = match self.results.failed_results_for_user(user.id, from, to).await {
                Ok(failures) => failures,
                Err(err) => {
                    error!(user_id = %user.id, %period, error = %err, "failed to query failures for digest");
                    report.failed += 1;
                    continue;
                }
            };
            if failures.is_empty() {
                report.skipped += 1;
                continue;
            }

            let notification = Notification::digest(subject.clone(), render_table(&intro, &failures, self.tz));
            match self.dispatcher.notify(settings.user_id, &notification).await.email {
                ChannelOutcome::Sent => report.sent += 1,
                ChannelOutcome::Skipped(reason) => {
                    warn!(user_id = %user.id, %period, reason, "digest email skipped");
                    report.skipped += 1;
                }
                ChannelOutcome::Failed(_) => report.failed += 1,
            }
        }

        info!(%period, sent = report.sent, skipped = report.skipped, failed = report.failed, "digest run finished");
        Ok(report)
    }
}
