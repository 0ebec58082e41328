use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::database::models::MonitorTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Down,
    Recovered,
    Digest,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationKind::Down => "down",
            NotificationKind::Recovered => "recovered",
            NotificationKind::Digest => "digest",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushContent {
    pub title: String,
    pub body: String,
}

/// Rendered content for every channel. A channel with no content is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub html: String,
    pub push: Option<PushContent>,
    pub chat_text: Option<String>,
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Human-readable timestamp in the configured zone.
pub fn format_local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

impl Notification {
    pub fn down(target: &MonitorTarget, error: Option<&str>, attempts: u32, interval_secs: u64, when: &str) -> Self {
        let label = escape_html(&target.label);
        let detail = error
            .map(|e| format!("<pre style=\"white-space:pre-wrap\">{}</pre>", escape_html(e)))
            .unwrap_or_default();

        let html = format!(
            "<h3>Service unavailable</h3>\
             <p>Target: <b>{label}</b></p>\
             <p>Time: {when}</p>\
             <p>{attempts} attempt(s) {interval_secs}s apart all failed.</p>\
             {detail}",
            when = escape_html(when),
        );

        Self {
            kind: NotificationKind::Down,
            subject: format!("⚠️ Service down: {}", target.label),
            html,
            push: Some(PushContent {
                title: "Service down".into(),
                body: format!("{} is not responding", target.label),
            }),
            chat_text: Some(format!("⚠️ Service down: {}", target.label)),
        }
    }

    pub fn recovered(target: &MonitorTarget, when: &str) -> Self {
        Self {
            kind: NotificationKind::Recovered,
            subject: format!("✅ Service recovered: {}", target.label),
            html: format!(
                "<p>Service <b>{}</b> is responding again as of {}.</p>",
                escape_html(&target.label),
                escape_html(when)
            ),
            push: Some(PushContent {
                title: "Service recovered".into(),
                body: format!("{} is responding again", target.label),
            }),
            chat_text: Some(format!("✅ Service recovered: {}", target.label)),
        }
    }

    /// Email-only summary; `html` is already rendered.
    pub fn digest(subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Digest,
            subject: subject.into(),
            html: html.into(),
            push: None,
            chat_text: None,
        }
    }
}
