use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StoreError;

/// Interval assigned to targets created without one.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 20;

/// Protocol used to probe a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Http,
    Tcp,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Http => "http",
            TargetKind::Tcp => "tcp",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(TargetKind::Http),
            "tcp" => Ok(TargetKind::Tcp),
            other => Err(StoreError::Invalid(format!("unknown target kind {other:?}"))),
        }
    }
}

/// Last known health of a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Unknown => "UNKNOWN",
            TargetStatus::Up => "UP",
            TargetStatus::Down => "DOWN",
        }
    }

    pub fn from_ok(ok: bool) -> Self {
        if ok { TargetStatus::Up } else { TargetStatus::Down }
    }

    /// Stored values outside the known set read back as `Unknown`.
    pub fn parse_lossy(raw: Option<&str>) -> Self {
        match raw {
            Some("UP") => TargetStatus::Up,
            Some("DOWN") => TargetStatus::Down,
            _ => TargetStatus::Unknown,
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered endpoint and its check bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorTarget {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    pub kind: TargetKind,
    /// URL for HTTP targets, hostname for TCP targets
    pub address: String,
    pub port: Option<u16>,
    pub interval_minutes: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_status: TargetStatus,
    /// Anchor of the down-alert cooldown window
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// Input for registering a target
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub user_id: Uuid,
    pub label: String,
    pub kind: TargetKind,
    pub address: String,
    pub port: Option<u16>,
    pub interval_minutes: u32,
    pub enabled: bool,
}

impl NewTarget {
    pub fn new(user_id: Uuid, label: impl Into<String>, kind: TargetKind, address: impl Into<String>) -> Self {
        Self {
            user_id,
            label: label.into(),
            kind,
            address: address.into(),
            port: None,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            enabled: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check the target invariants and normalize the address for storage.
    pub fn validate(mut self) -> Result<Self, StoreError> {
        self.label = self.label.trim().to_string();
        if self.label.is_empty() {
            return Err(StoreError::Invalid("label must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(StoreError::Invalid("address must not be empty".into()));
        }
        if self.interval_minutes == 0 {
            return Err(StoreError::Invalid("interval must be at least one minute".into()));
        }
        if self.kind == TargetKind::Tcp && !matches!(self.port, Some(port) if port > 0) {
            return Err(StoreError::Invalid("tcp targets require a port".into()));
        }
        self.address = normalize_address(self.kind, &self.address);
        Ok(self)
    }
}

/// Whether `address` already names an `http://` or `https://` URL.
pub fn has_http_scheme(address: &str) -> bool {
    let lower = address.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Trim the address and give scheme-less HTTP addresses an `http://` prefix.
pub fn normalize_address(kind: TargetKind, address: &str) -> String {
    let trimmed = address.trim();
    match kind {
        TargetKind::Http if !has_http_scheme(trimmed) => format!("http://{trimmed}"),
        _ => trimmed.to_string(),
    }
}

/// Fields written back by the check engine after an alert decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStateUpdate {
    pub last_status: TargetStatus,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// One executed probe attempt (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: Uuid,
    pub target_id: Uuid,
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCheckResult {
    pub target_id: Uuid,
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A failed check joined with its target's label, for digests
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCheck {
    pub target_id: Uuid,
    pub target_label: String,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user alerting preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: Uuid,
    pub email_recipients: BTreeSet<String>,
    pub telegram_chat_id: Option<String>,
    pub daily_digest: bool,
    pub monthly_digest: bool,
    pub connect_token: Option<String>,
}

impl NotificationSettings {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            email_recipients: BTreeSet::new(),
            telegram_chat_id: None,
            daily_digest: false,
            monthly_digest: false,
            connect_token: None,
        }
    }
}

/// Partial update for [`NotificationSettings`]; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub email_recipients: Option<BTreeSet<String>>,
    pub daily_digest: Option<bool>,
    pub monthly_digest: Option<bool>,
}

impl SettingsUpdate {
    pub fn apply(self, settings: &mut NotificationSettings) {
        if let Some(recipients) = self.email_recipients {
            settings.email_recipients = recipients
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
        }
        if let Some(daily) = self.daily_digest {
            settings.daily_digest = daily;
        }
        if let Some(monthly) = self.monthly_digest {
            settings.monthly_digest = monthly;
        }
    }
}

pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}
