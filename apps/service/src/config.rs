use std::{env, fmt, fs, path, str::FromStr, time::Duration};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub probe: ProbeConfig,
    pub email: EmailConfig,
    pub push: PushConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub retry_attempts: u32,
    pub retry_interval_sec: u64,
    pub alert_cooldown_min: i64,
    pub timezone: String,
    pub debug_retries: bool,
    pub max_concurrent_checks: usize,
    /// Local wall-clock time (HH:MM) of the daily digest.
    pub daily_digest_at: String,
    /// Local wall-clock time (HH:MM) of the monthly digest.
    pub monthly_digest_at: String,
    pub monthly_digest_day: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub http_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    pub user_agent: String,
    pub force_ipv4: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    /// `true` uses implicit TLS (465), `false` upgrades with STARTTLS (587).
    pub smtp_secure: bool,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub from_email: Option<String>,
    pub from_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_base: String,
    pub timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "ipwatch.db".into(), max_connections: 8 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_interval_sec: 60,
            alert_cooldown_min: 60,
            timezone: "Europe/Madrid".into(),
            debug_retries: false,
            max_concurrent_checks: 8,
            daily_digest_at: "08:00".into(),
            monthly_digest_at: "08:05".into(),
            monthly_digest_day: 1,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: 12_000,
            tcp_timeout_ms: 8_000,
            user_agent: concat!("ipwatch/", env!("CARGO_PKG_VERSION")).into(),
            force_ipv4: false,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 465,
            smtp_secure: true,
            smtp_user: None,
            smtp_pass: None,
            from_email: None,
            from_name: "ipwatch".into(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://exp.host/--/api/v2/push/send".into(),
            access_token: None,
            timeout_ms: 10_000,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: "https://api.telegram.org".into(),
            timeout_ms: 10_000,
        }
    }
}

/// One year; larger cooldowns overflow `chrono::Duration`
pub const MAX_ALERT_COOLDOWN_MIN: i64 = 525_600;

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/ipwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Option<path::PathBuf> {
    let base = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else {
        path::PathBuf::from(env::var("HOME").ok()?).join(".config")
    };

    Some(base.join("ipwatch/config.toml"))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn redact(secret: &Option<String>) -> &'static str {
    if secret.is_some() { "<set>" } else { "<unset>" }
}

impl Config {
    /// Load configuration from a TOML file (if one exists), then apply
    /// environment overrides and validate the result.
    ///
    /// Unlike a first-run wizard this never writes a default file; a missing
    /// file simply means "defaults plus environment".
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path = match optional_path {
            Some(path) => Some(normalize_toml_path(path.as_ref())),
            None => default_config_path(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(&path).map_err(|err| ConfigError::ReadFailed(path, err))?;
                Self::from_toml_str(&raw)?
            }
            _ => Self::default(),
        };

        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay values from an environment-style lookup.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parsed<T: FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue { name, value: raw })
        }
        fn flag(name: &'static str, raw: String) -> Result<bool, ConfigError> {
            parse_flag(&raw).ok_or(ConfigError::InvalidValue { name, value: raw })
        }

        if let Some(raw) = lookup("DATABASE_PATH") {
            self.database.path = raw;
        }
        if let Some(raw) = lookup("RETRY_ATTEMPTS") {
            self.scheduler.retry_attempts = parsed("RETRY_ATTEMPTS", raw)?;
        }
        if let Some(raw) = lookup("RETRY_INTERVAL_SEC") {
            self.scheduler.retry_interval_sec = parsed("RETRY_INTERVAL_SEC", raw)?;
        }
        if let Some(raw) = lookup("ALERT_COOLDOWN_MIN") {
            self.scheduler.alert_cooldown_min = parsed("ALERT_COOLDOWN_MIN", raw)?;
        }
        if let Some(raw) = lookup("TZ") {
            if !raw.trim().is_empty() {
                self.scheduler.timezone = raw.trim().to_string();
            }
        }
        if let Some(raw) = lookup("DEBUG_RETRIES") {
            self.scheduler.debug_retries = flag("DEBUG_RETRIES", raw)?;
        }
        if let Some(raw) = lookup("MAX_CONCURRENT_CHECKS") {
            self.scheduler.max_concurrent_checks = parsed("MAX_CONCURRENT_CHECKS", raw)?;
        }
        if let Some(raw) = lookup("FORCE_IPV4") {
            self.probe.force_ipv4 = flag("FORCE_IPV4", raw)?;
        }
        if let Some(raw) = lookup("SMTP_HOST") {
            self.email.smtp_host = Some(raw).filter(|host| !host.trim().is_empty());
        }
        if let Some(raw) = lookup("SMTP_PORT") {
            self.email.smtp_port = parsed("SMTP_PORT", raw)?;
        }
        if let Some(raw) = lookup("SMTP_SECURE") {
            self.email.smtp_secure = flag("SMTP_SECURE", raw)?;
        }
        if let Some(raw) = lookup("SMTP_USER") {
            self.email.smtp_user = Some(raw);
        }
        if let Some(raw) = lookup("SMTP_PASS") {
            self.email.smtp_pass = Some(raw);
        }
        if let Some(raw) = lookup("FROM_EMAIL") {
            self.email.from_email = Some(raw);
        }
        if let Some(raw) = lookup("FROM_NAME") {
            self.email.from_name = raw;
        }
        if let Some(raw) = lookup("EXPO_ACCESS_TOKEN") {
            self.push.access_token = Some(raw).filter(|token| !token.is_empty());
        }
        if let Some(raw) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(raw).filter(|token| !token.is_empty());
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        if scheduler.retry_attempts == 0 {
            return Err(ConfigError::InvalidValue { name: "retry_attempts", value: "0".into() });
        }
        if scheduler.max_concurrent_checks == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_concurrent_checks",
                value: "0".into(),
            });
        }
        if !(0..=MAX_ALERT_COOLDOWN_MIN).contains(&scheduler.alert_cooldown_min) {
            return Err(ConfigError::InvalidValue {
                name: "alert_cooldown_min",
                value: scheduler.alert_cooldown_min.to_string(),
            });
        }
        let timeouts = [
            ("push.timeout_ms", self.push.timeout_ms),
            ("telegram.timeout_ms", self.telegram.timeout_ms),
        ];
        for (name, timeout_ms) in timeouts {
            if timeout_ms == 0 {
                return Err(ConfigError::InvalidValue { name, value: "0".into() });
            }
        }
        if !(1..=28).contains(&scheduler.monthly_digest_day) {
            return Err(ConfigError::InvalidValue {
                name: "monthly_digest_day",
                value: scheduler.monthly_digest_day.to_string(),
            });
        }
        self.daily_digest_time()?;
        self.monthly_digest_time()?;
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.scheduler.timezone.clone()))
    }

    pub fn daily_digest_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_clock_time(&self.scheduler.daily_digest_at).ok_or_else(|| ConfigError::InvalidValue {
            name: "daily_digest_at",
            value: self.scheduler.daily_digest_at.clone(),
        })
    }

    pub fn monthly_digest_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_clock_time(&self.scheduler.monthly_digest_at).ok_or_else(|| {
            ConfigError::InvalidValue {
                name: "monthly_digest_at",
                value: self.scheduler.monthly_digest_at.clone(),
            }
        })
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.retry_interval_sec)
    }

    /// Out-of-range values are clamped; `validate` rejects them first.
    pub fn alert_cooldown(&self) -> chrono::Duration {
        let minutes = self.scheduler.alert_cooldown_min.clamp(0, MAX_ALERT_COOLDOWN_MIN);
        chrono::Duration::try_minutes(minutes).unwrap_or_default()
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push.timeout_ms)
    }

    pub fn telegram_timeout(&self) -> Duration {
        Duration::from_millis(self.telegram.timeout_ms)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Effective configuration:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Retry Attempts", &self.scheduler.retry_attempts)?;
        write_1(f, "Retry Interval (s)", &self.scheduler.retry_interval_sec)?;
        write_1(f, "Alert Cooldown (min)", &self.scheduler.alert_cooldown_min)?;
        write_1(f, "Timezone", &self.scheduler.timezone)?;
        write_1(f, "Debug Retries", &self.scheduler.debug_retries)?;
        write_1(f, "Max Concurrent Checks", &self.scheduler.max_concurrent_checks)?;
        write_1(f, "Daily Digest At", &self.scheduler.daily_digest_at)?;
        write_1(
            f,
            "Monthly Digest At",
            &format!("day {} {}", self.scheduler.monthly_digest_day, self.scheduler.monthly_digest_at),
        )?;

        write_title_1(f, "Probe")?;
        write_1(f, "HTTP Timeout (ms)", &self.probe.http_timeout_ms)?;
        write_1(f, "TCP Timeout (ms)", &self.probe.tcp_timeout_ms)?;
        write_1(f, "Force IPv4", &self.probe.force_ipv4)?;

        write_title_1(f, "Email")?;
        write_1(f, "SMTP Host", &self.email.smtp_host.as_deref().unwrap_or("<disabled>"))?;
        write_1(f, "SMTP Port", &self.email.smtp_port)?;
        write_1(f, "SMTP Secure", &self.email.smtp_secure)?;
        write_1(f, "SMTP Password", &redact(&self.email.smtp_pass))?;

        write_title_1(f, "Push")?;
        write_1(f, "Endpoint", &self.push.endpoint)?;
        write_1(f, "Access Token", &redact(&self.push.access_token))?;
        write_1(f, "Timeout (ms)", &self.push.timeout_ms)?;

        write_title_1(f, "Telegram")?;
        write_1(f, "Bot Token", &redact(&self.telegram.bot_token))?;
        write_1(f, "Timeout (ms)", &self.telegram.timeout_ms)?;

        Ok(())
    }
}
