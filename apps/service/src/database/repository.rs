use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use rand::{Rng, distributions::Alphanumeric};
use uuid::Uuid;

use super::error::StoreError;
use super::models::{
    CheckResult, FailedCheck, MonitorTarget, NewCheckResult, NewTarget, NotificationSettings, TargetStateUpdate,
    TargetStatus, User, from_millis, to_millis,
};
use crate::pool::{LibsqlManager, LibsqlPool};

const CONNECT_TOKEN_LEN: usize = 24;

const TARGET_COLUMNS: &str = "id, user_id, label, kind, address, port, interval_minutes, enabled, created_at, \
     updated_at, last_checked_at, last_status, last_alert_at";

const SETTINGS_COLUMNS: &str =
    "user_id, email_recipients, telegram_chat_id, daily_digest, monthly_digest, connect_token";

/// Monitor targets and their check bookkeeping
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn create_target(&self, target: NewTarget, now: DateTime<Utc>) -> Result<MonitorTarget, StoreError>;

    async fn list_enabled_targets(&self) -> Result<Vec<MonitorTarget>, StoreError>;

    /// Enabled targets never checked or last checked at or before
    /// `checked_before`, oldest first.
    async fn list_due_candidates(&self, checked_before: DateTime<Utc>) -> Result<Vec<MonitorTarget>, StoreError>;

    async fn list_targets_for_user(&self, user_id: Uuid) -> Result<Vec<MonitorTarget>, StoreError>;

    async fn get_target(&self, id: Uuid) -> Result<Option<MonitorTarget>, StoreError>;

    /// Stamp a single executed attempt onto the target.
    async fn record_check(&self, id: Uuid, checked_at: DateTime<Utc>, status: TargetStatus) -> Result<(), StoreError>;

    /// Write back the alert decision for a completed cycle.
    async fn update_target_state(
        &self,
        id: Uuid,
        update: TargetStateUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove a target together with all of its check results.
    async fn delete_target(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Append-only check history
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn append_result(&self, result: NewCheckResult) -> Result<CheckResult, StoreError>;

    async fn latest_result(&self, target_id: Uuid) -> Result<Option<CheckResult>, StoreError>;

    /// Failed checks across the user's targets in `[from, to)`, newest first.
    async fn failed_results_for_user(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FailedCheck>, StoreError>;
}

/// Users, notification preferences and push registrations
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn create_user(&self, email: &str, now: DateTime<Utc>) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn get_settings(&self, user_id: Uuid) -> Result<Option<NotificationSettings>, StoreError>;

    /// Read settings, creating the empty default row on first access.
    async fn get_or_create_settings(&self, user_id: Uuid) -> Result<NotificationSettings, StoreError>;

    async fn upsert_settings(&self, settings: &NotificationSettings) -> Result<(), StoreError>;

    /// Generate and store a fresh chat-link token, replacing any previous one.
    async fn issue_connect_token(&self, user_id: Uuid) -> Result<String, StoreError>;

    /// Consume a connect token and attach `chat_id` to its owner.
    async fn link_chat(&self, token: &str, chat_id: &str) -> Result<Uuid, StoreError>;

    /// Detach any linked chat. Returns `false` when none was linked.
    async fn unlink_chat(&self, user_id: Uuid) -> Result<bool, StoreError>;

    /// Returns `false` when the token was already registered.
    async fn register_push_device(&self, user_id: Uuid, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn push_tokens(&self, user_id: Uuid) -> Result<Vec<String>, StoreError>;
}

/// LibSQL-backed implementation of every store trait
#[derive(Clone)]
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Ok(Uuid::parse_str(raw)?)
}

fn optional_millis(raw: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(from_millis).transpose()
}

fn target_from_row(row: &Row) -> Result<MonitorTarget, StoreError> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let port: Option<i64> = row.get(5)?;
    let interval: i64 = row.get(6)?;
    let last_status: Option<String> = row.get(11)?;

    Ok(MonitorTarget {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        label: row.get(2)?,
        kind: kind.parse()?,
        address: row.get(4)?,
        port: port
            .map(|p| u16::try_from(p).map_err(|_| StoreError::Corrupt(format!("port out of range: {p}"))))
            .transpose()?,
        interval_minutes: u32::try_from(interval)
            .map_err(|_| StoreError::Corrupt(format!("interval out of range: {interval}")))?,
        enabled: row.get::<i64>(7)? != 0,
        created_at: from_millis(row.get(8)?)?,
        updated_at: from_millis(row.get(9)?)?,
        last_checked_at: optional_millis(row.get(10)?)?,
        last_status: TargetStatus::parse_lossy(last_status.as_deref()),
        last_alert_at: optional_millis(row.get(12)?)?,
    })
}

fn result_from_row(row: &Row) -> Result<CheckResult, StoreError> {
    let id: String = row.get(0)?;
    let target_id: String = row.get(1)?;
    let latency: Option<i64> = row.get(3)?;

    Ok(CheckResult {
        id: parse_uuid(&id)?,
        target_id: parse_uuid(&target_id)?,
        ok: row.get::<i64>(2)? != 0,
        latency_ms: latency.map(|v| v.max(0) as u64),
        error: row.get(4)?,
        checked_at: from_millis(row.get(5)?)?,
    })
}

fn settings_from_row(row: &Row) -> Result<NotificationSettings, StoreError> {
    let user_id: String = row.get(0)?;
    let recipients: String = row.get(1)?;
    let recipients: BTreeSet<String> = serde_json::from_str(&recipients)?;

    Ok(NotificationSettings {
        user_id: parse_uuid(&user_id)?,
        email_recipients: recipients,
        telegram_chat_id: row.get(2)?,
        daily_digest: row.get::<i64>(3)? != 0,
        monthly_digest: row.get::<i64>(4)? != 0,
        connect_token: row.get(5)?,
    })
}

fn user_from_row(row: &Row) -> Result<User, StoreError> {
    let id: String = row.get(0)?;
    Ok(User {
        id: parse_uuid(&id)?,
        email: row.get(1)?,
        created_at: from_millis(row.get(2)?)?,
    })
}

#[async_trait]
impl TargetStore for DatabaseImpl {
    async fn create_target(&self, target: NewTarget, now: DateTime<Utc>) -> Result<MonitorTarget, StoreError> {
        let target = target.validate()?;
        let conn = self.get_conn().await?;
        let id = Uuid::new_v4();
        let created_at = to_millis(now);

        conn.execute(
            "INSERT INTO monitor_targets (id, user_id, label, kind, address, port, interval_minutes, enabled, created_at, updated_at, last_status) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id.to_string(),
                target.user_id.to_string(),
                target.label.clone(),
                target.kind.as_str(),
                target.address.clone(),
                target.port.map(i64::from),
                i64::from(target.interval_minutes),
                bool_to_int(target.enabled),
                created_at,
                created_at,
                TargetStatus::Unknown.as_str()
            ],
        )
        .await?;

        self.get_target(id).await?.ok_or(StoreError::NotFound)
    }

    async fn list_enabled_targets(&self) -> Result<Vec<MonitorTarget>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM monitor_targets WHERE enabled = 1 ORDER BY created_at ASC, id ASC"),
                (),
            )
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }
        Ok(targets)
    }

    async fn list_due_candidates(&self, checked_before: DateTime<Utc>) -> Result<Vec<MonitorTarget>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TARGET_COLUMNS} FROM monitor_targets \
                     WHERE enabled = 1 AND (last_checked_at IS NULL OR last_checked_at <= ?) \
                     ORDER BY created_at ASC, id ASC"
                ),
                params![to_millis(checked_before)],
            )
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }
        Ok(targets)
    }

    async fn list_targets_for_user(&self, user_id: Uuid) -> Result<Vec<MonitorTarget>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM monitor_targets WHERE user_id = ? ORDER BY created_at ASC, id ASC"),
                params![user_id.to_string()],
            )
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }
        Ok(targets)
    }

    async fn get_target(&self, id: Uuid) -> Result<Option<MonitorTarget>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM monitor_targets WHERE id = ?"),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(target_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn record_check(&self, id: Uuid, checked_at: DateTime<Utc>, status: TargetStatus) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let at = to_millis(checked_at);
        let updated = conn
            .execute(
                "UPDATE monitor_targets SET last_checked_at = ?, last_status = ?, updated_at = ? WHERE id = ?",
                params![at, status.as_str(), at, id.to_string()],
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_target_state(
        &self,
        id: Uuid,
        update: TargetStateUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE monitor_targets SET last_status = ?, last_alert_at = ?, updated_at = ? WHERE id = ?",
                params![
                    update.last_status.as_str(),
                    update.last_alert_at.map(to_millis),
                    to_millis(now),
                    id.to_string()
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_target(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        tx.execute("DELETE FROM check_results WHERE target_id = ?", params![id.to_string()])
            .await?;
        let deleted = tx
            .execute("DELETE FROM monitor_targets WHERE id = ?", params![id.to_string()])
            .await?;
        tx.commit().await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ResultStore for DatabaseImpl {
    async fn append_result(&self, result: NewCheckResult) -> Result<CheckResult, StoreError> {
        let conn = self.get_conn().await?;
        let stored = CheckResult {
            id: Uuid::new_v4(),
            target_id: result.target_id,
            ok: result.ok,
            latency_ms: result.latency_ms,
            error: result.error,
            checked_at: result.checked_at,
        };

        conn.execute(
            "INSERT INTO check_results (id, target_id, ok, latency_ms, error, checked_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                stored.id.to_string(),
                stored.target_id.to_string(),
                bool_to_int(stored.ok),
                stored.latency_ms.map(|v| v.min(i64::MAX as u64) as i64),
                stored.error.clone(),
                to_millis(stored.checked_at)
            ],
        )
        .await?;

        Ok(stored)
    }

    async fn latest_result(&self, target_id: Uuid) -> Result<Option<CheckResult>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, target_id, ok, latency_ms, error, checked_at FROM check_results \
                 WHERE target_id = ? ORDER BY checked_at DESC, rowid DESC LIMIT 1",
                params![target_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(result_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn failed_results_for_user(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FailedCheck>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT r.target_id, t.label, r.error, r.checked_at FROM check_results r \
                 JOIN monitor_targets t ON t.id = r.target_id \
                 WHERE t.user_id = ? AND r.ok = 0 AND r.checked_at >= ? AND r.checked_at < ? \
                 ORDER BY r.checked_at DESC, r.rowid DESC",
                params![user_id.to_string(), to_millis(from), to_millis(to)],
            )
            .await?;

        let mut failures = Vec::new();
        while let Some(row) = rows.next().await? {
            let target_id: String = row.get(0)?;
            failures.push(FailedCheck {
                target_id: parse_uuid(&target_id)?,
                target_label: row.get(1)?,
                error: row.get(2)?,
                checked_at: from_millis(row.get(3)?)?,
            });
        }
        Ok(failures)
    }
}

#[async_trait]
impl SettingsStore for DatabaseImpl {
    async fn create_user(&self, email: &str, now: DateTime<Utc>) -> Result<User, StoreError> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::Invalid(format!("not an email address: {email:?}")));
        }

        let conn = self.get_conn().await?;
        let user = User {
            id: Uuid::new_v4(),
            email,
            created_at: now,
        };
        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)",
            params![user.id.to_string(), user.email.clone(), to_millis(now)],
        )
        .await?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT id, email, created_at FROM users ORDER BY created_at ASC, id ASC", ())
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(user_from_row(&row)?);
        }
        Ok(users)
    }

    async fn get_settings(&self, user_id: Uuid) -> Result<Option<NotificationSettings>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {SETTINGS_COLUMNS} FROM notification_settings WHERE user_id = ?"),
                params![user_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(settings_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_or_create_settings(&self, user_id: Uuid) -> Result<NotificationSettings, StoreError> {
        if let Some(settings) = self.get_settings(user_id).await? {
            return Ok(settings);
        }

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO notification_settings (user_id) VALUES (?)",
            params![user_id.to_string()],
        )
        .await?;
        drop(conn);

        self.get_settings(user_id).await?.ok_or(StoreError::NotFound)
    }

    async fn upsert_settings(&self, settings: &NotificationSettings) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let recipients = serde_json::to_string(&settings.email_recipients)?;

        conn.execute(
            "INSERT INTO notification_settings (user_id, email_recipients, telegram_chat_id, daily_digest, monthly_digest, connect_token) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
                email_recipients = excluded.email_recipients, \
                telegram_chat_id = excluded.telegram_chat_id, \
                daily_digest = excluded.daily_digest, \
                monthly_digest = excluded.monthly_digest, \
                connect_token = excluded.connect_token",
            params![
                settings.user_id.to_string(),
                recipients,
                settings.telegram_chat_id.clone(),
                bool_to_int(settings.daily_digest),
                bool_to_int(settings.monthly_digest),
                settings.connect_token.clone()
            ],
        )
        .await?;
        Ok(())
    }

    async fn issue_connect_token(&self, user_id: Uuid) -> Result<String, StoreError> {
        let mut settings = self.get_or_create_settings(user_id).await?;
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CONNECT_TOKEN_LEN)
            .map(char::from)
            .collect();

        settings.connect_token = Some(token.clone());
        self.upsert_settings(&settings).await?;
        Ok(token)
    }

    async fn link_chat(&self, token: &str, chat_id: &str) -> Result<Uuid, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT user_id FROM notification_settings WHERE connect_token = ?",
                params![token.to_string()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Err(StoreError::NotFound);
        };
        let user_id: String = row.get(0)?;
        drop(rows);

        conn.execute(
            "UPDATE notification_settings SET telegram_chat_id = ?, connect_token = NULL WHERE user_id = ?",
            params![chat_id.to_string(), user_id.clone()],
        )
        .await?;

        parse_uuid(&user_id)
    }

    async fn unlink_chat(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let cleared = conn
            .execute(
                "UPDATE notification_settings SET telegram_chat_id = NULL \
                 WHERE user_id = ? AND telegram_chat_id IS NOT NULL",
                params![user_id.to_string()],
            )
            .await?;
        Ok(cleared > 0)
    }

    async fn register_push_device(&self, user_id: Uuid, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(StoreError::Invalid("push token must not be empty".into()));
        }

        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO push_devices (token, user_id, created_at) VALUES (?, ?, ?)",
                params![token.to_string(), user_id.to_string(), to_millis(now)],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn push_tokens(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT token FROM push_devices WHERE user_id = ? ORDER BY created_at ASC, token ASC",
                params![user_id.to_string()],
            )
            .await?;

        let mut tokens = Vec::new();
        while let Some(row) = rows.next().await? {
            tokens.push(row.get(0)?);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TargetKind;
    use crate::testing::{at, temp_database};
    use chrono::Duration;

    #[tokio::test]
    async fn due_candidates_respect_cutoff_and_order() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("ops@example.com", at(0)).await.unwrap();

        let second = db
            .create_target(NewTarget::new(user.id, "second", TargetKind::Http, "b.example.com"), at(10))
            .await
            .unwrap();
        let first = db
            .create_target(NewTarget::new(user.id, "first", TargetKind::Http, "a.example.com"), at(5))
            .await
            .unwrap();
        let recent = db
            .create_target(NewTarget::new(user.id, "recent", TargetKind::Http, "c.example.com"), at(1))
            .await
            .unwrap();
        db.create_target(NewTarget::new(user.id, "off", TargetKind::Http, "d.example.com").disabled(), at(0))
            .await
            .unwrap();

        db.record_check(recent.id, at(100), TargetStatus::Up).await.unwrap();

        let due = db.list_due_candidates(at(100) - Duration::seconds(60)).await.unwrap();
        let ids: Vec<_> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(due[0].address, "http://a.example.com");
    }

    #[tokio::test]
    async fn latest_result_prefers_newest() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("ops@example.com", at(0)).await.unwrap();
        let target = db
            .create_target(NewTarget::new(user.id, "db", TargetKind::Tcp, "db.local").with_port(5432), at(0))
            .await
            .unwrap();

        assert!(db.latest_result(target.id).await.unwrap().is_none());

        for (minute, ok) in [(1, false), (2, true), (3, false)] {
            db.append_result(NewCheckResult {
                target_id: target.id,
                ok,
                latency_ms: ok.then_some(12),
                error: (!ok).then(|| "timeout".to_string()),
                checked_at: at(minute * 60),
            })
            .await
            .unwrap();
        }

        let latest = db.latest_result(target.id).await.unwrap().unwrap();
        assert!(!latest.ok);
        assert_eq!(latest.checked_at, at(180));
        assert_eq!(latest.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn deleting_a_target_removes_its_results() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("ops@example.com", at(0)).await.unwrap();
        let target = db
            .create_target(NewTarget::new(user.id, "site", TargetKind::Http, "example.com"), at(0))
            .await
            .unwrap();
        db.append_result(NewCheckResult {
            target_id: target.id,
            ok: false,
            latency_ms: None,
            error: Some("HTTP 503".into()),
            checked_at: at(60),
        })
        .await
        .unwrap();

        assert!(db.delete_target(target.id).await.unwrap());
        assert!(db.get_target(target.id).await.unwrap().is_none());
        assert!(db.latest_result(target.id).await.unwrap().is_none());
        assert!(!db.delete_target(target.id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_results_are_windowed_per_user() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let alice = db.create_user("alice@example.com", at(0)).await.unwrap();
        let bob = db.create_user("bob@example.com", at(0)).await.unwrap();
        let mine = db
            .create_target(NewTarget::new(alice.id, "mine", TargetKind::Http, "example.com"), at(0))
            .await
            .unwrap();
        let theirs = db
            .create_target(NewTarget::new(bob.id, "theirs", TargetKind::Http, "example.org"), at(0))
            .await
            .unwrap();

        for (target, ok, secs) in [
            (mine.id, false, 50),
            (mine.id, false, 150),
            (mine.id, true, 160),
            (mine.id, false, 400),
            (theirs.id, false, 150),
        ] {
            db.append_result(NewCheckResult {
                target_id: target,
                ok,
                latency_ms: None,
                error: (!ok).then(|| "connection refused".to_string()),
                checked_at: at(secs),
            })
            .await
            .unwrap();
        }

        let failures = db.failed_results_for_user(alice.id, at(100), at(400)).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target_label, "mine");
        assert_eq!(failures[0].checked_at, at(150));
    }

    #[tokio::test]
    async fn settings_are_created_lazily_and_upserted() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("Ops@Example.com ", at(0)).await.unwrap();
        assert_eq!(user.email, "ops@example.com");

        assert!(db.get_settings(user.id).await.unwrap().is_none());
        let mut settings = db.get_or_create_settings(user.id).await.unwrap();
        assert_eq!(settings, NotificationSettings::empty(user.id));

        settings.email_recipients = BTreeSet::from(["b@example.com".to_string(), "a@example.com".to_string()]);
        settings.daily_digest = true;
        db.upsert_settings(&settings).await.unwrap();

        let stored = db.get_settings(user.id).await.unwrap().unwrap();
        assert_eq!(stored, settings);
    }

    #[tokio::test]
    async fn connect_token_is_consumed_by_linking() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("ops@example.com", at(0)).await.unwrap();

        let token = db.issue_connect_token(user.id).await.unwrap();
        assert_eq!(token.len(), CONNECT_TOKEN_LEN);

        assert_eq!(db.link_chat(&token, "424242").await.unwrap(), user.id);
        let settings = db.get_settings(user.id).await.unwrap().unwrap();
        assert_eq!(settings.telegram_chat_id.as_deref(), Some("424242"));
        assert!(settings.connect_token.is_none());

        assert!(matches!(db.link_chat(&token, "1").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn unlinking_clears_the_chat_id() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("ops@example.com", at(0)).await.unwrap();
        assert!(!db.unlink_chat(user.id).await.unwrap());

        let token = db.issue_connect_token(user.id).await.unwrap();
        db.link_chat(&token, "424242").await.unwrap();

        assert!(db.unlink_chat(user.id).await.unwrap());
        let settings = db.get_settings(user.id).await.unwrap().unwrap();
        assert!(settings.telegram_chat_id.is_none());
        assert!(!db.unlink_chat(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn push_devices_ignore_duplicates() {
        let test_db = temp_database().await;
        let db = &test_db.db;
        let user = db.create_user("ops@example.com", at(0)).await.unwrap();

        assert!(db.register_push_device(user.id, "ExponentPushToken[abc]", at(1)).await.unwrap());
        assert!(!db.register_push_device(user.id, "ExponentPushToken[abc]", at(2)).await.unwrap());
        assert!(db.register_push_device(user.id, "ExponentPushToken[def]", at(3)).await.unwrap());

        assert_eq!(
            db.push_tokens(user.id).await.unwrap(),
            vec!["ExponentPushToken[abc]".to_string(), "ExponentPushToken[def]".to_string()]
        );
    }
}
