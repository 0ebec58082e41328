use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::alert::{AlertDecisionEngine, AlertKind};
use super::due::{DueTarget, RECHECK_GUARD, select_due};
use super::executor::CheckExecutor;
use super::inflight::InFlight;
use super::retry::{RetryCoordinator, Succeeded};
use crate::clock::{Clock, next_daily, next_minute, next_monthly};
use crate::database::models::{CheckResult, MonitorTarget, TargetStateUpdate, TargetStatus};
use crate::database::{ResultStore, StoreError, TargetStore};
use crate::digest::{DigestPeriod, DigestReporter};
use crate::notifications::message::format_local;
use crate::notifications::{Notification, NotificationDispatcher};

/// Failure of one target's check cycle. Only that target is affected.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("target {0} disappeared during its check")]
    TargetVanished(Uuid),
}

impl Succeeded for CheckResult {
    fn succeeded(&self) -> bool {
        self.ok
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Targets selected as due this tick
    pub due: usize,
    /// Pipelines spawned
    pub started: usize,
    /// Due targets whose previous pipeline is still running
    pub skipped_in_flight: usize,
    /// Earlier pipelines reaped during this tick that ended in error
    pub failed: usize,
}

/// Cadence settings for the scheduler loops
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent_checks: usize,
    pub timezone: Tz,
    pub daily_digest_at: NaiveTime,
    pub monthly_digest_day: u32,
    pub monthly_digest_at: NaiveTime,
}

/// Collaborators the scheduler drives
pub struct SchedulerParts {
    pub targets: Arc<dyn TargetStore>,
    pub results: Arc<dyn ResultStore>,
    pub executor: Arc<CheckExecutor>,
    pub retry: RetryCoordinator,
    pub alerts: AlertDecisionEngine,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub digests: Arc<DigestReporter>,
    pub clock: Arc<dyn Clock>,
}

/// State shared by every spawned pipeline
struct Pipeline {
    targets: Arc<dyn TargetStore>,
    results: Arc<dyn ResultStore>,
    executor: Arc<CheckExecutor>,
    retry: RetryCoordinator,
    alerts: AlertDecisionEngine,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl Pipeline {
    /// Retry, decide, notify, write back. Every attempt is persisted before
    /// the decision reads the latest result.
    async fn process(&self, due: DueTarget) -> Result<(), PipelineError> {
        let DueTarget { target, previous_status } = due;
        let target_ref = &target;

        let cycle = self
            .retry
            .run(move |attempt| async move {
                debug!(target_id = %target_ref.id, label = %target_ref.label, attempt, "checking target");
                self.executor.check_and_persist(target_ref).await?;
                self.results
                    .latest_result(target_ref.id)
                    .await?
                    .ok_or(PipelineError::TargetVanished(target_ref.id))
            })
            .await?;

        if cycle.interrupted {
            info!(target_id = %target.id, label = %target.label, attempts = cycle.attempts, "check cycle interrupted by shutdown");
            return self.restore_status(&target, previous_status).await;
        }

        let fresh = self
            .targets
            .get_target(target.id)
            .await?
            .ok_or(PipelineError::TargetVanished(target.id))?;
        let now = self.clock.now();
        let decision = self.alerts.decide(previous_status, cycle.outcome.ok, fresh.last_alert_at, now);

        debug!(
            target_id = %fresh.id,
            label = %fresh.label,
            final_ok = cycle.outcome.ok,
            previous = %previous_status,
            cooldown_elapsed = self.alerts.cooldown_elapsed(fresh.last_alert_at, now),
            notify = ?decision.notify,
            "alert decision"
        );

        if let Some(kind) = decision.notify {
            let when = format_local(now, self.tz);
            let notification = match kind {
                AlertKind::Down => Notification::down(
                    &fresh,
                    cycle.outcome.error.as_deref(),
                    cycle.attempts,
                    self.retry.interval().as_secs(),
                    &when,
                ),
                AlertKind::Recovered => Notification::recovered(&fresh, &when),
            };
            let report = self.dispatcher.notify(fresh.user_id, &notification).await;
            info!(target_id = %fresh.id, label = %fresh.label, kind = %notification.kind, ?report, "alert sent");
        }

        self.targets
            .update_target_state(fresh.id, decision.state_update(), now)
            .await?;
        Ok(())
    }

    /// Undo the per-attempt status writes of a cycle that ended without a
    /// decision, so the next cycle still sees the transition.
    async fn restore_status(&self, target: &MonitorTarget, previous_status: TargetStatus) -> Result<(), PipelineError> {
        let current = self
            .targets
            .get_target(target.id)
            .await?
            .ok_or(PipelineError::TargetVanished(target.id))?;
        let update = TargetStateUpdate {
            last_status: previous_status,
            last_alert_at: current.last_alert_at,
        };
        self.targets.update_target_state(target.id, update, self.clock.now()).await?;
        Ok(())
    }
}

async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender dropped without signalling: run until the process ends.
        std::future::pending::<()>().await;
    }
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> std::time::Duration {
    (at - now).to_std().unwrap_or_default()
}

/// Minute ticks plus the daily and monthly digest jobs
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    digests: Arc<DigestReporter>,
    settings: SchedulerSettings,
    inflight: InFlight,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<Result<(), PipelineError>>>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(parts: SchedulerParts, settings: SchedulerSettings, shutdown: watch::Receiver<bool>) -> Self {
        let pipeline = Pipeline {
            targets: parts.targets,
            results: parts.results,
            executor: parts.executor,
            retry: parts.retry.with_shutdown(shutdown.clone()),
            alerts: parts.alerts,
            dispatcher: parts.dispatcher,
            clock: parts.clock,
            tz: settings.timezone,
        };

        Self {
            pipeline: Arc::new(pipeline),
            digests: parts.digests,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_checks.max(1))),
            settings,
            inflight: InFlight::new(),
            tasks: Mutex::new(JoinSet::new()),
            shutdown,
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.inflight
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn count_failure(result: Result<Result<(), PipelineError>, tokio::task::JoinError>) -> usize {
        match result {
            Ok(Ok(())) => 0,
            // Already logged with target identity inside the task.
            Ok(Err(_)) => 1,
            Err(err) => {
                error!(error = %err, "check pipeline aborted");
                1
            }
        }
    }

    /// One minute tick: select due targets and spawn a pipeline for each
    /// target not already in flight.
    pub async fn run_tick(&self) -> Result<TickReport, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let mut report = TickReport::default();
        while let Some(finished) = tasks.try_join_next() {
            report.failed += Self::count_failure(finished);
        }

        if self.is_shutting_down() {
            return Ok(report);
        }

        let now = self.pipeline.clock.now();
        let candidates = self.pipeline.targets.list_due_candidates(now - RECHECK_GUARD).await?;
        let due = select_due(candidates, now);
        report.due = due.len();

        for item in due {
            let Some(guard) = self.inflight.try_acquire(item.target.id) else {
                debug!(target_id = %item.target.id, label = %item.target.label, "previous check still running, skipping");
                report.skipped_in_flight += 1;
                continue;
            };

            let pipeline = Arc::clone(&self.pipeline);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Ok(());
                };

                let target_id = item.target.id;
                let label = item.target.label.clone();
                let result = pipeline.process(item).await;
                if let Err(err) = &result {
                    error!(%target_id, %label, error = %err, "check pipeline failed");
                }
                result
            });
            report.started += 1;
        }

        if report.due > 0 {
            info!(
                due = report.due,
                started = report.started,
                skipped_in_flight = report.skipped_in_flight,
                "tick dispatched"
            );
        }
        Ok(report)
    }

    /// Wait for every spawned pipeline; returns how many failed.
    pub async fn drain(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut failed = 0;
        while let Some(finished) = tasks.join_next().await {
            failed += Self::count_failure(finished);
        }
        failed
    }

    async fn minute_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        while !self.is_shutting_down() {
            let now = self.pipeline.clock.now();
            tokio::select! {
                _ = self.pipeline.clock.sleep(until(now, next_minute(now))) => {}
                _ = shutdown_signal(&mut shutdown) => break,
            }

            if let Err(err) = self.run_tick().await {
                error!(error = %err, "tick failed");
            }
        }
    }

    async fn digest_loop(&self, period: DigestPeriod) {
        let mut shutdown = self.shutdown.clone();
        let tz = self.settings.timezone;
        while !self.is_shutting_down() {
            let now = self.pipeline.clock.now();
            let next = match period {
                DigestPeriod::Daily => next_daily(now, tz, self.settings.daily_digest_at),
                DigestPeriod::Monthly => next_monthly(
                    now,
                    tz,
                    self.settings.monthly_digest_day,
                    self.settings.monthly_digest_at,
                ),
            };
            debug!(%period, next = %format_local(next, tz), "next digest scheduled");

            tokio::select! {
                _ = self.pipeline.clock.sleep(until(now, next)) => {}
                _ = shutdown_signal(&mut shutdown) => break,
            }

            if let Err(err) = self.digests.run(period).await {
                error!(%period, error = %err, "digest run failed");
            }
        }
    }

    /// Run all loops until shutdown is signalled, then wait for in-flight
    /// pipelines to finish.
    pub async fn run(&self) {
        info!(
            timezone = %self.settings.timezone,
            max_concurrent_checks = self.settings.max_concurrent_checks,
            "scheduler started"
        );

        tokio::join!(
            self.minute_loop(),
            self.digest_loop(DigestPeriod::Daily),
            self.digest_loop(DigestPeriod::Monthly),
        );

        let failed = self.drain().await;
        if failed > 0 {
            warn!(failed, "some check pipelines failed during shutdown");
        }
        info!("scheduler stopped");
    }
}
