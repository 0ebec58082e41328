//! Assembles the service from [`Config`] and runs it until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::database::{DatabaseImpl, initialize_database};
use crate::digest::DigestReporter;
use crate::monitoring::{AlertDecisionEngine, CheckExecutor, NetworkProbe, RetryCoordinator, Scheduler, SchedulerParts, SchedulerSettings};
use crate::notifications::{ExpoPushTransport, NotificationDispatcher, SmtpEmailTransport, TelegramTransport};
use crate::pool::open_local;

/// Every long-lived component, wired once and shared by the CLI commands
pub struct Services {
    pub config: Arc<Config>,
    pub database: Arc<DatabaseImpl>,
    pub clock: Arc<dyn Clock>,
    pub executor: Arc<CheckExecutor>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub digests: Arc<DigestReporter>,
    pub timezone: Tz,
}

impl Services {
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let timezone = config.timezone()?;

        info!(path = %config.database.path, "opening database");
        let pool = open_local(&config.database.path, config.database.max_connections.max(1))
            .await
            .with_context(|| format!("cannot open database {}", config.database.path))?;
        initialize_database(&pool).await?;
        let database = Arc::new(DatabaseImpl::new_from_pool(pool));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let probe = Arc::new(NetworkProbe::new(&config.probe.user_agent, config.probe.force_ipv4)?);
        let executor = Arc::new(
            CheckExecutor::new(probe, database.clone(), database.clone(), clock.clone()).with_timeouts(
                Duration::from_millis(config.probe.http_timeout_ms),
                Duration::from_millis(config.probe.tcp_timeout_ms),
            ),
        );

        let dispatcher = Arc::new(NotificationDispatcher::new(
            database.clone(),
            Arc::new(SmtpEmailTransport::from_config(&config.email)?),
            Arc::new(ExpoPushTransport::new(&config.push)?),
            Arc::new(TelegramTransport::new(&config.telegram)?),
        ));
        let digests = Arc::new(DigestReporter::new(
            database.clone(),
            database.clone(),
            dispatcher.clone(),
            clock.clone(),
            timezone,
        ));

        Ok(Self {
            config,
            database,
            clock,
            executor,
            dispatcher,
            digests,
            timezone,
        })
    }

    pub fn retry_coordinator(&self) -> RetryCoordinator {
        RetryCoordinator::new(self.config.scheduler.retry_attempts, self.config.retry_interval(), self.clock.clone())
    }

    pub fn scheduler(&self, shutdown: watch::Receiver<bool>) -> Result<Scheduler> {
        let settings = SchedulerSettings {
            max_concurrent_checks: self.config.scheduler.max_concurrent_checks,
            timezone: self.timezone,
            daily_digest_at: self.config.daily_digest_time()?,
            monthly_digest_day: self.config.scheduler.monthly_digest_day,
            monthly_digest_at: self.config.monthly_digest_time()?,
        };
        let parts = SchedulerParts {
            targets: self.database.clone(),
            results: self.database.clone(),
            executor: self.executor.clone(),
            retry: self.retry_coordinator(),
            alerts: AlertDecisionEngine::new(self.config.alert_cooldown()),
            dispatcher: self.dispatcher.clone(),
            digests: self.digests.clone(),
            clock: self.clock.clone(),
        };
        Ok(Scheduler::new(parts, settings, shutdown))
    }
}

/// Main loop of the daemon
pub struct Orchestrator {
    scheduler: Scheduler,
    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    /// Build the services and run the scheduler until Ctrl-C.
    pub async fn start(config: Config) -> Result<()> {
        let services = Services::build(config).await?;
        Self::new(&services)?.run().await
    }

    pub fn new(services: &Services) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            scheduler: services.scheduler(shutdown_rx)?,
            shutdown_tx,
        })
    }

    pub async fn run(self) -> Result<()> {
        let shutdown_tx = self.shutdown_tx;
        let signal_task = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested, finishing in-flight checks"),
                Err(err) => error!(error = %err, "cannot listen for Ctrl-C, stopping"),
            }
            let _ = shutdown_tx.send(true);
        });

        self.scheduler.run().await;
        signal_task.abort();
        Ok(())
    }
}
