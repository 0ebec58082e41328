use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::checker::Probe;
use super::types::ProbeRequest;
use crate::clock::Clock;
use crate::context::UserContext;
use crate::database::models::{CheckResult, MonitorTarget, NewCheckResult, TargetStatus};
use crate::database::{ResultStore, StoreError, TargetStore};

#[derive(Debug, Error)]
pub enum ManualCheckError {
    #[error("target not found")]
    NotFound,

    #[error("target is disabled")]
    Disabled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Response to an on-demand check
#[derive(Debug, Clone)]
pub struct ManualCheck {
    pub ok: bool,
    pub target: MonitorTarget,
    pub result: CheckResult,
}

/// Executes single probe attempts and records them
pub struct CheckExecutor {
    probe: Arc<dyn Probe>,
    targets: Arc<dyn TargetStore>,
    results: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
    http_timeout: Duration,
    tcp_timeout: Duration,
}

impl CheckExecutor {
    pub fn new(
        probe: Arc<dyn Probe>,
        targets: Arc<dyn TargetStore>,
        results: Arc<dyn ResultStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            probe,
            targets,
            results,
            clock,
            http_timeout: Duration::from_millis(12_000),
            tcp_timeout: Duration::from_millis(8_000),
        }
    }

    pub fn with_timeouts(mut self, http_timeout: Duration, tcp_timeout: Duration) -> Self {
        self.http_timeout = http_timeout;
        self.tcp_timeout = tcp_timeout;
        self
    }

    pub fn request_for(&self, target: &MonitorTarget) -> ProbeRequest {
        ProbeRequest::for_target(target, self.http_timeout, self.tcp_timeout)
    }

    /// One probe attempt: append the result, then stamp the target with
    /// the check time and status.
    pub async fn check_and_persist(&self, target: &MonitorTarget) -> Result<CheckResult, StoreError> {
        let outcome = self.probe.probe(&self.request_for(target)).await;
        let checked_at = self.clock.now();

        debug!(
            target_id = %target.id,
            label = %target.label,
            ok = outcome.ok,
            latency_ms = ?outcome.latency_ms,
            error = ?outcome.error(),
            "probe attempt"
        );

        let result = self
            .results
            .append_result(NewCheckResult {
                target_id: target.id,
                ok: outcome.ok,
                latency_ms: outcome.latency_ms,
                error: outcome.error(),
                checked_at,
            })
            .await?;

        self.targets
            .record_check(target.id, checked_at, TargetStatus::from_ok(outcome.ok))
            .await?;

        Ok(result)
    }

    /// Single attempt on behalf of `ctx`, no retries. Targets owned by
    /// someone else are reported as missing.
    pub async fn manual_check(&self, ctx: &UserContext, target_id: Uuid) -> Result<ManualCheck, ManualCheckError> {
        let target = self
            .targets
            .get_target(target_id)
            .await?
            .filter(|target| ctx.owns(target.user_id))
            .ok_or(ManualCheckError::NotFound)?;

        if !target.enabled {
            return Err(ManualCheckError::Disabled);
        }

        let result = self.check_and_persist(&target).await?;
        let target = self.targets.get_target(target_id).await?.ok_or(ManualCheckError::NotFound)?;

        Ok(ManualCheck {
            ok: result.ok,
            target,
            result,
        })
    }
}
