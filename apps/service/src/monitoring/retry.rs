use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::checker::Probe;
use super::types::{ProbeOutcome, ProbeRequest};
use crate::clock::Clock;

/// Anything the coordinator can judge as a pass or a fail
pub trait Succeeded {
    fn succeeded(&self) -> bool;
}

impl Succeeded for ProbeOutcome {
    fn succeeded(&self) -> bool {
        self.ok
    }
}

/// The last attempt's value plus how the cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    pub outcome: T,
    pub attempts: u32,
    /// Shutdown arrived during an inter-attempt wait
    pub interrupted: bool,
}

/// Fixed-delay retry: up to `attempts` tries, `interval` apart, stopping at
/// the first success. There is no wait after the final attempt.
#[derive(Clone)]
pub struct RetryCoordinator {
    attempts: u32,
    interval: Duration,
    clock: Arc<dyn Clock>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetryCoordinator {
    pub fn new(attempts: u32, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
            clock,
            shutdown: None,
        }
    }

    /// Abort pending waits once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `attempt` (called with the 1-based attempt number) until it
    /// succeeds or attempts run out. An `Err` from `attempt` stops the cycle.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<RetryOutcome<T>, E>
    where
        T: Succeeded,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut number = 1;
        loop {
            let outcome = attempt(number).await?;
            let ok = outcome.succeeded();
            debug!(attempt = number, of = self.attempts, ok, "attempt finished");

            if ok || number >= self.attempts {
                return Ok(RetryOutcome {
                    outcome,
                    attempts: number,
                    interrupted: false,
                });
            }

            if !self.wait().await {
                debug!(attempt = number, "retry wait interrupted by shutdown");
                return Ok(RetryOutcome {
                    outcome,
                    attempts: number,
                    interrupted: true,
                });
            }
            number += 1;
        }
    }

    /// Probe without persistence, as used by ad-hoc checks.
    pub async fn run_with_retries(&self, probe: &dyn Probe, request: &ProbeRequest) -> RetryOutcome<ProbeOutcome> {
        let result = self
            .run(move |_| async move { Ok::<_, Infallible>(probe.probe(request).await) })
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Sleep for one interval. Returns `false` if shutdown cut the wait short.
    async fn wait(&self) -> bool {
        let Some(shutdown) = &self.shutdown else {
            self.clock.sleep(self.interval).await;
            return true;
        };

        let mut shutdown = shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }

        let stop = async move {
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                // Sender gone without signalling: never interrupt.
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = self.clock.sleep(self.interval) => true,
            _ = stop => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeFailure;
    use crate::testing::{ManualClock, ScriptedProbe, at};

    fn request() -> ProbeRequest {
        ProbeRequest::tcp("db.local", 5432, Duration::from_secs(8))
    }

    #[tokio::test]
    async fn persistent_failure_uses_every_attempt() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let probe = ScriptedProbe::always(ProbeOutcome::failure(ProbeFailure::ConnectionRefused, 2));
        let retry = RetryCoordinator::new(3, Duration::from_secs(60), clock.clone());

        let result = retry.run_with_retries(&probe, &request()).await;

        assert_eq!(result.attempts, 3);
        assert!(!result.interrupted);
        assert!(!result.outcome.ok);
        assert_eq!(probe.calls(), 3);
        // Two waits between three attempts, none after the last.
        assert_eq!(clock.now(), at(120));
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let probe = ScriptedProbe::sequence(vec![
            ProbeOutcome::failure(ProbeFailure::Timeout, 0),
            ProbeOutcome::success(15),
        ]);
        let retry = RetryCoordinator::new(3, Duration::from_secs(60), clock.clone());

        let result = retry.run_with_retries(&probe, &request()).await;

        assert!(result.outcome.ok);
        assert_eq!(result.attempts, 2);
        assert_eq!(probe.calls(), 2);
        assert_eq!(clock.now(), at(60));
    }

    #[tokio::test]
    async fn last_failure_detail_wins() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let probe = ScriptedProbe::sequence(vec![
            ProbeOutcome::failure(ProbeFailure::Timeout, 0),
            ProbeOutcome::failure(ProbeFailure::HttpStatus(502), 30),
        ]);
        let retry = RetryCoordinator::new(2, Duration::from_secs(1), clock);

        let result = retry.run_with_retries(&probe, &request()).await;
        assert_eq!(result.outcome.error().as_deref(), Some("HTTP 502"));
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_wait() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let probe = ScriptedProbe::always(ProbeOutcome::failure(ProbeFailure::Timeout, 0));
        let (tx, rx) = watch::channel(false);
        let retry = RetryCoordinator::new(3, Duration::from_secs(60), clock.clone()).with_shutdown(rx);

        tx.send(true).unwrap();
        let result = retry.run_with_retries(&probe, &request()).await;

        assert!(result.interrupted);
        assert_eq!(result.attempts, 1);
        assert_eq!(probe.calls(), 1);
        assert_eq!(clock.now(), at(0));
    }

    #[tokio::test]
    async fn attempt_errors_stop_the_cycle() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let retry = RetryCoordinator::new(3, Duration::from_secs(60), clock);

        let result: Result<RetryOutcome<ProbeOutcome>, &str> = retry
            .run(|attempt| async move { if attempt == 2 { Err("store down") } else { Ok(ProbeOutcome::timeout()) } })
            .await;
        assert_eq!(result, Err("store down"));
    }
}
