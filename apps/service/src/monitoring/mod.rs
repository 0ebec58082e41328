//! Check execution and scheduling.
//!
//! A minute tick selects due targets, each due target runs a retry cycle of
//! probe attempts, and the final attempt drives the alert decision.

pub mod alert;
pub mod checker;
pub mod due;
pub mod executor;
pub mod inflight;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use alert::{AlertDecision, AlertDecisionEngine, AlertKind};
pub use checker::{NetworkProbe, Probe};
pub use executor::{CheckExecutor, ManualCheck, ManualCheckError};
pub use retry::{RetryCoordinator, RetryOutcome};
pub use scheduler::{Scheduler, SchedulerParts, SchedulerSettings, TickReport};
pub use types::{ProbeFailure, ProbeOutcome, ProbeRequest};
