//! Health diagnostics for a RabbitMQ cluster running on Kubernetes.
//!
//! Each cycle gathers broker-management and pod state into one immutable
//! [`Snapshot`], evaluates it against a closed catalogue of health rules,
//! optionally restarts unhealthy broker pods under a per-pod rate limit, and
//! reports findings and remediation records to the attached sinks.
//!
//! # Architecture
//!
//! - [`SnapshotFetcher`] runs every sub-fetch concurrently, tolerating
//!   partial failure
//! - [`RuleRegistry`] holds the six built-in [`Rule`]s
//! - [`Evaluator`] runs the rules with fault containment and deduplicates
//! - [`RemediationController`] performs rate-limited pod restarts
//! - [`Reporter`] dispatches reports to console, log and metrics sinks
//! - [`Doctor`] ties them together and carries the previous snapshot
//!
//! The broker and orchestrator are reached only through the [`BrokerApi`] and
//! [`Orchestrator`] traits.

pub mod collectors;
pub mod config;
pub mod cycle;
pub mod error;
pub mod evaluator;
pub mod fetcher;
pub mod remediation;
pub mod reporter;
pub mod rules;
pub mod server;
pub mod snapshot;

pub use collectors::{BrokerApi, KubeOrchestrator, ManagementClient, Orchestrator};
pub use config::Config;
pub use cycle::{CycleOutcome, Doctor};
pub use error::{Error, FetchFailure, Result};
pub use evaluator::{dedup, Evaluator};
pub use fetcher::{FetchPlan, SnapshotFetcher};
pub use remediation::{Outcome, RemediationController, RemediationRecord};
pub use reporter::{render, CycleError, Report, ReportSink, Reporter};
pub use rules::{Finding, Rule, RuleId, RuleRegistry, Severity, SubjectKind};
pub use snapshot::{Collected, Snapshot};
