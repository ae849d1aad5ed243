//! The fetch, evaluate, remediate, report cycle.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collectors::{BrokerApi, Orchestrator};
use crate::config::Config;
use crate::evaluator::{Evaluator, SeverityCounts};
use crate::fetcher::{FetchPlan, SnapshotFetcher};
use crate::remediation::{RemediationController, RemediationRecord};
use crate::reporter::{CycleError, Reporter};
use crate::rules::{Finding, RuleRegistry};
use crate::snapshot::Snapshot;

/// Result of one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed {
        findings: Vec<Finding>,
        remediations: Vec<RemediationRecord>,
    },
    /// No snapshot could be assembled; nothing was evaluated or remediated
    Aborted(CycleError),
}

impl CycleOutcome {
    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Completed { findings, .. } => findings,
            Self::Aborted(_) => &[],
        }
    }

    pub fn remediations(&self) -> &[RemediationRecord] {
        match self {
            Self::Completed { remediations, .. } => remediations,
            Self::Aborted(_) => &[],
        }
    }
}

/// Runs health cycles and keeps the state carried between them
pub struct Doctor {
    fetcher: SnapshotFetcher,
    evaluator: Evaluator,
    remediation: Option<Arc<RemediationController>>,
    reporter: Reporter,
    previous: Option<Arc<Snapshot>>,
    deadline: Duration,
}

impl Doctor {
    pub fn new(
        fetcher: SnapshotFetcher,
        evaluator: Evaluator,
        reporter: Reporter,
        deadline: Duration,
    ) -> Self {
        Self {
            fetcher,
            evaluator,
            remediation: None,
            reporter,
            previous: None,
            deadline,
        }
    }

    /// Wire a doctor from configuration. Remediation is attached only when
    /// `remediate` is set.
    pub fn from_config(
        config: &Config,
        broker: Arc<dyn BrokerApi>,
        orchestrator: Arc<dyn Orchestrator>,
        reporter: Reporter,
        remediate: bool,
    ) -> Self {
        let fetcher = SnapshotFetcher::new(
            broker,
            orchestrator.clone(),
            FetchPlan::from_config(config),
        );
        let evaluator = Evaluator::new(RuleRegistry::new(), config.rules.clone());
        let doctor = Self::new(
            fetcher,
            evaluator,
            reporter,
            Duration::from_secs(config.cycle.deadline_secs),
        );

        if remediate {
            doctor.with_remediation(Arc::new(RemediationController::new(
                orchestrator,
                &config.remediation,
                &config.orchestrator,
            )))
        } else {
            doctor
        }
    }

    #[must_use]
    pub fn with_remediation(mut self, controller: Arc<RemediationController>) -> Self {
        self.remediation = Some(controller);
        self
    }

    pub fn remediation(&self) -> Option<&Arc<RemediationController>> {
        self.remediation.as_ref()
    }

    /// Snapshot of the last completed cycle
    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_deref()
    }

    /// Run one cycle under the configured deadline and `cancel`
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        let started = Instant::now();
        let cycle = cancel.child_token();
        let timer = {
            let token = cycle.clone();
            let deadline = self.deadline;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                token.cancel();
            })
        };

        let outcome = self.run_phases(&cycle).await;
        timer.abort();

        match &outcome {
            CycleOutcome::Completed {
                findings,
                remediations,
            } => {
                let counts = SeverityCounts::of(findings);
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    critical = counts.critical,
                    warning = counts.warning,
                    info = counts.info,
                    remediations = remediations.len(),
                    "Cycle completed"
                );
            }
            CycleOutcome::Aborted(error) => {
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    retriable = error.retriable,
                    error = %error.message,
                    "Cycle aborted"
                );
            }
        }
        outcome
    }

    async fn run_phases(&mut self, cycle: &CancellationToken) -> CycleOutcome {
        let snapshot = match self.fetcher.fetch(cycle).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                let error = CycleError {
                    at: Utc::now(),
                    message: e.to_string(),
                    retriable: e.is_retriable(),
                };
                self.reporter.publish_error(&error);
                return CycleOutcome::Aborted(error);
            }
        };

        let findings = self.evaluator.evaluate(&snapshot, self.previous.as_deref());

        let remediations = match &self.remediation {
            Some(_) if cycle.is_cancelled() => {
                warn!("Cycle deadline reached before remediation, skipping it");
                Vec::new()
            }
            Some(controller) => controller.remediate(&findings, cycle).await,
            None => Vec::new(),
        };

        self.reporter.publish(&findings, &remediations);
        self.previous = Some(snapshot);

        CycleOutcome::Completed {
            findings,
            remediations,
        }
    }

    /// Run cycles every `interval` until `cancel` fires
    pub async fn run(&mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Starting health cycles");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle(&cancel).await;
                }
            }
        }
        info!("Health cycles stopped");
    }
}
