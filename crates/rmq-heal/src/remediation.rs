//! Rate-limited remediation of broker pods.
//!
//! Remediable findings are grouped by target and acted on through the
//! [`Orchestrator`]. Each target gets at most `max_actions_per_window` actions
//! per rolling window, and an action never runs concurrently with another one
//! for the same target. Every attempt, including skipped ones, is recorded in
//! a bounded, append-only history.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collectors::Orchestrator;
use crate::config::{OrchestratorConfig, RemediationConfig};
use crate::error::{Error, Result};
use crate::rules::{Finding, RemediationAction};

/// Outcome of one remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Succeeded,
    Failed,
    SkippedRateLimited,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SkippedRateLimited => "skipped-rate-limited",
        }
    }
}

/// Immutable record of one remediation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub action: RemediationAction,
    pub target: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub error_detail: Option<String>,
    /// Recent pod log lines captured before the action
    pub log_tail: Option<String>,
}

/// A pod that one or more findings asked to remediate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Target {
    action: RemediationAction,
    namespace: String,
    name: String,
}

impl Target {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

fn span(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100))
}

/// Whether an action may run now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    RateLimited,
    InFlight,
}

#[derive(Debug, Default)]
struct LimiterState {
    /// Start times of recent actions per target
    recent: HashMap<String, VecDeque<DateTime<Utc>>>,
    in_flight: HashSet<String>,
}

/// Per-target rolling-window limiter shared across cycles
#[derive(Debug)]
pub struct RateLimiter {
    max_actions: usize,
    window: ChronoDuration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(max_actions: usize, window: Duration) -> Self {
        Self {
            max_actions,
            window: span(window),
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Claim a slot for `target`. A granted slot counts against the window
    /// whatever the action's outcome, and must be released when it finishes.
    pub async fn try_acquire(&self, target: &str, now: DateTime<Utc>) -> Admission {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(target) {
            return Admission::InFlight;
        }

        let window = self.window;
        state.recent.retain(|_, times| {
            while times.front().is_some_and(|at| now - *at >= window) {
                times.pop_front();
            }
            !times.is_empty()
        });

        let recent = state.recent.entry(target.to_string()).or_default();
        if recent.len() >= self.max_actions {
            return Admission::RateLimited;
        }

        recent.push_back(now);
        state.in_flight.insert(target.to_string());
        Admission::Granted
    }

    pub async fn release(&self, target: &str) {
        self.state.lock().await.in_flight.remove(target);
    }

    /// Targets with at least one action inside the window
    pub async fn tracked_targets(&self) -> usize {
        self.state.lock().await.recent.len()
    }
}

/// Append-only record history with count and age retention
#[derive(Debug)]
pub struct RemediationHistory {
    records: VecDeque<RemediationRecord>,
    max_records: usize,
    max_age: ChronoDuration,
}

impl RemediationHistory {
    pub fn new(max_records: usize, max_age: Duration) -> Self {
        Self {
            records: VecDeque::new(),
            max_records,
            max_age: span(max_age),
        }
    }

    pub fn append(&mut self, record: RemediationRecord, now: DateTime<Utc>) {
        self.records.push_back(record);
        while self
            .records
            .front()
            .is_some_and(|r| now - r.started_at > self.max_age)
        {
            self.records.pop_front();
        }
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &RemediationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct RemediationController {
    orchestrator: Arc<dyn Orchestrator>,
    limiter: RateLimiter,
    history: Mutex<RemediationHistory>,
    default_namespace: String,
    call_timeout: Duration,
    log_tail_lines: i64,
    attach_logs: bool,
}

impl RemediationController {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        config: &RemediationConfig,
        orchestrator_config: &OrchestratorConfig,
    ) -> Self {
        Self {
            orchestrator,
            limiter: RateLimiter::new(
                config.max_actions_per_window,
                Duration::from_secs(config.window_secs),
            ),
            history: Mutex::new(RemediationHistory::new(
                config.history_max_records,
                Duration::from_secs(config.history_max_age_secs),
            )),
            default_namespace: orchestrator_config.namespace.clone(),
            call_timeout: orchestrator_config.request_timeout(),
            log_tail_lines: orchestrator_config.log_tail_lines,
            attach_logs: config.attach_logs,
        }
    }

    pub async fn remediate(
        &self,
        findings: &[Finding],
        cancel: &CancellationToken,
    ) -> Vec<RemediationRecord> {
        self.remediate_at(findings, Utc::now(), cancel).await
    }

    /// Act on every remediable finding as of `now`.
    ///
    /// Targets run concurrently, each under its own call timeouts. Returns
    /// one record per target, in the order the targets first appear.
    pub async fn remediate_at(
        &self,
        findings: &[Finding],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<RemediationRecord> {
        let targets = self.targets(findings);
        if targets.is_empty() {
            return Vec::new();
        }
        debug!(targets = targets.len(), "Remediating");

        let records = join_all(targets.iter().map(|target| self.execute(target, now, cancel))).await;

        let mut history = self.history.lock().await;
        for record in &records {
            history.append(record.clone(), now);
        }
        records
    }

    /// Snapshot of the retained history, oldest first
    pub async fn history(&self) -> Vec<RemediationRecord> {
        self.history.lock().await.records().cloned().collect()
    }

    fn targets(&self, findings: &[Finding]) -> Vec<Target> {
        let mut seen = HashSet::new();
        findings
            .iter()
            .filter(|f| f.remediable)
            .filter_map(|f| {
                let action = f.suggested_action?;
                let namespace = f
                    .context
                    .get("namespace")
                    .filter(|ns| !ns.is_empty())
                    .cloned()
                    .unwrap_or_else(|| self.default_namespace.clone());
                Some(Target {
                    action,
                    namespace,
                    name: f.subject_id.clone(),
                })
            })
            .filter(|target| seen.insert(target.clone()))
            .collect()
    }

    async fn execute(
        &self,
        target: &Target,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> RemediationRecord {
        let key = target.key();
        let mut record = RemediationRecord {
            action: target.action,
            target: target.name.clone(),
            namespace: target.namespace.clone(),
            started_at: now,
            outcome: Outcome::SkippedRateLimited,
            error_detail: None,
            log_tail: None,
        };

        match self.limiter.try_acquire(&key, now).await {
            Admission::Granted => {}
            Admission::RateLimited => {
                info!(target = %key, action = target.action.as_str(), "Remediation skipped, rate limit reached");
                record.error_detail = Some("rate limit reached for this target".to_string());
                return record;
            }
            Admission::InFlight => {
                info!(target = %key, action = target.action.as_str(), "Remediation skipped, already in progress");
                record.error_detail = Some("remediation already in progress".to_string());
                return record;
            }
        }

        let result = match target.action {
            RemediationAction::RestartPod => self.restart_pod(target, &mut record, cancel).await,
        };
        self.limiter.release(&key).await;

        match result {
            Ok(()) => {
                info!(target = %key, action = target.action.as_str(), "Remediation succeeded");
                record.outcome = Outcome::Succeeded;
            }
            Err(e) => {
                warn!(target = %key, action = target.action.as_str(), error = %e, "Remediation failed");
                record.outcome = Outcome::Failed;
                record.error_detail = Some(e.to_string());
            }
        }
        record
    }

    async fn restart_pod(
        &self,
        target: &Target,
        record: &mut RemediationRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Logs are captured first; the old container's output is gone after the delete.
        if self.attach_logs {
            let logs = self.orchestrator.get_pod_logs(
                &target.namespace,
                &target.name,
                Some(self.log_tail_lines),
            );
            match self.bounded("log fetch", logs, cancel).await {
                Ok(tail) => record.log_tail = Some(tail),
                Err(e) => {
                    warn!(pod = %target.name, error = %e, "Could not fetch pod logs before restart");
                }
            }
        }

        let delete = self.orchestrator.delete_pod(&target.namespace, &target.name);
        self.bounded("pod delete", delete, cancel).await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled(operation.to_string())),
            result = tokio::time::timeout(self.call_timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: operation.to_string(),
                    secs: self.call_timeout.as_secs(),
                }),
            },
        }
    }
}
