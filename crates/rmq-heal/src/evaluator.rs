//! Evaluator: runs the rule catalogue against a snapshot.
//!
//! Findings are concatenated in catalogue order after the collector
//! diagnostics for failed sub-fetches, then deduplicated. A rule that panics
//! is contained here and reported as a collector warning; the remaining rules
//! still run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

use crate::config::RulesConfig;
use crate::rules::{Finding, RuleContext, RuleId, RuleRegistry, Severity, SubjectKind};
use crate::snapshot::Snapshot;

pub struct Evaluator {
    registry: RuleRegistry,
    config: RulesConfig,
}

impl Evaluator {
    pub fn new(registry: RuleRegistry, config: RulesConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Evaluate every rule. Deterministic for a given (snapshot, previous) pair.
    pub fn evaluate(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> Vec<Finding> {
        let ctx = RuleContext {
            config: &self.config,
            previous,
        };

        let mut findings = collector_findings(snapshot);
        for rule in self.registry.rules() {
            match catch_unwind(AssertUnwindSafe(|| rule.evaluate(snapshot, &ctx))) {
                Ok(rule_findings) => {
                    debug!(rule = rule.id().as_str(), count = rule_findings.len(), "Rule evaluated");
                    findings.extend(rule_findings);
                }
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    error!(rule = rule.id().as_str(), error = %detail, "Rule faulted");
                    findings.push(
                        Finding::new(
                            RuleId::Collector,
                            SubjectKind::Collector,
                            rule.id().as_str(),
                            format!("Rule {} faulted: {detail}", rule.name()),
                        )
                        .with_context("rule", rule.id().as_str())
                        .at(snapshot.fetched_at),
                    );
                }
            }
        }

        dedup(findings)
    }
}

/// One warning per failed sub-fetch
fn collector_findings(snapshot: &Snapshot) -> Vec<Finding> {
    snapshot
        .failures
        .iter()
        .map(|failure| {
            Finding::new(
                RuleId::Collector,
                SubjectKind::Collector,
                &failure.resource,
                format!("Could not collect {}: {}", failure.resource, failure.detail),
            )
            .with_context("resource", failure.resource.clone())
            .at(snapshot.fetched_at)
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Collapse findings sharing (rule, subject kind, subject id).
///
/// The survivor is the most severe one, the most recent on a tie, and it
/// keeps the position of the first occurrence so output order stays stable.
pub fn dedup(findings: Vec<Finding>) -> Vec<Finding> {
    let mut positions: HashMap<(RuleId, SubjectKind, String), usize> = HashMap::new();
    let mut kept: Vec<Finding> = Vec::with_capacity(findings.len());

    for finding in findings {
        let key = (
            finding.rule_id,
            finding.subject_kind,
            finding.subject_id.clone(),
        );
        if let Some(&index) = positions.get(&key) {
            let existing = &mut kept[index];
            if supersedes(&finding, existing) {
                *existing = finding;
            }
        } else {
            positions.insert(key, kept.len());
            kept.push(finding);
        }
    }

    kept
}

fn supersedes(candidate: &Finding, existing: &Finding) -> bool {
    match candidate.severity.cmp(&existing.severity) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.detected_at >= existing.detected_at,
    }
}

/// Count of findings per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SeverityCounts {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub fn of(findings: &[Finding]) -> Self {
        findings
            .iter()
            .fold(Self::default(), |mut counts, finding| {
                match finding.severity {
                    Severity::Info => counts.info += 1,
                    Severity::Warning => counts.warning += 1,
                    Severity::Critical => counts.critical += 1,
                }
                counts
            })
    }

    pub fn highest(&self) -> Option<Severity> {
        if self.critical > 0 {
            Some(Severity::Critical)
        } else if self.warning > 0 {
            Some(Severity::Warning)
        } else if self.info > 0 {
            Some(Severity::Info)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchFailure;
    use crate::rules::{r4_file_descriptors, r6_broker_down, Rule};
    use crate::snapshot::{NodeInfo, PodInfo};
    use chrono::{Duration, TimeZone, Utc};

    struct FaultyRule;

    impl Rule for FaultyRule {
        fn id(&self) -> RuleId {
            RuleId::TcpSocketsNearLimit
        }

        fn evaluate(&self, _snapshot: &Snapshot, _ctx: &RuleContext<'_>) -> Vec<Finding> {
            panic!("socket table corrupted");
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
            .with_nodes(vec![NodeInfo {
                name: "rabbit@node1".into(),
                fd_used: 950,
                fd_total: 1000,
                disk_free_bytes: 50 * 1024 * 1024 * 1024,
                disk_free_limit_bytes: 1024 * 1024 * 1024,
                ..Default::default()
            }])
            .with_pods(vec![
                PodInfo {
                    name: "rm-quickstart-0".into(),
                    phase: "Running".into(),
                    ..Default::default()
                },
                PodInfo {
                    name: "rm-quickstart-1".into(),
                    phase: "Failed".into(),
                    ..Default::default()
                },
                PodInfo {
                    name: "rm-quickstart-2".into(),
                    phase: "Failed".into(),
                    ..Default::default()
                },
            ])
    }

    fn finding(subject: &str, severity: Severity, offset_secs: i64) -> Finding {
        Finding::new(RuleId::FileDescriptorsNearLimit, SubjectKind::Node, subject, "fd")
            .with_severity(severity)
            .at(Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_faulty_rule_is_contained() {
        let registry = RuleRegistry::with_rules(vec![
            Box::new(r4_file_descriptors::Handler::new()),
            Box::new(FaultyRule),
            Box::new(r6_broker_down::Handler::new()),
        ]);
        let evaluator = Evaluator::new(registry, RulesConfig::default());

        let findings = evaluator.evaluate(&snapshot(), None);

        let fd = &findings[0];
        assert_eq!(fd.rule_id, RuleId::FileDescriptorsNearLimit);
        assert_eq!(fd.severity, Severity::Critical);

        let fault = &findings[1];
        assert_eq!(fault.rule_id, RuleId::Collector);
        assert_eq!(fault.severity, Severity::Warning);
        assert_eq!(fault.subject_id, "tcp-sockets-near-limit");
        assert!(fault.message.contains("socket table corrupted"));

        let down: Vec<_> = findings
            .iter()
            .filter(|f| f.rule_id == RuleId::RabbitMqDown)
            .collect();
        assert_eq!(down.len(), 2);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let evaluator = Evaluator::new(RuleRegistry::new(), RulesConfig::default());
        let current = snapshot();
        let mut previous = snapshot();
        previous.fetched_at -= Duration::seconds(60);

        let first = evaluator.evaluate(&current, Some(&previous));
        let second = evaluator.evaluate(&current, Some(&previous));
        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_fetches_become_collector_warnings() {
        let snapshot = Snapshot::new(Utc::now())
            .with_failure(FetchFailure::new("connections", "connection refused"));
        let evaluator = Evaluator::new(RuleRegistry::new(), RulesConfig::default());

        let findings = evaluator.evaluate(&snapshot, None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject_kind, SubjectKind::Collector);
        assert_eq!(findings[0].subject_id, "connections");
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_dedup_keeps_most_severe_at_first_position() {
        let findings = vec![
            finding("rabbit@a", Severity::Warning, 0),
            finding("rabbit@b", Severity::Info, 0),
            finding("rabbit@a", Severity::Critical, 0),
            finding("rabbit@a", Severity::Info, 5),
        ];

        let deduped = dedup(findings);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].subject_id, "rabbit@a");
        assert_eq!(deduped[0].severity, Severity::Critical);
        assert_eq!(deduped[1].subject_id, "rabbit@b");
    }

    #[test]
    fn test_dedup_prefers_most_recent_on_tie() {
        let deduped = dedup(vec![
            finding("rabbit@a", Severity::Warning, 10),
            finding("rabbit@a", Severity::Warning, 20),
            finding("rabbit@a", Severity::Warning, 15),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(
            deduped[0].detected_at,
            Utc.timestamp_opt(1_700_000_020, 0).unwrap()
        );
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let once = dedup(vec![
            finding("rabbit@a", Severity::Warning, 0),
            finding("rabbit@b", Severity::Critical, 1),
            finding("rabbit@a", Severity::Critical, 2),
            finding("rabbit@c", Severity::Info, 3),
        ]);
        let twice = dedup(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_severity_counts() {
        let counts = SeverityCounts::of(&[
            finding("a", Severity::Info, 0),
            finding("b", Severity::Critical, 0),
            finding("c", Severity::Critical, 0),
        ]);
        assert_eq!(counts.critical, 2);
        assert_eq!(counts.info, 1);
        assert_eq!(counts.highest(), Some(Severity::Critical));
        assert_eq!(SeverityCounts::default().highest(), None);
    }
}
