//! Prometheus counters for findings, remediations and failed cycles.

use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use super::{CycleError, Report, ReportSink};
use crate::error::Result;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FindingLabels {
    pub rule: String,
    pub severity: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RemediationLabels {
    pub action: String,
    pub outcome: String,
}

/// Counts reports into a private registry
#[derive(Debug)]
pub struct MetricsSink {
    registry: Registry,
    findings: Family<FindingLabels, Counter>,
    remediations: Family<RemediationLabels, Counter>,
    cycle_errors: Counter,
    cycles: Counter,
}

impl MetricsSink {
    pub fn new() -> Self {
        let findings = Family::<FindingLabels, Counter>::default();
        let remediations = Family::<RemediationLabels, Counter>::default();
        let cycle_errors = Counter::default();
        let cycles = Counter::default();

        let mut registry = Registry::default();
        registry.register(
            "rmq_heal_findings",
            "Findings reported, by rule and severity",
            findings.clone(),
        );
        registry.register(
            "rmq_heal_remediations",
            "Remediation attempts, by action and outcome",
            remediations.clone(),
        );
        registry.register(
            "rmq_heal_cycle_errors",
            "Cycles aborted without a report",
            cycle_errors.clone(),
        );
        registry.register(
            "rmq_heal_cycles",
            "Cycles that produced a report",
            cycles.clone(),
        );

        Self {
            registry,
            findings,
            remediations,
            cycle_errors,
            cycles,
        }
    }

    /// OpenMetrics text exposition of every counter
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    #[cfg(test)]
    fn finding_count(&self, rule: &str, severity: &str) -> u64 {
        self.findings
            .get_or_create(&FindingLabels {
                rule: rule.to_string(),
                severity: severity.to_string(),
            })
            .get()
    }

    #[cfg(test)]
    fn remediation_count(&self, action: &str, outcome: &str) -> u64 {
        self.remediations
            .get_or_create(&RemediationLabels {
                action: action.to_string(),
                outcome: outcome.to_string(),
            })
            .get()
    }

    pub fn cycle_error_count(&self) -> u64 {
        self.cycle_errors.get()
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for MetricsSink {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn emit(&self, report: &Report) {
        self.cycles.inc();
        for finding in report.findings() {
            self.findings
                .get_or_create(&FindingLabels {
                    rule: finding.rule_id.as_str().to_string(),
                    severity: finding.severity.as_str().to_string(),
                })
                .inc();
        }
        for record in &report.remediations {
            self.remediations
                .get_or_create(&RemediationLabels {
                    action: record.action.as_str().to_string(),
                    outcome: record.outcome.as_str().to_string(),
                })
                .inc();
        }
    }

    fn emit_cycle_error(&self, _error: &CycleError) {
        self.cycle_errors.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::{Outcome, RemediationRecord};
    use crate::reporter::render;
    use crate::rules::{Finding, RemediationAction, RuleId, Severity, SubjectKind};
    use chrono::Utc;

    #[test]
    fn test_counts_findings_and_remediations() {
        let sink = MetricsSink::new();
        let findings = vec![
            Finding::new(RuleId::RabbitMqDown, SubjectKind::Pod, "rm-quickstart-1", "down")
                .with_severity(Severity::Critical),
            Finding::new(RuleId::RabbitMqDown, SubjectKind::Pod, "rm-quickstart-2", "down")
                .with_severity(Severity::Critical),
        ];
        let records = vec![RemediationRecord {
            action: RemediationAction::RestartPod,
            target: "rm-quickstart-1".into(),
            namespace: "demo".into(),
            started_at: Utc::now(),
            outcome: Outcome::Succeeded,
            error_detail: None,
            log_tail: None,
        }];

        sink.emit(&render(&findings, &records));
        sink.emit(&render(&findings, &[]));

        assert_eq!(sink.finding_count("rabbitmq-down", "critical"), 4);
        assert_eq!(sink.remediation_count("restart-pod", "succeeded"), 1);

        let text = sink.encode().unwrap();
        assert!(text.contains("rmq_heal_findings_total{rule=\"rabbitmq-down\",severity=\"critical\"} 4"));
        assert!(text.contains("rmq_heal_cycles_total 2"));
    }

    #[test]
    fn test_exposes_only_observed_series() {
        let sink = MetricsSink::new();
        let findings = vec![Finding::new(
            RuleId::FileDescriptorsNearLimit,
            SubjectKind::Node,
            "rabbit@node1",
            "fd",
        )
        .with_severity(Severity::Critical)];
        sink.emit(&render(&findings, &[]));

        let text = sink.encode().unwrap();
        assert!(text.contains("severity=\"critical\"} 1"));
        assert!(!text.contains("severity=\"warning\""));
        assert!(!text.contains("rmq_heal_remediations_total{"));
    }

    #[test]
    fn test_counts_cycle_errors() {
        let sink = MetricsSink::new();
        sink.emit_cycle_error(&CycleError {
            at: Utc::now(),
            message: "all sub-fetches failed".into(),
            retriable: true,
        });
        assert_eq!(sink.cycle_error_count(), 1);
        assert!(sink.encode().unwrap().contains("rmq_heal_cycle_errors_total 1"));
    }
}
