//! Report rendering and output sinks.
//!
//! [`render`] turns one cycle's findings and remediation records into a
//! [`Report`] grouped by severity, then by subject. It is pure; the sinks
//! decide how a report is presented.
//!
//! # Sinks
//!
//! - [`ConsoleSink`] prints colored text or JSON lines to stdout
//! - [`LogSink`] emits one `tracing` event per finding and record
//! - [`MetricsSink`] counts findings and remediations for Prometheus
//!
//! The [`Reporter`] dispatches every report to all attached sinks.

pub mod console;
pub mod log;
pub mod metrics;

pub use console::{render_inventory, ConsoleSink, OutputFormat};
pub use log::LogSink;
pub use metrics::MetricsSink;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::evaluator::SeverityCounts;
use crate::remediation::{Outcome, RemediationRecord};
use crate::rules::{Finding, Severity, SubjectKind};

/// Findings about one subject, in evaluation order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectGroup {
    pub subject_kind: SubjectKind,
    pub subject_id: String,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityGroup {
    pub severity: Severity,
    pub subjects: Vec<SubjectGroup>,
}

/// Presentation-ready view of one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub counts: SeverityCounts,
    /// Most severe first; empty severities are omitted
    pub groups: Vec<SeverityGroup>,
    pub remediations: Vec<RemediationRecord>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.remediations.is_empty()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.groups
            .iter()
            .flat_map(|g| g.subjects.iter())
            .flat_map(|s| s.findings.iter())
    }

    pub fn remediations_with(&self, outcome: Outcome) -> usize {
        self.remediations
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }
}

/// A cycle that produced no report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleError {
    pub at: DateTime<Utc>,
    pub message: String,
    /// Whether the next scheduled cycle may succeed
    pub retriable: bool,
}

pub fn render(findings: &[Finding], records: &[RemediationRecord]) -> Report {
    let groups = [Severity::Critical, Severity::Warning, Severity::Info]
        .into_iter()
        .filter_map(|severity| {
            let mut subjects: Vec<SubjectGroup> = Vec::new();
            for finding in findings.iter().filter(|f| f.severity == severity) {
                let existing = subjects.iter_mut().find(|s| {
                    s.subject_kind == finding.subject_kind && s.subject_id == finding.subject_id
                });
                match existing {
                    Some(group) => group.findings.push(finding.clone()),
                    None => subjects.push(SubjectGroup {
                        subject_kind: finding.subject_kind,
                        subject_id: finding.subject_id.clone(),
                        findings: vec![finding.clone()],
                    }),
                }
            }
            (!subjects.is_empty()).then_some(SeverityGroup { severity, subjects })
        })
        .collect();

    Report {
        counts: SeverityCounts::of(findings),
        groups,
        remediations: records.to_vec(),
    }
}

/// Destination for rendered reports
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn emit(&self, report: &Report);

    fn emit_cycle_error(&self, error: &CycleError);
}

/// Dispatches reports to every attached sink
#[derive(Clone, Default)]
pub struct Reporter {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl Reporter {
    pub fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn publish(&self, findings: &[Finding], records: &[RemediationRecord]) -> Report {
        let report = render(findings, records);
        for sink in &self.sinks {
            debug!(sink = sink.name(), "Emitting report");
            sink.emit(&report);
        }
        report
    }

    pub fn publish_error(&self, error: &CycleError) {
        for sink in &self.sinks {
            sink.emit_cycle_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleId;
    use std::sync::Mutex;

    fn finding(rule: RuleId, kind: SubjectKind, subject: &str, severity: Severity) -> Finding {
        Finding::new(rule, kind, subject, format!("{subject} needs attention")).with_severity(severity)
    }

    #[test]
    fn test_groups_by_severity_then_subject() {
        let findings = vec![
            finding(RuleId::UnroutableMessages, SubjectKind::Queue, "orders", Severity::Info),
            finding(RuleId::FileDescriptorsNearLimit, SubjectKind::Node, "rabbit@a", Severity::Critical),
            finding(RuleId::UnroutableMessages, SubjectKind::Queue, "billing", Severity::Warning),
            finding(RuleId::LowDiskWatermarkPredicted, SubjectKind::Node, "rabbit@a", Severity::Critical),
        ];

        let report = render(&findings, &[]);
        assert_eq!(report.groups.len(), 3);
        assert_eq!(report.groups[0].severity, Severity::Critical);
        assert_eq!(report.groups[0].subjects.len(), 1);
        assert_eq!(report.groups[0].subjects[0].findings.len(), 2);
        assert_eq!(report.groups[1].severity, Severity::Warning);
        assert_eq!(report.groups[2].subjects[0].subject_id, "orders");
        assert_eq!(report.counts.critical, 2);
        assert_eq!(report.findings().count(), 4);
    }

    #[test]
    fn test_empty_report() {
        let report = render(&[], &[]);
        assert!(report.is_empty());
        assert_eq!(report.counts, SeverityCounts::default());
    }

    #[derive(Default)]
    struct CountingSink {
        reports: Mutex<usize>,
        errors: Mutex<Vec<String>>,
    }

    impl ReportSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn emit(&self, _report: &Report) {
            *self.reports.lock().unwrap() += 1;
        }

        fn emit_cycle_error(&self, error: &CycleError) {
            self.errors.lock().unwrap().push(error.message.clone());
        }
    }

    #[test]
    fn test_reporter_dispatches_to_every_sink() {
        let first = Arc::new(CountingSink::default());
        let second = Arc::new(CountingSink::default());
        let reporter = Reporter::new(vec![
            first.clone() as Arc<dyn ReportSink>,
            second.clone() as Arc<dyn ReportSink>,
        ]);

        reporter.publish(&[], &[]);
        reporter.publish_error(&CycleError {
            at: Utc::now(),
            message: "snapshot unavailable".into(),
            retriable: true,
        });

        assert_eq!(*first.reports.lock().unwrap(), 1);
        assert_eq!(*second.reports.lock().unwrap(), 1);
        assert_eq!(second.errors.lock().unwrap().as_slice(), ["snapshot unavailable"]);
    }
}
