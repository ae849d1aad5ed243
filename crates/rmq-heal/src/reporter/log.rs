//! Structured log sink.

use tracing::{error, info, warn};

use super::{CycleError, Report, ReportSink};
use crate::remediation::Outcome;
use crate::rules::Severity;

/// Emits every finding and remediation record as a `tracing` event
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl ReportSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn emit(&self, report: &Report) {
        for finding in report.findings() {
            let rule = finding.rule_id.as_str();
            let kind = finding.subject_kind.as_str();
            let subject = finding.subject_id.as_str();
            match finding.severity {
                Severity::Critical => {
                    error!(rule, kind, subject, remediable = finding.remediable, "{}", finding.message);
                }
                Severity::Warning => {
                    warn!(rule, kind, subject, remediable = finding.remediable, "{}", finding.message);
                }
                Severity::Info => {
                    info!(rule, kind, subject, "{}", finding.message);
                }
            }
        }

        for record in &report.remediations {
            let action = record.action.as_str();
            let outcome = record.outcome.as_str();
            let detail = record.error_detail.as_deref().unwrap_or("");
            if record.outcome == Outcome::Failed {
                warn!(action, target = %record.target, namespace = %record.namespace, outcome, detail, "Remediation record");
            } else {
                info!(action, target = %record.target, namespace = %record.namespace, outcome, detail, "Remediation record");
            }
        }

        info!(
            critical = report.counts.critical,
            warning = report.counts.warning,
            info = report.counts.info,
            remediations = report.remediations.len(),
            "Cycle report"
        );
    }

    fn emit_cycle_error(&self, error: &CycleError) {
        error!(retriable = error.retriable, at = %error.at, "Cycle failed: {}", error.message);
    }
}
