//! Core types for the rule system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::RulesConfig;
use crate::snapshot::Snapshot;

/// Unique identifier for each rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    UnroutableMessages,
    HighConnectionChurn,
    LowDiskWatermarkPredicted,
    FileDescriptorsNearLimit,
    TcpSocketsNearLimit,
    #[serde(rename = "rabbitmq-down")]
    RabbitMqDown,
    /// Findings about the pipeline itself (failed fetches, faulted rules)
    Collector,
}

impl RuleId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnroutableMessages => "unroutable-messages",
            Self::HighConnectionChurn => "high-connection-churn",
            Self::LowDiskWatermarkPredicted => "low-disk-watermark-predicted",
            Self::FileDescriptorsNearLimit => "file-descriptors-near-limit",
            Self::TcpSocketsNearLimit => "tcp-sockets-near-limit",
            Self::RabbitMqDown => "rabbitmq-down",
            Self::Collector => "collector",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::UnroutableMessages => "Unroutable Messages",
            Self::HighConnectionChurn => "High Connection Churn",
            Self::LowDiskWatermarkPredicted => "Low Disk Watermark Predicted",
            Self::FileDescriptorsNearLimit => "File Descriptors Near Limit",
            Self::TcpSocketsNearLimit => "TCP Sockets Near Limit",
            Self::RabbitMqDown => "RabbitMQ Down",
            Self::Collector => "Collector",
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// What a finding is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Queue,
    Exchange,
    Node,
    Pod,
    Cluster,
    Collector,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Exchange => "exchange",
            Self::Node => "node",
            Self::Pod => "pod",
            Self::Cluster => "cluster",
            Self::Collector => "collector",
        }
    }
}

/// Corrective actions the remediation controller knows how to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationAction {
    RestartPod,
}

impl RemediationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RestartPod => "restart-pod",
        }
    }
}

/// One health observation produced by a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: RuleId,
    pub severity: Severity,
    pub subject_kind: SubjectKind,
    pub subject_id: String,
    pub message: String,
    pub remediable: bool,
    pub suggested_action: Option<RemediationAction>,
    pub context: BTreeMap<String, String>,
    /// Fetch time of the snapshot that produced this finding
    pub detected_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(
        rule_id: RuleId,
        subject_kind: SubjectKind,
        subject_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id,
            severity: Severity::Warning,
            subject_kind,
            subject_id: subject_id.into(),
            message: message.into(),
            remediable: false,
            suggested_action: None,
            context: BTreeMap::new(),
            detected_at: DateTime::<Utc>::default(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = at;
        self
    }

    /// Mark the finding as fixable by an automated action
    #[must_use]
    pub fn remediable(mut self, action: RemediationAction) -> Self {
        self.remediable = true;
        self.suggested_action = Some(action);
        self
    }

    /// Identity used for deduplication
    pub fn key(&self) -> (RuleId, SubjectKind, &str) {
        (self.rule_id, self.subject_kind, self.subject_id.as_str())
    }
}

/// Context available to rules beyond the current snapshot
pub struct RuleContext<'a> {
    pub config: &'a RulesConfig,
    /// The previous cycle's snapshot, absent on the first cycle
    pub previous: Option<&'a Snapshot>,
}

/// A health rule: a pure function of the snapshot
pub trait Rule: Send + Sync {
    /// Unique identifier for this rule
    fn id(&self) -> RuleId;

    /// Human-readable name
    fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Evaluate the snapshot. Must not fail: a rule whose inputs are
    /// unavailable returns no findings.
    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_remediable_builder() {
        let finding = Finding::new(RuleId::RabbitMqDown, SubjectKind::Pod, "rabbit-0", "down")
            .with_severity(Severity::Critical)
            .remediable(RemediationAction::RestartPod);
        assert!(finding.remediable);
        assert_eq!(finding.suggested_action, Some(RemediationAction::RestartPod));
        assert_eq!(finding.key(), (RuleId::RabbitMqDown, SubjectKind::Pod, "rabbit-0"));
    }

    #[test]
    fn test_rule_id_serializes_kebab_case() {
        let json = serde_json::to_string(&RuleId::TcpSocketsNearLimit).unwrap();
        assert_eq!(json, "\"tcp-sockets-near-limit\"");
        assert_eq!(RuleId::RabbitMqDown.to_string(), "rabbitmq-down");
    }
}
