//! R4: File Descriptors Near Limit
//!
//! Per-node `fd_used / fd_total` against the configured watermarks. A node
//! reporting `fd_total == 0` has no usable limit; that is a collection gap,
//! reported as a collector warning rather than a ratio.

use super::types::{Finding, Rule, RuleContext, RuleId, Severity, SubjectKind};
use crate::snapshot::Snapshot;

pub struct Handler;

impl Handler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for Handler {
    fn id(&self) -> RuleId {
        RuleId::FileDescriptorsNearLimit
    }

    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let Some(nodes) = snapshot.nodes.available() else {
            return Vec::new();
        };
        let config = &ctx.config.file_descriptors;

        nodes
            .iter()
            .filter_map(|node| {
                let Some(ratio) = node.fd_ratio() else {
                    return Some(
                        Finding::new(
                            RuleId::FileDescriptorsNearLimit,
                            SubjectKind::Collector,
                            &node.name,
                            format!("Node {} reported no file descriptor limit", node.name),
                        )
                        .with_context("fd_used", node.fd_used.to_string())
                        .at(snapshot.fetched_at),
                    );
                };

                let severity = if ratio > config.critical_ratio {
                    Severity::Critical
                } else if ratio > config.warning_ratio {
                    Severity::Warning
                } else {
                    return None;
                };

                Some(
                    Finding::new(
                        RuleId::FileDescriptorsNearLimit,
                        SubjectKind::Node,
                        &node.name,
                        format!(
                            "Node {} uses {} of {} file descriptors ({:.2}%)",
                            node.name,
                            node.fd_used,
                            node.fd_total,
                            ratio * 100.0
                        ),
                    )
                    .with_severity(severity)
                    .with_context("fd_used", node.fd_used.to_string())
                    .with_context("fd_total", node.fd_total.to_string())
                    .with_context("ratio", format!("{ratio:.3}"))
                    .at(snapshot.fetched_at),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::snapshot::NodeInfo;
    use chrono::Utc;

    fn node(name: &str, fd_used: u64, fd_total: u64) -> NodeInfo {
        NodeInfo {
            name: name.into(),
            fd_used,
            fd_total,
            ..Default::default()
        }
    }

    fn evaluate(nodes: Vec<NodeInfo>) -> Vec<Finding> {
        let config = RulesConfig::default();
        let ctx = RuleContext {
            config: &config,
            previous: None,
        };
        Handler::new().evaluate(&Snapshot::new(Utc::now()).with_nodes(nodes), &ctx)
    }

    #[test]
    fn test_above_high_watermark_is_critical() {
        let findings = evaluate(vec![node("rabbit@node1", 950, 1000)]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].subject_id, "rabbit@node1");
        assert_eq!(findings[0].subject_kind, SubjectKind::Node);
    }

    #[test]
    fn test_between_watermarks_is_warning() {
        let findings = evaluate(vec![node("rabbit@node2", 850, 1000)]);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_below_watermarks_is_silent() {
        assert!(evaluate(vec![node("rabbit@node3", 100, 1000)]).is_empty());
    }

    #[test]
    fn test_zero_total_is_collector_warning() {
        let findings = evaluate(vec![node("rabbit@node4", 100, 0)]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].subject_kind, SubjectKind::Collector);
    }
}
