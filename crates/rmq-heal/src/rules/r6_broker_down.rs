//! R6: RabbitMQ Down
//!
//! Counts broker pods (selected by label) in the `Running` phase. When fewer
//! than the expected replica count are running, every non-running pod gets a
//! remediable critical finding suggesting a restart. Replicas missing
//! altogether cannot be restarted and are reported once for the cluster.

use super::types::{Finding, RemediationAction, Rule, RuleContext, RuleId, Severity, SubjectKind};
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
        RuleId::RabbitMqDown
    }

    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let Some(pods) = snapshot.pods.available() else {
            return Vec::new();
        };
        let expected = ctx.config.broker_down.expected_replicas;
        let running = pods.iter().filter(|p| p.is_running()).count();
        if running >= expected {
            return Vec::new();
        }

        let mut findings: Vec<Finding> = pods
            .iter()
            .filter(|p| !p.is_running())
            .map(|pod| {
                Finding::new(
                    RuleId::RabbitMqDown,
                    SubjectKind::Pod,
                    &pod.name,
                    format!(
                        "Broker pod {} is {} ({} of {} replicas running, {} restarts)",
                        pod.name, pod.phase, running, expected, pod.restart_count
                    ),
                )
                .with_severity(Severity::Critical)
                .with_context("namespace", pod.namespace.clone())
                .with_context("phase", pod.phase.clone())
                .with_context("restart_count", pod.restart_count.to_string())
                .remediable(RemediationAction::RestartPod)
                .at(snapshot.fetched_at)
            })
            .collect();

        if pods.len() < expected {
            findings.push(
                Finding::new(
                    RuleId::RabbitMqDown,
                    SubjectKind::Cluster,
                    "replicas",
                    format!(
                        "Only {} of {} broker pods exist ({} running)",
                        pods.len(),
                        expected,
                        running
                    ),
                )
                .with_severity(Severity::Critical)
                .with_context("missing", (expected - pods.len()).to_string())
                .at(snapshot.fetched_at),
            );
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::snapshot::PodInfo;
    use chrono::Utc;

    fn pod(name: &str, phase: &str) -> PodInfo {
        PodInfo {
            name: name.into(),
            namespace: "demo".into(),
            phase: phase.into(),
            ..Default::default()
        }
    }

    fn evaluate(pods: Vec<PodInfo>) -> Vec<Finding> {
        let config = RulesConfig::default();
        let ctx = RuleContext {
            config: &config,
            previous: None,
        };
        Handler::new().evaluate(&Snapshot::new(Utc::now()).with_pods(pods), &ctx)
    }

    #[test]
    fn test_one_of_three_running() {
        let findings = evaluate(vec![
            pod("rm-quickstart-0", "Running"),
            pod("rm-quickstart-1", "Pending"),
            pod("rm-quickstart-2", "Failed"),
        ]);
        assert_eq!(findings.len(), 2);
        for finding in &findings {
            assert_eq!(finding.severity, Severity::Critical);
            assert!(finding.remediable);
            assert_eq!(finding.suggested_action, Some(RemediationAction::RestartPod));
        }
        assert_eq!(findings[0].subject_id, "rm-quickstart-1");
        assert_eq!(findings[1].subject_id, "rm-quickstart-2");
    }

    #[test]
    fn test_all_running_is_silent() {
        let findings = evaluate(vec![
            pod("rm-quickstart-0", "Running"),
            pod("rm-quickstart-1", "Running"),
            pod("rm-quickstart-2", "Running"),
        ]);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_missing_replicas_are_not_remediable() {
        let findings = evaluate(vec![pod("rm-quickstart-0", "Running")]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject_kind, SubjectKind::Cluster);
        assert!(!findings[0].remediable);
        assert_eq!(findings[0].context["missing"], "2");
    }
}
