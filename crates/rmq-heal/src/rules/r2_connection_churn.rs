//! R2: High Connection Churn
//!
//! Compares the current connection listing with the previous cycle's. The
//! observed window is the time since the previous snapshot, capped at
//! `young_connection_secs`; a connection opened inside that window counts as
//! new. When the opening rate over the window exceeds
//! `max_new_connections_per_min` the cluster is flagged.
//!
//! Stateful across cycles: on the first snapshot there is no history and the
//! rule stays silent.

use chrono::Duration;
use std::collections::HashSet;

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
        RuleId::HighConnectionChurn
    }

    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let Some(previous) = ctx.previous else {
            return Vec::new();
        };
        let (Some(current), Some(before)) = (
            snapshot.connections.available(),
            previous.connections.available(),
        ) else {
            return Vec::new();
        };

        let interval = snapshot.fetched_at - previous.fetched_at;
        if interval <= Duration::zero() {
            return Vec::new();
        }

        let config = &ctx.config.churn;
        let young_age = Duration::seconds(config.young_connection_secs as i64);
        let window = interval.min(young_age);
        if window <= Duration::zero() {
            return Vec::new();
        }

        // Connections older than the window were already visible last cycle
        let opened = current
            .iter()
            .filter(|c| snapshot.fetched_at - c.connected_at < window)
            .count();
        let still_open: HashSet<&str> = current.iter().map(|c| c.name.as_str()).collect();
        let closed = before
            .iter()
            .filter(|c| !still_open.contains(c.name.as_str()))
            .count();
        let delta = current.len() as i64 - before.len() as i64;

        if opened == 0 {
            return Vec::new();
        }
        let window_mins = window.num_milliseconds().max(1) as f64 / 60_000.0;
        let rate_per_min = opened as f64 / window_mins;

        if rate_per_min <= config.max_new_connections_per_min {
            return Vec::new();
        }

        vec![Finding::new(
            RuleId::HighConnectionChurn,
            SubjectKind::Cluster,
            "connections",
            format!(
                "{opened} connections opened in the last {}s ({rate_per_min:.1}/min, threshold {:.1}/min); {closed} closed since previous check",
                window.num_seconds(),
                config.max_new_connections_per_min
            ),
        )
        .with_severity(Severity::Warning)
        .with_context("opened", opened.to_string())
        .with_context("closed", closed.to_string())
        .with_context("delta", delta.to_string())
        .with_context("total", current.len().to_string())
        .with_context("interval_secs", interval.num_seconds().to_string())
        .at(snapshot.fetched_at)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::snapshot::{ConnectionInfo, ConnectionState};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn connection(name: &str, connected_at: DateTime<Utc>) -> ConnectionInfo {
        ConnectionInfo {
            name: name.into(),
            host: "10.0.0.1".into(),
            user: "app".into(),
            state: ConnectionState::Running,
            channel_count: 1,
            connected_at,
            client_properties: Default::default(),
        }
    }

    fn evaluate(snapshot: &Snapshot, previous: Option<&Snapshot>) -> Vec<Finding> {
        let config = RulesConfig::default();
        let ctx = RuleContext {
            config: &config,
            previous,
        };
        Handler::new().evaluate(snapshot, &ctx)
    }

    #[test]
    fn test_silent_without_history() {
        let connections = (0..100)
            .map(|i| connection(&format!("c{i}"), at(55)))
            .collect();
        let snapshot = Snapshot::new(at(60)).with_connections(connections);
        assert!(evaluate(&snapshot, None).is_empty());
    }

    #[test]
    fn test_detects_burst_of_new_connections() {
        let previous = Snapshot::new(at(0)).with_connections(vec![connection("old", at(-600))]);
        // 40 connections opened within the last minute, default threshold 30/min
        let mut connections: Vec<_> = (0..40)
            .map(|i| connection(&format!("new-{i}"), at(30)))
            .collect();
        connections.push(connection("old", at(-600)));
        let snapshot = Snapshot::new(at(60)).with_connections(connections);

        let findings = evaluate(&snapshot, Some(&previous));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].context["opened"], "40");
        assert_eq!(findings[0].context["delta"], "40");
    }

    #[test]
    fn test_stable_connections_are_quiet() {
        let connections: Vec<_> = (0..50)
            .map(|i| connection(&format!("c{i}"), at(-3600)))
            .collect();
        let previous = Snapshot::new(at(0)).with_connections(connections.clone());
        let snapshot = Snapshot::new(at(60)).with_connections(connections);
        assert!(evaluate(&snapshot, Some(&previous)).is_empty());
    }

    #[test]
    fn test_short_interval_ignores_connections_seen_last_cycle() {
        // Opened 45s before the previous check, still inside the 60s young age
        let connections: Vec<_> = (0..10)
            .map(|i| connection(&format!("c{i}"), at(-45)))
            .collect();
        let previous = Snapshot::new(at(0)).with_connections(connections.clone());
        let snapshot = Snapshot::new(at(10)).with_connections(connections);
        assert!(evaluate(&snapshot, Some(&previous)).is_empty());
    }

    #[test]
    fn test_short_interval_rate_uses_interval() {
        let previous = Snapshot::new(at(0)).with_connections(vec![connection("old", at(-45))]);
        // 6 opened in 10s is 36/min; the stale one must not be counted
        let mut connections: Vec<_> = (0..6)
            .map(|i| connection(&format!("new-{i}"), at(5)))
            .collect();
        connections.push(connection("old", at(-45)));
        let snapshot = Snapshot::new(at(10)).with_connections(connections);

        let findings = evaluate(&snapshot, Some(&previous));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].context["opened"], "6");
        assert_eq!(findings[0].context["closed"], "0");
    }

    #[test]
    fn test_unordered_snapshots_are_ignored() {
        let previous = Snapshot::new(at(120)).with_connections(vec![]);
        let connections = (0..100)
            .map(|i| connection(&format!("c{i}"), at(59)))
            .collect();
        let snapshot = Snapshot::new(at(60)).with_connections(connections);
        assert!(evaluate(&snapshot, Some(&previous)).is_empty());
    }
}
