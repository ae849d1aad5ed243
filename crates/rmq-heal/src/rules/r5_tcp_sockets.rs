//! R5: TCP Sockets Near Limit
//!
//! The broker's real socket count is not observed here. Pressure is
//! approximated from the channels the connections declare and the channels
//! actually listed, whichever is larger, against a configured ceiling. Treat
//! the result as a trend indicator, not ground truth.

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
        RuleId::TcpSocketsNearLimit
    }

    fn evaluate(&self, snapshot: &Snapshot, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let connections = snapshot.connections.available();
        let channels = snapshot.channels.available();
        if connections.is_none() && channels.is_none() {
            return Vec::new();
        }

        let config = &ctx.config.sockets;
        let declared: u64 = connections
            .map(|conns| conns.iter().map(|c| c.channel_count).sum())
            .unwrap_or(0);
        let active = channels.map_or(0, |chans| chans.len() as u64);
        let pressure = declared.max(active);
        let ratio = pressure as f64 / config.socket_ceiling as f64;

        let severity = if ratio > config.critical_ratio {
            Severity::Critical
        } else if ratio > config.warning_ratio {
            Severity::Warning
        } else {
            return Vec::new();
        };

        vec![Finding::new(
            RuleId::TcpSocketsNearLimit,
            SubjectKind::Cluster,
            "sockets",
            format!(
                "Estimated socket pressure {pressure} of {} ({:.1}%), approximated from channel counts",
                config.socket_ceiling,
                ratio * 100.0
            ),
        )
        .with_severity(severity)
        .with_context("declared_channels", declared.to_string())
        .with_context("active_channels", active.to_string())
        .with_context(
            "connections",
            connections.map_or_else(|| "unavailable".to_string(), |c| c.len().to_string()),
        )
        .with_context("approximation", "true")
        .at(snapshot.fetched_at)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RulesConfig, SocketConfig};
    use crate::snapshot::{ChannelInfo, ConnectionInfo, ConnectionState};
    use chrono::Utc;

    fn connection(name: &str, channel_count: u64) -> ConnectionInfo {
        ConnectionInfo {
            name: name.into(),
            host: "10.0.0.7".into(),
            user: "app".into(),
            state: ConnectionState::Running,
            channel_count,
            connected_at: Utc::now(),
            client_properties: Default::default(),
        }
    }

    fn channels(n: usize) -> Vec<ChannelInfo> {
        (0..n)
            .map(|i| ChannelInfo {
                name: format!("ch-{i}"),
                owning_connection_name: "conn".into(),
                ..Default::default()
            })
            .collect()
    }

    fn evaluate(snapshot: &Snapshot) -> Vec<Finding> {
        let config = RulesConfig {
            sockets: SocketConfig {
                socket_ceiling: 100,
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = RuleContext {
            config: &config,
            previous: None,
        };
        Handler::new().evaluate(snapshot, &ctx)
    }

    #[test]
    fn test_declared_channels_over_critical() {
        let snapshot = Snapshot::new(Utc::now())
            .with_connections(vec![connection("a", 50), connection("b", 45)])
            .with_channels(channels(10));
        let findings = evaluate(&snapshot);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].context["declared_channels"], "95");
    }

    #[test]
    fn test_active_channels_alone_can_warn() {
        let snapshot = Snapshot::new(Utc::now()).with_channels(channels(85));
        let findings = evaluate(&snapshot);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].context["connections"], "unavailable");
    }

    #[test]
    fn test_low_pressure_is_silent() {
        let snapshot = Snapshot::new(Utc::now())
            .with_connections(vec![connection("a", 3)])
            .with_channels(channels(3));
        assert!(evaluate(&snapshot).is_empty());
    }

    #[test]
    fn test_nothing_collected_is_silent() {
        assert!(evaluate(&Snapshot::new(Utc::now())).is_empty());
    }
}
