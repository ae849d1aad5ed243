//! Configuration for collectors, rule thresholds, remediation and the cycle.
//!
//! Every section has defaults, so an empty TOML file (or none at all) is a
//! valid configuration. Broker credentials and orchestrator scope can also be
//! overridden from the command line / environment in `main`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::snapshot::BindingScope;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub orchestrator: OrchestratorConfig,
    pub rules: RulesConfig,
    pub remediation: RemediationConfig,
    pub cycle: CycleConfig,
}

impl Config {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject threshold combinations that would make a rule meaningless
    pub fn validate(&self) -> Result<()> {
        let fds = &self.rules.file_descriptors;
        check_watermarks("rules.file_descriptors", fds.warning_ratio, fds.critical_ratio)?;
        let sockets = &self.rules.sockets;
        check_watermarks("rules.sockets", sockets.warning_ratio, sockets.critical_ratio)?;
        if sockets.socket_ceiling == 0 {
            return Err(Error::Config("rules.sockets.socket_ceiling must be > 0".into()));
        }
        if !self.rules.unroutable.dead_letter_queue_pattern.contains("{queue}") {
            return Err(Error::Config(
                "rules.unroutable.dead_letter_queue_pattern must contain '{queue}'".into(),
            ));
        }
        if self.remediation.max_actions_per_window == 0 {
            return Err(Error::Config(
                "remediation.max_actions_per_window must be > 0".into(),
            ));
        }
        if self.broker.vhosts.is_empty() {
            return Err(Error::Config("broker.vhosts must list at least one vhost".into()));
        }
        if self.cycle.deadline_secs == 0 {
            return Err(Error::Config("cycle.deadline_secs must be > 0".into()));
        }
        Ok(())
    }
}

fn check_watermarks(section: &str, warning: f64, critical: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&warning) || !(0.0..=1.0).contains(&critical) {
        return Err(Error::Config(format!("{section}: ratios must be within 0..=1")));
    }
    if warning > critical {
        return Err(Error::Config(format!(
            "{section}: warning_ratio ({warning}) exceeds critical_ratio ({critical})"
        )));
    }
    Ok(())
}

/// RabbitMQ management API access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub request_timeout_secs: u64,
    /// Virtual hosts whose queues are listed each cycle
    pub vhosts: Vec<String>,
    /// Extra binding listings collected alongside the global one
    pub binding_scopes: Vec<BindingScope>,
    /// Queues fetched one by one when a vhost listing fails
    pub watched_queues: Vec<WatchedQueue>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            request_timeout_secs: 10,
            vhosts: vec!["/".to_string()],
            binding_scopes: Vec::new(),
            watched_queues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedQueue {
    pub vhost: String,
    pub name: String,
}

/// Kubernetes scope of the broker deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub namespace: String,
    pub label_selector: String,
    pub request_timeout_secs: u64,
    pub log_tail_lines: i64,
    pub custom_resource: CustomResourceRef,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "demo".to_string(),
            label_selector: "app.kubernetes.io/name=rabbitmq".to_string(),
            request_timeout_secs: 15,
            log_tail_lines: 100,
            custom_resource: CustomResourceRef::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The operator-managed RabbitMQ resource shown by `describe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomResourceRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub name: String,
}

impl Default for CustomResourceRef {
    fn default() -> Self {
        Self {
            group: "kubedb.com".to_string(),
            version: "v1alpha2".to_string(),
            kind: "RabbitMQ".to_string(),
            plural: "rabbitmqs".to_string(),
            name: "rm-quickstart".to_string(),
        }
    }
}

/// Thresholds for the built-in rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub unroutable: UnroutableConfig,
    pub churn: ChurnConfig,
    pub disk: DiskConfig,
    pub file_descriptors: WatermarkConfig,
    pub sockets: SocketConfig,
    pub broker_down: BrokerDownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnroutableConfig {
    /// Dead-letter queue naming convention; `{queue}` is the source queue
    pub dead_letter_queue_pattern: String,
    /// Emit an info finding for queues with no dead-letter exchange
    pub report_queues_without_dlx: bool,
}

impl Default for UnroutableConfig {
    fn default() -> Self {
        Self {
            dead_letter_queue_pattern: "dlq.{queue}".to_string(),
            report_queues_without_dlx: true,
        }
    }
}

impl UnroutableConfig {
    pub fn dead_letter_queue_for(&self, queue: &str) -> String {
        self.dead_letter_queue_pattern.replace("{queue}", queue)
    }

    /// Inverse of [`Self::dead_letter_queue_for`]: the source queue of a DLQ name
    pub fn source_queue_of<'a>(&self, dlq: &'a str) -> Option<&'a str> {
        let (prefix, suffix) = self.dead_letter_queue_pattern.split_once("{queue}")?;
        let source = dlq.strip_prefix(prefix)?.strip_suffix(suffix)?;
        (!source.is_empty()).then_some(source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnConfig {
    /// Connections younger than this count as newly opened
    pub young_connection_secs: u64,
    /// New connections per minute above which churn is reported
    pub max_new_connections_per_min: f64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            young_connection_secs: 60,
            max_new_connections_per_min: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub min_margin_bytes: u64,
    /// How far ahead the linear exhaustion prediction looks
    pub horizon_secs: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            min_margin_bytes: 1024 * 1024 * 1024,
            horizon_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub warning_ratio: f64,
    pub critical_ratio: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            warning_ratio: 0.8,
            critical_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub socket_ceiling: u64,
    pub warning_ratio: f64,
    pub critical_ratio: f64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_ceiling: 65_536,
            warning_ratio: 0.8,
            critical_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerDownConfig {
    pub expected_replicas: usize,
}

impl Default for BrokerDownConfig {
    fn default() -> Self {
        Self {
            expected_replicas: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub enabled: bool,
    pub max_actions_per_window: usize,
    pub window_secs: u64,
    pub history_max_records: usize,
    pub history_max_age_secs: u64,
    /// Attach a log tail of restarted or failed pods to the record
    pub attach_logs: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_actions_per_window: 1,
            window_secs: 600,
            history_max_records: 500,
            history_max_age_secs: 86_400,
            attach_logs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub interval_secs: u64,
    /// Budget for fetch + evaluate + remediate of one cycle
    pub deadline_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            deadline_secs: 45,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.broker.url, "http://localhost:15672");
        assert_eq!(config.broker.vhosts, vec!["/".to_string()]);
        assert_eq!(config.orchestrator.namespace, "demo");
        assert_eq!(config.rules.broker_down.expected_replicas, 3);
        assert_eq!(config.remediation.window_secs, 600);
        assert!(!config.remediation.enabled);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            [rules.file_descriptors]
            critical_ratio = 0.95

            [remediation]
            enabled = true
            "#,
        )
        .unwrap();
        assert!((config.rules.file_descriptors.critical_ratio - 0.95).abs() < f64::EPSILON);
        assert!((config.rules.file_descriptors.warning_ratio - 0.8).abs() < f64::EPSILON);
        assert!(config.remediation.enabled);
        assert_eq!(config.remediation.max_actions_per_window, 1);
    }

    #[test]
    fn test_rejects_inverted_watermarks() {
        let err = Config::from_toml(
            r#"
            [rules.sockets]
            warning_ratio = 0.95
            critical_ratio = 0.5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rules.sockets"));
    }

    #[test]
    fn test_rejects_pattern_without_placeholder() {
        let err = Config::from_toml(
            r#"
            [rules.unroutable]
            dead_letter_queue_pattern = "dead-letters"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_dead_letter_naming_round_trip() {
        let unroutable = UnroutableConfig::default();
        assert_eq!(unroutable.dead_letter_queue_for("orders"), "dlq.orders");
        assert_eq!(unroutable.source_queue_of("dlq.orders"), Some("orders"));
        assert_eq!(unroutable.source_queue_of("orders"), None);
        assert_eq!(unroutable.source_queue_of("dlq."), None);

        let suffixed = UnroutableConfig {
            dead_letter_queue_pattern: "{queue}.dead".into(),
            ..Default::default()
        };
        assert_eq!(suffixed.source_queue_of("billing.dead"), Some("billing"));
    }
}
