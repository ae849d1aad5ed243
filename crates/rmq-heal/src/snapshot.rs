//! Broker and orchestrator state captured by one fetch cycle.
//!
//! A [`Snapshot`] is assembled once by the fetcher and then shared read-only
//! (behind an `Arc`) by every rule of the evaluation pass. Each resource is a
//! [`Collected`] value so a failed sub-fetch is visible as "unavailable"
//! instead of looking like an empty cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FetchFailure;

/// Opaque `x-*` argument table attached to queues and bindings
pub type Arguments = BTreeMap<String, serde_json::Value>;

/// Queue name -> queue, for one virtual host
pub type QueueMap = BTreeMap<String, QueueInfo>;

/// A resource listing that may have failed to load
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "items", rename_all = "lowercase")]
pub enum Collected<T> {
    Available(T),
    Unavailable,
}

impl<T> Collected<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self::Unavailable
    }
}

impl<T> From<Option<T>> for Collected<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unavailable, Self::Available)
    }
}

/// Which side of an exchange a binding listing is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingDirection {
    Source,
    Destination,
}

impl BindingDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

/// A narrower binding listing requested in addition to the global one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BindingScope {
    Vhost {
        vhost: String,
    },
    Exchange {
        vhost: String,
        exchange: String,
        #[serde(default = "default_direction")]
        direction: BindingDirection,
    },
    Queue {
        vhost: String,
        queue: String,
    },
}

fn default_direction() -> BindingDirection {
    BindingDirection::Source
}

impl std::fmt::Display for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vhost { vhost } => write!(f, "vhost '{vhost}'"),
            Self::Exchange {
                vhost,
                exchange,
                direction,
            } => write!(
                f,
                "exchange '{exchange}' ({}) in '{vhost}'",
                direction.as_str()
            ),
            Self::Queue { vhost, queue } => write!(f, "queue '{queue}' in '{vhost}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    #[default]
    Queue,
    Exchange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub vhost: String,
    pub source: String,
    pub destination: String,
    pub destination_type: DestinationType,
    pub routing_key: String,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub vhost: String,
    pub name: String,
    pub durable: bool,
    pub messages_ready: u64,
    pub messages_unacked: u64,
    pub messages_total: u64,
    pub consumers: u64,
    pub arguments: Arguments,
}

impl QueueInfo {
    /// Whether the broker's aggregate counter agrees with its parts.
    ///
    /// Management stats are sampled, so a mismatch means the counters are
    /// still settling rather than that the queue is broken.
    pub fn counters_consistent(&self) -> bool {
        self.messages_total == self.messages_ready + self.messages_unacked
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Starting,
    #[default]
    Running,
    Blocking,
    Blocked,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Blocking => "blocking",
            Self::Blocked => "blocked",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub host: String,
    pub user: String,
    pub state: ConnectionState,
    pub channel_count: u64,
    pub connected_at: DateTime<Utc>,
    pub client_properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub owning_connection_name: String,
    pub consumer_count: u64,
    pub unacked_message_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub disk_free_bytes: u64,
    pub disk_free_limit_bytes: u64,
    pub mem_used_bytes: u64,
    pub mem_limit_bytes: u64,
    pub fd_used: u64,
    pub fd_total: u64,
}

impl NodeInfo {
    /// Free disk above the broker's alarm limit; negative once the alarm is active
    pub fn disk_margin_bytes(&self) -> i64 {
        self.disk_free_bytes as i64 - self.disk_free_limit_bytes as i64
    }

    /// `None` when the node did not report a descriptor limit
    pub fn fd_ratio(&self) -> Option<f64> {
        (self.fd_total > 0).then(|| self.fd_used as f64 / self.fd_total as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub phase: String,
    pub restart_count: u32,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

/// Binding listing for one configured [`BindingScope`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedBindings {
    pub scope: BindingScope,
    pub bindings: Collected<Vec<Binding>>,
}

/// Everything one cycle knows about the cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    pub bindings: Collected<Vec<Binding>>,
    pub scoped_bindings: Vec<ScopedBindings>,
    /// vhost -> queue listing
    pub queues: BTreeMap<String, Collected<QueueMap>>,
    pub connections: Collected<Vec<ConnectionInfo>>,
    pub channels: Collected<Vec<ChannelInfo>>,
    pub nodes: Collected<Vec<NodeInfo>>,
    pub pods: Collected<Vec<PodInfo>>,
    /// Sub-fetches that failed while building this snapshot
    pub failures: Vec<FetchFailure>,
}

impl Snapshot {
    /// A snapshot with every resource unavailable
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            bindings: Collected::Unavailable,
            scoped_bindings: Vec::new(),
            queues: BTreeMap::new(),
            connections: Collected::Unavailable,
            channels: Collected::Unavailable,
            nodes: Collected::Unavailable,
            pods: Collected::Unavailable,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: Vec<Binding>) -> Self {
        self.bindings = Collected::Available(bindings);
        self
    }

    /// Add a queue listing; queues are keyed by their own `vhost` field
    #[must_use]
    pub fn with_queues(mut self, vhost: &str, queues: Vec<QueueInfo>) -> Self {
        let map = queues.into_iter().map(|q| (q.name.clone(), q)).collect();
        self.queues.insert(vhost.to_string(), Collected::Available(map));
        self
    }

    #[must_use]
    pub fn with_connections(mut self, connections: Vec<ConnectionInfo>) -> Self {
        self.connections = Collected::Available(connections);
        self
    }

    #[must_use]
    pub fn with_channels(mut self, channels: Vec<ChannelInfo>) -> Self {
        self.channels = Collected::Available(channels);
        self
    }

    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.nodes = Collected::Available(nodes);
        self
    }

    #[must_use]
    pub fn with_pods(mut self, pods: Vec<PodInfo>) -> Self {
        self.pods = Collected::Available(pods);
        self
    }

    #[must_use]
    pub fn with_failure(mut self, failure: FetchFailure) -> Self {
        self.failures.push(failure);
        self
    }

    /// Whether at least one resource was collected
    pub fn has_any_data(&self) -> bool {
        self.bindings.is_available()
            || self.connections.is_available()
            || self.channels.is_available()
            || self.nodes.is_available()
            || self.pods.is_available()
            || self.scoped_bindings.iter().any(|s| s.bindings.is_available())
            || self.queues.values().any(Collected::is_available)
    }

    /// Queue listing for a vhost, if it was collected
    pub fn queues_in(&self, vhost: &str) -> Option<&QueueMap> {
        self.queues.get(vhost).and_then(Collected::available)
    }

    pub fn queue(&self, vhost: &str, name: &str) -> Option<&QueueInfo> {
        self.queues_in(vhost).and_then(|queues| queues.get(name))
    }

    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes
            .available()
            .and_then(|nodes| nodes.iter().find(|n| n.name == name))
    }

    /// Bindings whose source is `exchange` in `vhost`, from the global listing
    pub fn bindings_from(&self, vhost: &str, exchange: &str) -> Option<Vec<&Binding>> {
        self.bindings.available().map(|bindings| {
            bindings
                .iter()
                .filter(|b| b.vhost == vhost && b.source == exchange)
                .collect()
        })
    }
}
