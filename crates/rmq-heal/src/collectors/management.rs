//! RabbitMQ management HTTP API client.
//!
//! Decodes the management plugin's JSON into the snapshot model. Only the
//! fields the rules and the inventory output need are read; everything else
//! in the responses is ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::BrokerApi;
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::snapshot::{
    Arguments, Binding, BindingDirection, ChannelInfo, ConnectionInfo, ConnectionState,
    DestinationType, NodeInfo, QueueInfo,
};

/// Management API client using HTTP basic auth
#[derive(Debug, Clone)]
pub struct ManagementClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl ManagementClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    /// Verify the API is reachable and the credentials are accepted
    pub async fn check_connection(&self) -> Result<String> {
        let overview: Overview = self.get_json("/api/overview").await?;
        Ok(overview.rabbitmq_version)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Management API request");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url,
                status: status.as_u16(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn get_bindings(&self, path: &str) -> Result<Vec<Binding>> {
        let wire: Vec<WireBinding> = self.get_json(path).await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }
}

fn enc(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[async_trait]
impl BrokerApi for ManagementClient {
    async fn list_bindings(&self) -> Result<Vec<Binding>> {
        self.get_bindings("/api/bindings").await
    }

    async fn list_bindings_in(&self, vhost: &str) -> Result<Vec<Binding>> {
        self.get_bindings(&format!("/api/bindings/{}", enc(vhost)))
            .await
    }

    async fn list_exchange_bindings(
        &self,
        vhost: &str,
        exchange: &str,
        direction: BindingDirection,
    ) -> Result<Vec<Binding>> {
        self.get_bindings(&format!(
            "/api/exchanges/{}/{}/bindings/{}",
            enc(vhost),
            enc(exchange),
            direction.as_str()
        ))
        .await
    }

    async fn list_queue_bindings(&self, vhost: &str, queue: &str) -> Result<Vec<Binding>> {
        self.get_bindings(&format!("/api/queues/{}/{}/bindings", enc(vhost), enc(queue)))
            .await
    }

    async fn list_queues_in(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        let wire: Vec<WireQueue> = self.get_json(&format!("/api/queues/{}", enc(vhost))).await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }

    async fn get_queue(&self, vhost: &str, name: &str) -> Result<QueueInfo> {
        let wire: WireQueue = self
            .get_json(&format!("/api/queues/{}/{}", enc(vhost), enc(name)))
            .await?;
        Ok(wire.into())
    }

    async fn list_connections(&self) -> Result<Vec<ConnectionInfo>> {
        let wire: Vec<WireConnection> = self.get_json("/api/connections").await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let wire: Vec<WireChannel> = self.get_json("/api/channels").await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let wire: Vec<WireNode> = self.get_json("/api/nodes").await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Overview {
    #[serde(default)]
    rabbitmq_version: String,
}

/// Older brokers encode empty argument tables as `[]`
fn deserialize_arguments<'de, D>(deserializer: D) -> std::result::Result<Arguments, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(Arguments),
        List(serde::de::IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Map(map)) => map,
        Some(Raw::List(_)) | None => Arguments::new(),
    })
}

#[derive(Debug, Deserialize)]
struct WireBinding {
    #[serde(default)]
    vhost: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    destination_type: String,
    #[serde(default)]
    routing_key: String,
    #[serde(default, deserialize_with = "deserialize_arguments")]
    arguments: Arguments,
}

impl From<WireBinding> for Binding {
    fn from(wire: WireBinding) -> Self {
        Self {
            vhost: wire.vhost,
            source: wire.source,
            destination: wire.destination,
            destination_type: if wire.destination_type == "exchange" {
                DestinationType::Exchange
            } else {
                DestinationType::Queue
            },
            routing_key: wire.routing_key,
            arguments: wire.arguments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireQueue {
    #[serde(default)]
    vhost: String,
    name: String,
    #[serde(default)]
    durable: bool,
    #[serde(default)]
    messages_ready: u64,
    #[serde(default)]
    messages_unacknowledged: u64,
    #[serde(default)]
    messages: u64,
    #[serde(default)]
    consumers: u64,
    #[serde(default, deserialize_with = "deserialize_arguments")]
    arguments: Arguments,
}

impl From<WireQueue> for QueueInfo {
    fn from(wire: WireQueue) -> Self {
        Self {
            vhost: wire.vhost,
            name: wire.name,
            durable: wire.durable,
            messages_ready: wire.messages_ready,
            messages_unacked: wire.messages_unacknowledged,
            messages_total: wire.messages,
            consumers: wire.consumers,
            arguments: wire.arguments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireConnection {
    name: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    channels: u64,
    /// Milliseconds since the epoch
    #[serde(default)]
    connected_at: i64,
    #[serde(default)]
    client_properties: BTreeMap<String, serde_json::Value>,
}

fn parse_state(state: &str) -> ConnectionState {
    match state {
        "starting" => ConnectionState::Starting,
        "blocking" => ConnectionState::Blocking,
        "blocked" => ConnectionState::Blocked,
        "closing" => ConnectionState::Closing,
        "closed" => ConnectionState::Closed,
        _ => ConnectionState::Running,
    }
}

impl From<WireConnection> for ConnectionInfo {
    fn from(wire: WireConnection) -> Self {
        Self {
            name: wire.name,
            host: wire.host,
            user: wire.user,
            state: parse_state(&wire.state),
            channel_count: wire.channels,
            connected_at: DateTime::<Utc>::from_timestamp_millis(wire.connected_at)
                .unwrap_or_default(),
            client_properties: wire.client_properties,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireConnectionDetails {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    name: String,
    #[serde(default)]
    connection_details: WireConnectionDetails,
    #[serde(default)]
    consumer_count: u64,
    #[serde(default)]
    messages_unacknowledged: u64,
}

impl From<WireChannel> for ChannelInfo {
    fn from(wire: WireChannel) -> Self {
        Self {
            name: wire.name,
            owning_connection_name: wire.connection_details.name,
            consumer_count: wire.consumer_count,
            unacked_message_count: wire.messages_unacknowledged,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireNode {
    name: String,
    #[serde(default)]
    disk_free: u64,
    #[serde(default)]
    disk_free_limit: u64,
    #[serde(default)]
    mem_used: u64,
    #[serde(default)]
    mem_limit: u64,
    #[serde(default)]
    fd_used: u64,
    #[serde(default)]
    fd_total: u64,
}

impl From<WireNode> for NodeInfo {
    fn from(wire: WireNode) -> Self {
        Self {
            name: wire.name,
            disk_free_bytes: wire.disk_free,
            disk_free_limit_bytes: wire.disk_free_limit,
            mem_used_bytes: wire.mem_used,
            mem_limit_bytes: wire.mem_limit,
            fd_used: wire.fd_used,
            fd_total: wire.fd_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_arguments_accept_empty_list() {
        let queue: WireQueue = serde_json::from_value(serde_json::json!({
            "name": "orders",
            "vhost": "/",
            "arguments": [],
            "messages": 4,
            "messages_ready": 3,
            "messages_unacknowledged": 1
        }))
        .unwrap();
        let queue = QueueInfo::from(queue);
        assert!(queue.arguments.is_empty());
        assert!(queue.counters_consistent());
    }

    #[test]
    fn test_connection_timestamp_and_state() {
        let conn: WireConnection = serde_json::from_value(serde_json::json!({
            "name": "10.0.0.1:5555 -> 10.0.0.2:5672",
            "state": "blocked",
            "channels": 3,
            "connected_at": 1_700_000_000_000_i64
        }))
        .unwrap();
        let conn = ConnectionInfo::from(conn);
        assert_eq!(conn.state, ConnectionState::Blocked);
        assert_eq!(conn.connected_at.timestamp(), 1_700_000_000);
        assert_eq!(conn.channel_count, 3);
    }

    #[test]
    fn test_vhost_is_path_encoded() {
        assert_eq!(enc("/"), "%2F");
        assert_eq!(enc("team a"), "team%20a");
    }
}
