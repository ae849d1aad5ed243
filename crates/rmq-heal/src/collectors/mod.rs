//! Collaborators the pipeline reads from and acts through.
//!
//! The fetcher and the remediation controller only see these traits, so the
//! cycle can run against the real APIs or against in-memory fakes.

pub mod kubernetes;
pub mod management;

pub use kubernetes::KubeOrchestrator;
pub use management::ManagementClient;

use async_trait::async_trait;

use crate::config::CustomResourceRef;
use crate::error::Result;
use crate::snapshot::{
    Binding, BindingDirection, ChannelInfo, ConnectionInfo, NodeInfo, PodInfo, QueueInfo,
};

/// RabbitMQ management API (read-only)
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn list_bindings(&self) -> Result<Vec<Binding>>;

    async fn list_bindings_in(&self, vhost: &str) -> Result<Vec<Binding>>;

    async fn list_exchange_bindings(
        &self,
        vhost: &str,
        exchange: &str,
        direction: BindingDirection,
    ) -> Result<Vec<Binding>>;

    async fn list_queue_bindings(&self, vhost: &str, queue: &str) -> Result<Vec<Binding>>;

    async fn list_queues_in(&self, vhost: &str) -> Result<Vec<QueueInfo>>;

    async fn get_queue(&self, vhost: &str, name: &str) -> Result<QueueInfo>;

    async fn list_connections(&self) -> Result<Vec<ConnectionInfo>>;

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
}

/// Container orchestrator hosting the broker pods
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodInfo>>;

    /// Delete a pod so its controller recreates it
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: Option<i64>,
    ) -> Result<String>;

    /// Raw read of the broker's custom resource, for descriptive output only
    async fn get_custom_resource(
        &self,
        resource: &CustomResourceRef,
        namespace: &str,
    ) -> Result<serde_json::Value>;
}
