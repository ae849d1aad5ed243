//! Kubernetes-backed orchestrator.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams},
    core::GroupVersionKind,
    Client, ResourceExt,
};
use tracing::{debug, info};

use super::Orchestrator;
use crate::config::CustomResourceRef;
use crate::error::Result;
use crate::snapshot::PodInfo;

pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    let status = pod.status.as_ref();
    let restart_count: i32 = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0);

    PodInfo {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        labels: pod.labels().clone(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        restart_count: restart_count.max(0) as u32,
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodInfo>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(namespace, label_selector, count = pods.items.len(), "Listed pods");
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        info!(namespace, pod = name, "Deleting pod");
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        let params = LogParams {
            tail_lines,
            ..LogParams::default()
        };
        Ok(self.pods(namespace).logs(name, &params).await?)
    }

    async fn get_custom_resource(
        &self,
        resource: &CustomResourceRef,
        namespace: &str,
    ) -> Result<serde_json::Value> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &api_resource);
        let object = api.get(&resource.name).await?;
        Ok(serde_json::to_value(object)?)
    }
}
