//! Kubernetes API access for job placement

use super::location::ClusterApi;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node};
use kube::{api::ListParams, Api, Client};
use tracing::debug;

/// [`ClusterApi`] backed by the Kubernetes API server
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the default kubeconfig / in-cluster configuration
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn event_messages(&self, namespace: Option<&str>) -> Result<Vec<String>> {
        let api: Api<Event> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let events = api.list(&ListParams::default()).await?.items;
        debug!(count = events.len(), namespace = ?namespace, "Listed events");

        Ok(events.into_iter().filter_map(|e| e.message).collect())
    }

    async fn node_names(&self, selector: &str) -> Result<Vec<String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };
        let nodes = api.list(&params).await?.items;
        debug!(count = nodes.len(), selector = %selector, "Listed nodes");

        let mut names: Vec<String> = nodes.into_iter().filter_map(|n| n.metadata.name).collect();
        names.sort();
        Ok(names)
    }
}
