/// Kubernetes API client
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::pods::PodRecord;
use super::PodInventory;

/// Options for fetching container logs
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub container: Option<String>,
    /// Only the last N lines; `None` for the whole log
    pub tail_lines: Option<i64>,
    pub follow: bool,
}

/// Thin wrapper over a kube-rs client bound to one kubeconfig context
#[derive(Clone)]
pub struct KubernetesClient {
    client: Client,
}

impl KubernetesClient {
    /// Build a client for `context`, or for the current context when `None`
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(name) => {
                let options = KubeConfigOptions {
                    context: Some(name.to_string()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options)
                    .await
                    .with_context(|| format!("Failed to load kubeconfig context '{}'", name))?
            }
            None => Config::infer()
                .await
                .context("Failed to load Kubernetes configuration")?,
        };

        debug!("Connecting to cluster at {}", config.cluster_url);
        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self { client })
    }

    /// Raw kube client, used by the exec transport
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Delete a single pod
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        debug!("Deleting pod {}/{}", namespace, name);
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .with_context(|| format!("Failed to delete pod {}", name))?;
        Ok(())
    }

    /// Fetch the latest version of a pod
    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodRecord> {
        let pod = self
            .pods(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get pod {}", name))?;
        Ok(pod.into())
    }

    /// Events whose involved object is the named pod
    pub async fn pod_events(&self, namespace: &str, pod_name: &str) -> Result<Vec<Event>> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&format!("involvedObject.name={}", pod_name));
        let list = events
            .list(&params)
            .await
            .with_context(|| format!("Failed to list events for pod {}", pod_name))?;
        Ok(list.items)
    }

    /// Copy a pod's log to `out` line by line until the stream ends
    pub async fn stream_logs<W>(
        &self,
        namespace: &str,
        pod_name: &str,
        options: &LogOptions,
        out: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let params = LogParams {
            container: options.container.clone(),
            tail_lines: options.tail_lines,
            follow: options.follow,
            ..Default::default()
        };

        let stream = self
            .pods(namespace)
            .log_stream(pod_name, &params)
            .await
            .with_context(|| format!("Error retrieving logs for pod {}", pod_name))?;

        let mut lines = Box::pin(stream).lines();
        while let Some(line) = lines
            .try_next()
            .await
            .with_context(|| format!("Log stream for pod {} failed", pod_name))?
        {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl PodInventory for KubernetesClient {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>> {
        let start = std::time::Instant::now();
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list pods in namespace {}", namespace))?;
        debug!(
            "Listed {} pod(s) in {} in {:?}",
            list.items.len(),
            namespace,
            start.elapsed()
        );

        Ok(list.items.into_iter().map(PodRecord::from).collect())
    }
}

