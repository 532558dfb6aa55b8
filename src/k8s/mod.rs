/// Kubernetes cluster access
pub mod client;
pub mod pods;

use anyhow::Result;
use async_trait::async_trait;

pub use client::{KubernetesClient, LogOptions};
pub use pods::PodRecord;

/// Source of pod snapshots for a namespace
#[async_trait]
pub trait PodInventory: Send + Sync {
    /// Current pods in `namespace`, in API order
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>>;
}
