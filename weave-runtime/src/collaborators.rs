//! Pluggable collaborator contracts (spec section 6).
//!
//! These traits are the entire boundary between the reconciliation fabric
//! and the concrete business logic it does not implement: Kubernetes API
//! clients, Talos gRPC clients, S3-backed backup stores, discovery service
//! clients, and workload-proxy routing. A downstream crate provides real
//! implementations; nothing here talks to a network.

use async_trait::async_trait;
use std::collections::BTreeMap;

/// Vends (and tears down) per-cluster Kubernetes API clients.
#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    type Client: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get_client(&self, cluster_id: &str) -> Result<Self::Client, Self::Error>;
    async fn destroy_client(&self, cluster_id: &str);
}

/// Vends Talos gRPC clients, used by identity collectors and etcd snapshot
/// streaming.
#[async_trait]
pub trait TalosClientFactory: Send + Sync {
    type Client: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get_client(&self, cluster_name: &str) -> Result<Self::Client, Self::Error>;
}

/// A handle to list and upload etcd backups.
#[async_trait]
pub trait BackupStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn list_backups(&self) -> Result<Vec<String>, Self::Error>;
    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), Self::Error>;
    fn description(&self) -> String;
}

/// Vends a [`BackupStore`] for a given cluster.
#[async_trait]
pub trait BackupStoreFactory: Send + Sync {
    type Store: BackupStore;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get_store(&self, cluster_id: &str) -> Result<Self::Store, Self::Error>;
}

/// Tracks discovery-service affiliates so they can be dropped on teardown.
#[async_trait]
pub trait DiscoveryClientCache: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn affiliate_delete(&self, endpoint: &str, cluster: &str, affiliate: &str) -> Result<(), Self::Error>;
}

/// Reconciles workload-proxy routing for a cluster's exposed services.
///
/// `reconcile(None)` means the feature was disabled for that cluster and any
/// routes for it should be withdrawn.
#[async_trait]
pub trait WorkloadProxyReconciler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// `data` maps an exposed-service alias to its backend addresses.
    async fn reconcile(
        &self,
        cluster_id: &str,
        data: Option<BTreeMap<String, Vec<String>>>,
    ) -> Result<(), Self::Error>;

    async fn drop_alias(&self, alias: &str) -> bool;
}
