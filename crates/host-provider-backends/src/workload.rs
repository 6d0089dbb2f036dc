// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Narrow seam over a container orchestrator's stateful workload API.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::Credential;
use host_provider_core::{ClientSettings, Result};

use crate::compute::VendorResult;

/// Stateful set to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulSetSpec {
    /// Workload name; also the service name and the host address.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Container image.
    pub image: String,
    /// CPU request in cores.
    pub cpu: i32,
    /// Memory request in megabytes.
    pub memory: i32,
    /// Engine configuration file mounted into the pod.
    pub configuration_file: Option<String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

/// A stateful set as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulSet {
    /// Name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Desired replicas.
    pub replicas: i32,
    /// Ready replicas.
    pub ready_replicas: i32,
    /// Container image.
    pub image: String,
}

/// Status of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    /// Pod phase (`Pending`, `Running`, ...).
    pub phase: String,
    /// Whether the `Ready` condition is true.
    pub ready: bool,
    /// Image the main container runs.
    pub image: Option<String>,
}

/// Stateful workload API.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    /// Create a stateful set. An existing one with the same name is returned as is.
    async fn create_stateful_set(&self, spec: &StatefulSetSpec) -> VendorResult<StatefulSet>;

    /// Stateful set by name.
    async fn get_stateful_set(&self, namespace: &str, name: &str)
    -> VendorResult<Option<StatefulSet>>;

    /// Delete a stateful set and its pods.
    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> VendorResult<()>;

    /// Set the replica count.
    async fn scale_stateful_set(&self, namespace: &str, name: &str, replicas: i32)
    -> VendorResult<()>;

    /// Change the resource requests.
    async fn patch_resources(
        &self,
        namespace: &str,
        name: &str,
        cpu: i32,
        memory: i32,
    ) -> VendorResult<()>;

    /// Status of one pod.
    async fn read_pod_status(&self, namespace: &str, pod: &str) -> VendorResult<PodStatus>;
}

/// Builds authenticated [`WorkloadApi`] handles.
#[async_trait]
pub trait WorkloadConnector: Send + Sync {
    /// Connect using the `endpoint`/`token` of `credential`.
    async fn connect(
        &self,
        credential: &Credential,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn WorkloadApi>>;
}
