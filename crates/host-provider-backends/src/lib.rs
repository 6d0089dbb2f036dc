// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host Provider Backends
//!
//! Vendor back-ends for `host-provider-core`:
//!
//! | Provider | Zones from | Placement | Restore |
//! |----------|------------|-----------|---------|
//! | `cloudstack` | `zones` | round-robin | rebuild in place |
//! | `ec2` | `subnets` | round-robin | rebuild in place |
//! | `gce` | `availability_zones` | anti-collocation | recreate |
//! | `azure` | `subnets` | round-robin | recreate |
//! | `k8s` | - | unzoned | recreate |
//!
//! VM back-ends reach their vendor through [`compute::ComputeApi`], the
//! Kubernetes back-end through [`workload::WorkloadApi`]. Clients are built
//! by the connectors handed to [`default_registry`]; [`fake`] provides
//! in-memory ones.

use std::sync::Arc;

use host_provider_core::{Error, ProviderContext, ProviderRegistry, Result};
use serde_json::{Map, Value};

pub mod azure;
pub mod cloudstack;
pub mod compute;
pub mod ec2;
pub mod fake;
pub mod gce;
pub mod k8s;
pub mod workload;

/// Identifiers of every back-end in this crate.
pub const PROVIDER_IDS: [&str; 5] = [
    cloudstack::PROVIDER_ID,
    ec2::PROVIDER_ID,
    gce::PROVIDER_ID,
    azure::PROVIDER_ID,
    k8s::PROVIDER_ID,
];

/// Client builders for the two vendor API families.
#[derive(Clone)]
pub struct Connectors {
    /// VM-style vendors.
    pub compute: Arc<dyn compute::ComputeConnector>,
    /// Container orchestrator.
    pub workload: Arc<dyn workload::WorkloadConnector>,
}

impl Connectors {
    /// In-memory vendors.
    pub fn fake(compute: fake::FakeCompute, workload: fake::FakeWorkload) -> Self {
        Self {
            compute: Arc::new(compute),
            workload: Arc::new(workload),
        }
    }
}

/// Registry with every back-end of this crate.
pub fn default_registry(context: ProviderContext, connectors: &Connectors) -> ProviderRegistry {
    ProviderRegistry::new(context)
        .with(Arc::new(cloudstack::CloudStackFactory::new(
            connectors.compute.clone(),
        )))
        .with(Arc::new(ec2::Ec2Factory::new(connectors.compute.clone())))
        .with(Arc::new(gce::GceFactory::new(connectors.compute.clone())))
        .with(Arc::new(azure::AzureFactory::new(connectors.compute.clone())))
        .with(Arc::new(k8s::K8sFactory::new(connectors.workload.clone())))
}

/// Validate credential content for `provider` without building a client.
pub fn validate_credential(provider: &str, content: &Map<String, Value>) -> Result<()> {
    match provider {
        cloudstack::PROVIDER_ID => cloudstack::validate_credential(content),
        azure::PROVIDER_ID => azure::validate_credential(content),
        ec2::PROVIDER_ID | gce::PROVIDER_ID | k8s::PROVIDER_ID => Ok(()),
        other => Err(Error::not_found("provider", other)),
    }
}
