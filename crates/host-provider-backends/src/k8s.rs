// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes back-end.
//!
//! Each host is a single-replica stateful set named after the host; its
//! service name doubles as the address. There are no zones. Start and stop
//! scale the set to one and zero replicas.
//!
//! Credential fields: `endpoint`, `token`, `namespace` (default `default`),
//! `templates` (engine to image) and `configuration_files` (engine to file
//! content mounted into the pod).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use host_provider_core::credential::{Credential, LazyCredential};
use host_provider_core::model::engine_name;
use host_provider_core::{
    ClientSettings, CreateRequest, Host, PlacementStrategy, PollPolicy, PowerState, Provider,
    ProviderContext, ProviderFactory, Readiness, Result, VendorUnit,
};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::compute::labels;
use crate::workload::{StatefulSetSpec, WorkloadApi, WorkloadConnector};

/// Back-end identifier.
pub const PROVIDER_ID: &str = "k8s";

const DEFAULT_NAMESPACE: &str = "default";

/// Builds [`K8sProvider`]s.
pub struct K8sFactory {
    connector: Arc<dyn WorkloadConnector>,
}

impl K8sFactory {
    /// Factory connecting through `connector`.
    pub fn new(connector: Arc<dyn WorkloadConnector>) -> Self {
        Self { connector }
    }
}

impl ProviderFactory for K8sFactory {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn build(
        &self,
        environment: &str,
        engine: &str,
        context: &ProviderContext,
    ) -> Box<dyn Provider> {
        Box::new(K8sProvider {
            environment: environment.to_string(),
            engine: engine.to_string(),
            credential: LazyCredential::new(
                context.credentials.clone(),
                PROVIDER_ID,
                environment,
                engine,
            ),
            connector: self.connector.clone(),
            settings: context.settings.clone(),
            client: OnceCell::new(),
        })
    }
}

/// Kubernetes provider.
pub struct K8sProvider {
    environment: String,
    engine: String,
    credential: LazyCredential,
    connector: Arc<dyn WorkloadConnector>,
    settings: ClientSettings,
    client: OnceCell<Arc<dyn WorkloadApi>>,
}

impl K8sProvider {
    async fn client(&self) -> Result<&dyn WorkloadApi> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let credential = self.credential.get().await?;
                debug!(
                    provider = PROVIDER_ID,
                    environment = credential.environment(),
                    "Building workload client"
                );
                self.connector.connect(credential, &self.settings).await
            })
            .await?;
        Ok(client.as_ref())
    }

    async fn namespace(&self) -> Result<&str> {
        Ok(self
            .credential()
            .await?
            .opt_str("namespace")
            .unwrap_or(DEFAULT_NAMESPACE))
    }
}

/// First pod of a stateful set.
fn pod_name(name: &str) -> String {
    format!("{name}-0")
}

/// Configuration file for `engine`, if the credential carries one.
fn configuration_file(credential: &Credential, engine: &str) -> Option<String> {
    credential
        .content()
        .get("configuration_files")
        .and_then(|files| files.get(engine))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl Provider for K8sProvider {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn engine(&self) -> &str {
        &self.engine
    }

    fn default_placement(&self) -> PlacementStrategy {
        PlacementStrategy::Unzoned
    }

    fn ready_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(10), 30)
    }

    async fn credential(&self) -> Result<&Credential> {
        self.credential.get().await
    }

    async fn create(&self, request: &CreateRequest) -> Result<VendorUnit> {
        let credential = self.credential().await?;
        let api = self.client().await?;
        let namespace = self.namespace().await?;

        let existing = api
            .get_stateful_set(namespace, &request.name)
            .await?
            .is_some();

        let spec = StatefulSetSpec {
            name: request.name.clone(),
            namespace: namespace.to_string(),
            image: credential.template_to(&self.engine)?.to_string(),
            cpu: request.cpu,
            memory: request.memory,
            configuration_file: configuration_file(credential, &self.engine),
            labels: labels(
                &self.settings,
                [
                    ("engine", engine_name(&self.engine)),
                    ("group", request.group.as_str()),
                ],
            ),
        };
        let set = api.create_stateful_set(&spec).await?;

        Ok(VendorUnit {
            identifier: set.name.clone(),
            address: set.name,
            zone: None,
            existing,
        })
    }

    async fn start(&self, host: &Host) -> Result<()> {
        let namespace = self.namespace().await?;
        Ok(self
            .client()
            .await?
            .scale_stateful_set(namespace, &host.identifier, 1)
            .await?)
    }

    async fn stop(&self, host: &Host) -> Result<()> {
        let namespace = self.namespace().await?;
        Ok(self
            .client()
            .await?
            .scale_stateful_set(namespace, &host.identifier, 0)
            .await?)
    }

    async fn power_state(&self, host: &Host) -> Result<PowerState> {
        let namespace = self.namespace().await?;
        let set = self
            .client()
            .await?
            .get_stateful_set(namespace, &host.identifier)
            .await?
            .ok_or_else(|| host_provider_core::Error::not_found("stateful_set", &host.identifier))?;

        Ok(match (set.replicas, set.ready_replicas) {
            (0, 0) => PowerState::Stopped,
            (r, ready) if r > 0 && ready >= r => PowerState::Running,
            _ => PowerState::Pending,
        })
    }

    async fn resize(&self, host: &Host, cpu: i32, memory: i32) -> Result<()> {
        let namespace = self.namespace().await?;
        Ok(self
            .client()
            .await?
            .patch_resources(namespace, &host.identifier, cpu, memory)
            .await?)
    }

    async fn destroy(&self, host: &Host) -> Result<()> {
        let namespace = self.namespace().await?;
        match self
            .client()
            .await?
            .delete_stateful_set(namespace, &host.identifier)
            .await
        {
            Err(e) if e.not_found => Ok(()),
            other => Ok(other?),
        }
    }

    async fn exists(&self, host: &Host) -> Result<bool> {
        let namespace = self.namespace().await?;
        Ok(self
            .client()
            .await?
            .get_stateful_set(namespace, &host.identifier)
            .await?
            .is_some())
    }

    async fn is_ready(&self, host: &Host) -> Result<Readiness> {
        let namespace = self.namespace().await?;
        let status = self
            .client()
            .await?
            .read_pod_status(namespace, &pod_name(&host.identifier))
            .await;

        match status {
            Ok(status) if status.phase == "Running" && status.ready => Ok(Readiness {
                ready: true,
                version: status.image,
            }),
            Ok(_) => Ok(Readiness::not_ready()),
            // The pod is not scheduled yet.
            Err(e) if e.not_found => Ok(Readiness::not_ready()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_configuration_file_per_engine() {
        let Value::Object(content) = json!({
            "configuration_files": {"redis_6_0_5": "maxmemory 1gb"}
        }) else {
            unreachable!()
        };
        let credential = Credential::new(PROVIDER_ID, "dev", "redis_6_0_5", content);

        assert_eq!(
            configuration_file(&credential, "redis_6_0_5").as_deref(),
            Some("maxmemory 1gb")
        );
        assert_eq!(configuration_file(&credential, "mongodb_4_2_3"), None);
        assert_eq!(pod_name("cache-1"), "cache-1-0");
    }
}
