// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller-facing operations.
//!
//! [`HostProviderService`] resolves the back-end for each request through the
//! [`ProviderRegistry`] and delegates to the [`LifecycleEngine`]. A transport
//! layer maps these calls 1:1 onto its routes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::lifecycle::{HostSpec, LifecycleEngine};
use crate::model::{Host, StaticIp};
use crate::persistence::Stores;
use crate::provider::{Provider, ProviderRegistry};

/// Input of [`HostProviderService::create_host`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateHostRequest {
    /// Back-end identifier.
    pub provider: String,
    /// Environment.
    pub environment: String,
    /// Virtual CPUs.
    pub cpu: i32,
    /// Memory in megabytes.
    pub memory: i32,
    /// Unit name.
    pub name: String,
    /// Group.
    pub group: String,
    /// Engine type.
    pub engine: String,
    /// Zone override.
    #[serde(default)]
    pub zone: Option<String>,
    /// Back-end specific options.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl CreateHostRequest {
    /// Reject empty identifiers and non-positive capacity.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("provider", &self.provider),
            ("environment", &self.environment),
            ("name", &self.name),
            ("group", &self.group),
            ("engine", &self.engine),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(field, "must not be empty"));
            }
        }
        if self.cpu <= 0 {
            return Err(Error::validation("cpu", "must be positive"));
        }
        if self.memory <= 0 {
            return Err(Error::validation("memory", "must be positive"));
        }
        if let Some(zone) = &self.zone
            && zone.trim().is_empty()
        {
            return Err(Error::validation("zone", "must not be empty"));
        }
        Ok(())
    }
}

/// Host provisioning service.
pub struct HostProviderService {
    registry: ProviderRegistry,
    stores: Stores,
    engine: LifecycleEngine,
}

impl HostProviderService {
    /// Service over `registry` and `stores`.
    pub fn new(registry: ProviderRegistry, stores: Stores) -> Self {
        let engine = LifecycleEngine::new(&stores);
        Self {
            registry,
            stores,
            engine,
        }
    }

    /// Replace the lifecycle engine (e.g. one with shorter poll budgets).
    pub fn with_engine(mut self, engine: LifecycleEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Registered back-ends.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Underlying stores.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    fn provider_for(&self, host: &Host, engine: Option<&str>) -> Result<Box<dyn Provider>> {
        self.registry.build(
            &host.provider,
            &host.environment,
            engine.unwrap_or(&host.engine),
        )
    }

    async fn load(&self, id: i64) -> Result<(Host, Box<dyn Provider>)> {
        let host = self.engine.get(id).await?;
        let provider = self.provider_for(&host, None)?;
        Ok((host, provider))
    }

    /// Create a host.
    pub async fn create_host(&self, request: CreateHostRequest) -> Result<Host> {
        request.validate()?;
        let provider =
            self.registry
                .build(&request.provider, &request.environment, &request.engine)?;

        let spec = HostSpec {
            name: request.name,
            group: request.group,
            cpu: request.cpu,
            memory: request.memory,
            zone: request.zone,
            extra: request.extra,
        };
        self.engine.create(provider.as_ref(), &spec).await
    }

    /// Power a host on.
    pub async fn start_host(&self, id: i64) -> Result<Host> {
        let (host, provider) = self.load(id).await?;
        self.engine.start(provider.as_ref(), &host).await?;
        Ok(host)
    }

    /// Power a host off.
    pub async fn stop_host(&self, id: i64) -> Result<Host> {
        let (host, provider) = self.load(id).await?;
        self.engine.stop(provider.as_ref(), &host).await?;
        Ok(host)
    }

    /// Change capacity.
    pub async fn resize_host(&self, id: i64, cpu: i32, memory: i32) -> Result<Host> {
        let (host, provider) = self.load(id).await?;
        self.engine
            .resize(provider.as_ref(), &host, cpu, memory)
            .await
    }

    /// Restore a host, optionally to another engine.
    pub async fn restore_host(
        &self,
        id: i64,
        engine: Option<&str>,
        extra: &Map<String, Value>,
    ) -> Result<Host> {
        let host = self.engine.get(id).await?;
        let provider = self.provider_for(&host, engine)?;
        self.engine.restore(provider.as_ref(), &host, extra).await
    }

    /// Destroy a host.
    pub async fn destroy_host(&self, id: i64) -> Result<()> {
        let (host, provider) = self.load(id).await?;
        self.engine.destroy(provider.as_ref(), &host).await
    }

    /// Get a host, optionally refreshing vendor-owned fields first.
    pub async fn get_host(&self, id: i64, refresh: bool) -> Result<Host> {
        let (host, provider) = self.load(id).await?;
        if !refresh {
            return Ok(host);
        }
        self.engine.refresh(provider.as_ref(), &host).await
    }

    /// Push credential metadata onto the host's unit.
    pub async fn update_host_metadata(&self, id: i64) -> Result<()> {
        let (host, provider) = self.load(id).await?;
        self.engine.update_metadata(provider.as_ref(), &host).await
    }

    /// Reserve a static IP for `group`.
    pub async fn create_static_ip(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
        name: &str,
    ) -> Result<StaticIp> {
        if name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        // Static IPs do not depend on the engine.
        let provider = self.registry.build(provider, environment, "")?;
        self.engine
            .create_static_ip(provider.as_ref(), group, name)
            .await
    }

    /// Release a static IP. Returns whether a record was removed.
    pub async fn destroy_static_ip(
        &self,
        provider: &str,
        environment: &str,
        name: &str,
    ) -> Result<bool> {
        let provider = self.registry.build(provider, environment, "")?;
        self.engine.destroy_static_ip(provider.as_ref(), name).await
    }

    /// Create a service account named `name`; returns the vendor identifier.
    pub async fn create_service_account(
        &self,
        provider: &str,
        environment: &str,
        name: &str,
    ) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        let provider = self.registry.build(provider, environment, "")?;
        self.engine
            .create_service_account(provider.as_ref(), name)
            .await
    }

    /// Delete a service account. An absent account is success.
    pub async fn destroy_service_account(
        &self,
        provider: &str,
        environment: &str,
        account: &str,
    ) -> Result<()> {
        let provider = self.registry.build(provider, environment, "")?;
        self.engine
            .destroy_service_account(provider.as_ref(), account)
            .await
    }

    /// Grant the credential's roles to a service account.
    pub async fn set_service_account_roles(
        &self,
        provider: &str,
        environment: &str,
        account: &str,
    ) -> Result<()> {
        let provider = self.registry.build(provider, environment, "")?;
        self.engine
            .set_service_account_roles(provider.as_ref(), account)
            .await
    }

    /// Validate and store a credential document.
    pub async fn credential_add(
        &self,
        provider: &str,
        environment: &str,
        content: &Map<String, Value>,
    ) -> Result<()> {
        self.registry.factory(provider)?.validate_credential(content)?;
        self.stores
            .credentials
            .upsert(provider, environment, content)
            .await?;

        info!(provider, environment, "Credential stored");
        Ok(())
    }

    /// Stored credential document.
    pub async fn credential_get(
        &self,
        provider: &str,
        environment: &str,
    ) -> Result<Map<String, Value>> {
        self.stores
            .credentials
            .get(provider, environment)
            .await?
            .ok_or_else(|| Error::not_found("credential", format!("{provider}/{environment}")))
    }

    /// Delete a credential document.
    pub async fn credential_delete(&self, provider: &str, environment: &str) -> Result<()> {
        if !self.stores.credentials.delete(provider, environment).await? {
            return Err(Error::not_found(
                "credential",
                format!("{provider}/{environment}"),
            ));
        }
        info!(provider, environment, "Credential deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateHostRequest {
        CreateHostRequest {
            provider: "mock".to_string(),
            environment: "dev".to_string(),
            cpu: 1,
            memory: 1024,
            name: "h1".to_string(),
            group: "g".to_string(),
            engine: "mongodb_4_2_3".to_string(),
            zone: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_create_request_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.name = "  ".to_string();
        assert!(matches!(
            bad.validate(),
            Err(Error::Validation { ref field, .. }) if field == "name"
        ));

        let mut bad = request();
        bad.memory = -1;
        assert!(bad.validate().is_err());

        let mut bad = request();
        bad.zone = Some(String::new());
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_create_request_deserializes_with_defaults() {
        let request: CreateHostRequest = serde_json::from_value(serde_json::json!({
            "provider": "gce",
            "environment": "prod",
            "cpu": 2,
            "memory": 4096,
            "name": "db-1",
            "group": "infra-1",
            "engine": "mongodb_4_2_3"
        }))
        .unwrap();

        assert_eq!(request.zone, None);
        assert!(request.extra.is_empty());
    }
}
