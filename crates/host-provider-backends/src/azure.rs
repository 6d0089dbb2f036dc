// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure back-end.
//!
//! Zones are the credential's `subnets`. VM names are restricted by the
//! vendor, so the unit is created under a sanitized form of the host name;
//! the host record keeps the caller's name. Restore recreates the VM.

use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::{Credential, require_active_zones};
use host_provider_core::model::engine_name;
use host_provider_core::{
    CreateRequest, Error, Host, PowerState, Provider, ProviderContext, ProviderFactory, Readiness,
    Result, VendorUnit, Zone,
};
use serde_json::{Map, Value};

use crate::compute::{
    ComputeConnector, ComputeHandle, InstanceSpec, delete_if_present, find_live_instance,
    instance_exists, labels, offering_from_catalogue, readiness, vendor_unit,
};

/// Back-end identifier.
pub const PROVIDER_ID: &str = "azure";

const ZONE_FIELD: &str = "subnets";

const MAX_NAME_LEN: usize = 15;

/// Rejects credentials with fewer active zones than `mimOfSubnets` asks for.
pub fn validate_credential(content: &Map<String, Value>) -> Result<()> {
    require_active_zones(content, ZONE_FIELD, "mimOfSubnets")
}

/// Builds [`AzureProvider`]s.
pub struct AzureFactory {
    connector: Arc<dyn ComputeConnector>,
}

impl AzureFactory {
    /// Factory connecting through `connector`.
    pub fn new(connector: Arc<dyn ComputeConnector>) -> Self {
        Self { connector }
    }
}

impl ProviderFactory for AzureFactory {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn build(
        &self,
        environment: &str,
        engine: &str,
        context: &ProviderContext,
    ) -> Box<dyn Provider> {
        Box::new(AzureProvider {
            environment: environment.to_string(),
            engine: engine.to_string(),
            handle: ComputeHandle::new(
                PROVIDER_ID,
                environment,
                engine,
                context.credentials.clone(),
                self.connector.clone(),
                context.settings.clone(),
            ),
        })
    }

    fn validate_credential(&self, content: &Map<String, Value>) -> Result<()> {
        validate_credential(content)
    }
}

/// Azure provider.
pub struct AzureProvider {
    environment: String,
    engine: String,
    handle: ComputeHandle,
}

/// Vendor-safe VM name: alphanumerics only, at most 15 characters, not all digits.
pub fn sanitize_name(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_NAME_LEN)
        .collect();

    if sanitized.is_empty() {
        return Err(Error::validation("name", "no alphanumeric characters"));
    }
    if sanitized.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::validation("name", "must not be entirely numeric"));
    }
    Ok(sanitized)
}

#[async_trait]
impl Provider for AzureProvider {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn engine(&self) -> &str {
        &self.engine
    }

    async fn credential(&self) -> Result<&Credential> {
        self.handle.credential().await
    }

    async fn zones(&self) -> Result<Vec<Zone>> {
        self.credential().await?.zone_table(ZONE_FIELD)
    }

    async fn create(&self, request: &CreateRequest) -> Result<VendorUnit> {
        let credential = self.credential().await?;
        let api = self.handle.client().await?;
        let vm_name = sanitize_name(&request.name)?;

        if let Some(existing) = find_live_instance(api, &vm_name, None).await? {
            return Ok(vendor_unit(existing, true));
        }

        let subnet = request
            .zone
            .clone()
            .ok_or_else(|| Error::validation("zone", "required"))?;
        let offering = offering_from_catalogue(api, request.cpu, request.memory).await?;

        let spec = InstanceSpec {
            name: vm_name,
            zone: Some(subnet),
            offering: offering.id,
            image: credential.template_to(&self.engine)?.to_string(),
            project: Some(credential.str_field("resource_group")?.to_string()),
            labels: labels(
                self.handle.settings(),
                [
                    ("engine", engine_name(&self.engine)),
                    ("group", request.group.as_str()),
                    ("host", request.name.as_str()),
                ],
            ),
            ..InstanceSpec::default()
        };

        Ok(vendor_unit(api.insert_instance(&spec).await?, false))
    }

    async fn start(&self, host: &Host) -> Result<()> {
        let api = self.handle.client().await?;
        Ok(api.start_instance(&host.identifier).await?)
    }

    async fn stop(&self, host: &Host) -> Result<()> {
        let api = self.handle.client().await?;
        Ok(api.stop_instance(&host.identifier).await?)
    }

    async fn power_state(&self, host: &Host) -> Result<PowerState> {
        let api = self.handle.client().await?;
        Ok(api.get_instance(&host.identifier).await?.status.power_state())
    }

    async fn resize(&self, host: &Host, cpu: i32, memory: i32) -> Result<()> {
        let api = self.handle.client().await?;
        let offering = offering_from_catalogue(api, cpu, memory).await?;
        Ok(api.resize_instance(&host.identifier, &offering.id).await?)
    }

    async fn destroy(&self, host: &Host) -> Result<()> {
        let api = self.handle.client().await?;
        delete_if_present(api, &host.identifier).await
    }

    async fn exists(&self, host: &Host) -> Result<bool> {
        instance_exists(self.handle.client().await?, &host.identifier).await
    }

    async fn is_ready(&self, host: &Host) -> Result<Readiness> {
        let api = self.handle.client().await?;
        Ok(readiness(&api.get_instance(&host.identifier).await?))
    }

    async fn refresh_metadata(&self, host: &mut Host) -> Result<()> {
        let api = self.handle.client().await?;
        host.address = api.get_instance(&host.identifier).await?.address;
        Ok(())
    }
}
