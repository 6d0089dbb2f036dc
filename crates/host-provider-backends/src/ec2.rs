// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! EC2 back-end.
//!
//! Zones are the credential's `subnets` (`{"subnet-1": {"active": true}}`).
//! Sizes come from the vendor catalogue rather than the credential. Other
//! fields: `access_id`, `secret_key`, `region`, `image_id`,
//! `security_group_id`, `templates`, and optionally `keyname`.

use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::Credential;
use host_provider_core::model::engine_name;
use host_provider_core::{
    CreateRequest, Error, Host, PowerState, Provider, ProviderContext, ProviderFactory, Readiness,
    RestoreStrategy, Result, VendorUnit, Zone,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::compute::{
    ComputeConnector, ComputeHandle, InstanceSpec, delete_if_present, find_live_instance,
    instance_exists, labels, offering_from_catalogue, readiness, vendor_unit,
};

/// Back-end identifier.
pub const PROVIDER_ID: &str = "ec2";

const ZONE_FIELD: &str = "subnets";

/// Builds [`Ec2Provider`]s.
pub struct Ec2Factory {
    connector: Arc<dyn ComputeConnector>,
}

impl Ec2Factory {
    /// Factory connecting through `connector`.
    pub fn new(connector: Arc<dyn ComputeConnector>) -> Self {
        Self { connector }
    }
}

impl ProviderFactory for Ec2Factory {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn build(
        &self,
        environment: &str,
        engine: &str,
        context: &ProviderContext,
    ) -> Box<dyn Provider> {
        Box::new(Ec2Provider {
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
}

/// EC2 provider.
pub struct Ec2Provider {
    environment: String,
    engine: String,
    handle: ComputeHandle,
}

#[async_trait]
impl Provider for Ec2Provider {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn engine(&self) -> &str {
        &self.engine
    }

    fn restore_strategy(&self) -> RestoreStrategy {
        RestoreStrategy::InPlace
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

        if let Some(existing) =
            find_live_instance(api, &request.name, request.zone.as_deref()).await?
        {
            return Ok(vendor_unit(existing, true));
        }

        let subnet = request
            .zone
            .clone()
            .ok_or_else(|| Error::validation("zone", "required"))?;
        let offering = offering_from_catalogue(api, request.cpu, request.memory).await?;

        let spec = InstanceSpec {
            name: request.name.clone(),
            zone: Some(subnet),
            offering: offering.id,
            image: credential.str_field("image_id")?.to_string(),
            security_groups: vec![credential.str_field("security_group_id")?.to_string()],
            project: credential.opt_str("keyname").map(str::to_string),
            labels: labels(
                self.handle.settings(),
                [
                    ("engine", engine_name(&self.engine)),
                    ("group", request.group.as_str()),
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

    async fn restore(&self, host: &Host, engine: &str, _extra: &Map<String, Value>) -> Result<()> {
        let template = self.credential().await?.template_to(engine)?;
        let api = self.handle.client().await?;
        api.rebuild_instance(&host.identifier, template).await?;

        info!(host_id = ?host.id, template, "Restoring image");
        Ok(())
    }

    async fn refresh_metadata(&self, host: &mut Host) -> Result<()> {
        let api = self.handle.client().await?;
        host.address = api.get_instance(&host.identifier).await?.address;
        Ok(())
    }
}
