// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CloudStack back-end.
//!
//! Credential fields: `endpoint`, `api_key`, `secret_key`, `secure`,
//! `projectid` (optional), `offerings` (`{"{cpu}c{memory}m": {"id": ...}}`),
//! `templates` (engine to template id) and `zones`, where each zone lists the
//! networks to attach per engine:
//!
//! ```json
//! {"zones": {"zone-a": {"active": true, "networks": {"mongodb_4_2_3": [{"networkId": "net-1"}]}}}}
//! ```
//!
//! Restore rebuilds the VM in place from the engine's template.

use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::{Credential, require_active_zones};
use host_provider_core::model::engine_name;
use host_provider_core::{
    CreateRequest, Error, Host, PowerState, Provider, ProviderContext, ProviderFactory, Readiness,
    RestoreStrategy, Result, VendorUnit, Zone,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::compute::{
    ComputeConnector, ComputeHandle, InstanceSpec, delete_if_present, find_live_instance,
    instance_exists, labels, readiness, vendor_unit,
};

/// Back-end identifier.
pub const PROVIDER_ID: &str = "cloudstack";

const ZONE_FIELD: &str = "zones";

/// Rejects credentials with fewer active zones than `mimOfZones` asks for.
pub fn validate_credential(content: &Map<String, Value>) -> Result<()> {
    require_active_zones(content, ZONE_FIELD, "mimOfZones")
}

/// Builds [`CloudStackProvider`]s.
pub struct CloudStackFactory {
    connector: Arc<dyn ComputeConnector>,
}

impl CloudStackFactory {
    /// Factory connecting through `connector`.
    pub fn new(connector: Arc<dyn ComputeConnector>) -> Self {
        Self { connector }
    }
}

impl ProviderFactory for CloudStackFactory {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn build(
        &self,
        environment: &str,
        engine: &str,
        context: &ProviderContext,
    ) -> Box<dyn Provider> {
        Box::new(CloudStackProvider {
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

/// CloudStack provider.
pub struct CloudStackProvider {
    environment: String,
    engine: String,
    handle: ComputeHandle,
}

/// Network ids configured for `engine` in `zone`.
fn networks(credential: &Credential, zone: &str, engine: &str) -> Result<Vec<String>> {
    let field = format!("{ZONE_FIELD}.{zone}.networks.{engine}");
    let entry = credential
        .zone_table(ZONE_FIELD)?
        .into_iter()
        .find(|z| z.name == zone)
        .ok_or_else(|| Error::validation(&field, "unknown zone"))?;

    let Some(Value::Array(networks)) = entry
        .attributes
        .get("networks")
        .and_then(|n| n.get(engine))
    else {
        return Err(Error::validation(field, "no networks for zone"));
    };

    networks
        .iter()
        .map(|n| {
            n.get("networkId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::validation(&field, "network without networkId"))
        })
        .collect()
}

#[async_trait]
impl Provider for CloudStackProvider {
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

        let zone = request
            .zone
            .as_deref()
            .ok_or_else(|| Error::validation("zone", "required"))?;

        let spec = InstanceSpec {
            name: request.name.clone(),
            zone: Some(zone.to_string()),
            offering: credential
                .offering_to(request.cpu, request.memory)?
                .to_string(),
            image: credential.template()?.to_string(),
            networks: networks(credential, zone, &self.engine)?,
            project: credential.opt_str("projectid").map(str::to_string),
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
        let offering = self.credential().await?.offering_to(cpu, memory)?;
        let api = self.handle.client().await?;
        Ok(api.resize_instance(&host.identifier, offering).await?)
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

        info!(host_id = ?host.id, template, "Rebuilding from template");
        Ok(())
    }

    async fn refresh_metadata(&self, host: &mut Host) -> Result<()> {
        let api = self.handle.client().await?;
        host.address = api.get_instance(&host.identifier).await?.address;
        Ok(())
    }
}
