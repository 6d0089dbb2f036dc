// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GCE back-end.
//!
//! Replicas of one group are spread with anti-collocation over the
//! credential's `availability_zones`; a zone that fails create is retried on
//! the next candidate (three attempts). Every host needs an internal address
//! reserved beforehand, and restore recreates the VM on that address.
//!
//! Credential fields: `project`, `region`, `subnetwork`, `network_tag`,
//! `template_project`, `templates`, `offerings`, `availability_zones` and an
//! optional `metadata` object pushed onto instances.
//!
//! Service accounts get their roles through the directory group named by
//! `group_id` when the credential has one. Otherwise a grant request listing
//! `roles` is published to the `pubsub` topic and the project's IAM policy is
//! polled until every role shows the account.

use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::Credential;
use host_provider_core::model::engine_name;
use host_provider_core::{
    CreateRequest, Error, Host, PlacementStrategy, PowerState, Provider, ProviderContext,
    ProviderFactory, Readiness, Result, RoleGrant, VendorUnit, Zone,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::compute::{
    AddressSpec, ComputeConnector, ComputeHandle, InstanceSpec, delete_if_present,
    find_live_instance, instance_exists, labels, readiness, vendor_unit,
};

/// Back-end identifier.
pub const PROVIDER_ID: &str = "gce";

const ZONE_FIELD: &str = "availability_zones";

/// Builds [`GceProvider`]s.
pub struct GceFactory {
    connector: Arc<dyn ComputeConnector>,
}

impl GceFactory {
    /// Factory connecting through `connector`.
    pub fn new(connector: Arc<dyn ComputeConnector>) -> Self {
        Self { connector }
    }
}

impl ProviderFactory for GceFactory {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn build(
        &self,
        environment: &str,
        engine: &str,
        context: &ProviderContext,
    ) -> Box<dyn Provider> {
        Box::new(GceProvider {
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

/// GCE provider.
pub struct GceProvider {
    environment: String,
    engine: String,
    handle: ComputeHandle,
}

/// Roles listed under `roles` in the credential.
fn credential_roles(credential: &Credential) -> Result<Vec<String>> {
    credential
        .field("roles")?
        .as_array()
        .and_then(|roles| {
            roles
                .iter()
                .map(|role| role.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .filter(|roles| !roles.is_empty())
        .ok_or_else(|| Error::validation("roles", "must be a non-empty list of strings"))
}

/// Machine type path of an offering in a zone.
fn machine_type(offering: &str, zone: &str) -> String {
    format!("zones/{zone}/machineTypes/{offering}")
}

impl GceProvider {
    fn image(&self, credential: &Credential) -> Result<String> {
        Ok(format!(
            "projects/{}/global/images/{}",
            credential.str_field("template_project")?,
            credential.template_to(&self.engine)?
        ))
    }
}

#[async_trait]
impl Provider for GceProvider {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn engine(&self) -> &str {
        &self.engine
    }

    fn create_attempts(&self) -> usize {
        3
    }

    fn default_placement(&self) -> PlacementStrategy {
        PlacementStrategy::AntiCollocation
    }

    fn requires_static_ip(&self) -> bool {
        true
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

        // A previous attempt may have landed in any zone.
        for zone in credential.zone_table(ZONE_FIELD)? {
            let found = find_live_instance(api, &request.name, Some(&zone.name)).await?;
            if let Some(existing) = found {
                debug!(name = %request.name, zone = %zone.name, "Instance found");
                return Ok(vendor_unit(existing, true));
            }
        }

        let zone = request
            .zone
            .as_deref()
            .ok_or_else(|| Error::validation("zone", "required"))?;
        let static_ip = request
            .static_ip
            .as_ref()
            .ok_or_else(|| Error::not_found("static_ip", &request.name))?;
        let offering = credential.offering_to(request.cpu, request.memory)?;

        let spec = InstanceSpec {
            name: request.name.clone(),
            zone: Some(zone.to_string()),
            offering: machine_type(offering, zone),
            image: self.image(credential)?,
            networks: vec![credential.str_field("subnetwork")?.to_string()],
            security_groups: vec![credential.str_field("network_tag")?.to_string()],
            address: Some(static_ip.address.clone()),
            project: Some(credential.str_field("project")?.to_string()),
            labels: labels(
                self.handle.settings(),
                [
                    ("engine", engine_name(&self.engine)),
                    ("infra_name", request.group.as_str()),
                ],
            ),
            metadata: credential.metadata_items(),
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
        let zone = host
            .zone
            .as_deref()
            .ok_or_else(|| Error::validation("zone", "host has no zone"))?;
        let offering = self.credential().await?.offering_to(cpu, memory)?;
        let api = self.handle.client().await?;
        Ok(api
            .resize_instance(&host.identifier, &machine_type(offering, zone))
            .await?)
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

    async fn update_metadata(&self, host: &Host) -> Result<()> {
        let items = self.credential().await?.metadata_items();
        let api = self.handle.client().await?;
        api.set_metadata(&host.identifier, &items).await?;

        info!(host_id = ?host.id, items = items.len(), "Instance metadata set");
        Ok(())
    }

    async fn reserve_static_ip(&self, group: &str, name: &str) -> Result<String> {
        let credential = self.credential().await?;
        let spec = AddressSpec {
            name: name.to_string(),
            region: Some(credential.str_field("region")?.to_string()),
            subnetwork: Some(credential.str_field("subnetwork")?.to_string()),
        };

        let address = self.handle.client().await?.reserve_address(&spec).await?;
        info!(group, name, address = %address, "Internal address reserved");
        Ok(address)
    }

    async fn release_static_ip(&self, name: &str) -> Result<()> {
        match self.handle.client().await?.release_address(name).await {
            Err(e) if e.not_found => Ok(()),
            other => Ok(other?),
        }
    }

    async fn create_service_account(&self, name: &str) -> Result<String> {
        let project = self.credential().await?.str_field("project")?;
        let api = self.handle.client().await?;
        Ok(api.create_service_account(project, name).await?)
    }

    async fn destroy_service_account(&self, account: &str) -> Result<()> {
        let api = self.handle.client().await?;
        match api.delete_service_account(account).await {
            Err(e) if e.not_found => Ok(()),
            other => Ok(other?),
        }
    }

    async fn grant_service_account_roles(&self, account: &str) -> Result<RoleGrant> {
        let credential = self.credential().await?;
        let api = self.handle.client().await?;

        if let Some(group_id) = credential.opt_str("group_id") {
            let group = api.lookup_group(group_id).await?;
            api.add_group_member(&group, account).await?;
            info!(account, group = %group, "Service account added to group");
            return Ok(RoleGrant::Applied);
        }

        let project = credential.str_field("project")?;
        let topic = format!("projects/{project}/topics/{}", credential.str_field("pubsub")?);
        let roles = credential_roles(credential)?;
        let attributes = [
            ("project".to_string(), project.to_string()),
            ("roles".to_string(), Value::from(roles).to_string()),
            ("service_account".to_string(), account.to_string()),
        ];
        api.publish(&topic, &attributes).await?;

        debug!(account, topic = %topic, "Role grant requested");
        Ok(RoleGrant::Requested)
    }

    async fn service_account_has_roles(&self, account: &str) -> Result<bool> {
        let credential = self.credential().await?;
        let roles = credential_roles(credential)?;
        let member = format!("serviceAccount:{account}");
        let bindings = self
            .handle
            .client()
            .await?
            .iam_bindings(credential.str_field("project")?)
            .await?;

        Ok(roles.iter().all(|role| {
            bindings
                .iter()
                .any(|b| &b.role == role && b.members.contains(&member))
        }))
    }
}
