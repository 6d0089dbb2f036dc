// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Narrow seam over VM-style compute APIs.
//!
//! CloudStack, EC2, GCE and Azure back-ends only talk to their vendor through
//! [`ComputeApi`]. A [`ComputeConnector`] turns a credential into an
//! authenticated handle; the wire protocol behind it is not part of this crate.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::{Credential, LazyCredential};
use host_provider_core::{
    ClientSettings, CredentialStore, PowerState, Readiness, Result, VendorError, VendorUnit,
};
use tokio::sync::OnceCell;

/// Result of a vendor call.
pub type VendorResult<T> = std::result::Result<T, VendorError>;

/// Vendor-reported instance status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Being created.
    Provisioning,
    /// Powered on.
    Running,
    /// Powering off.
    Stopping,
    /// Powered off.
    Stopped,
    /// Being deleted.
    Terminated,
    /// Anything else the vendor reports.
    Other(String),
}

impl InstanceStatus {
    /// Power state as seen by the lifecycle engine.
    pub fn power_state(&self) -> PowerState {
        match self {
            Self::Running => PowerState::Running,
            Self::Stopped => PowerState::Stopped,
            Self::Provisioning | Self::Stopping => PowerState::Pending,
            Self::Terminated => PowerState::Other("terminated".to_string()),
            Self::Other(s) => PowerState::Other(s.clone()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => f.write_str("provisioning"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
            Self::Terminated => f.write_str("terminated"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// A VM as reported by the vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Vendor identifier.
    pub identifier: String,
    /// Instance name.
    pub name: String,
    /// Zone, subnet or location.
    pub zone: Option<String>,
    /// Primary private address.
    pub address: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Size / machine type.
    pub offering: String,
    /// Boot image.
    pub image: String,
    /// Labels or tags.
    pub labels: BTreeMap<String, String>,
    /// Metadata items.
    pub metadata: Vec<(String, String)>,
}

/// Vendor size catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offering {
    /// Vendor size identifier.
    pub id: String,
    /// Virtual CPUs.
    pub cpu: i32,
    /// Memory in megabytes.
    pub memory: i32,
}

/// What to insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Zone, subnet or location.
    pub zone: Option<String>,
    /// Size / machine type.
    pub offering: String,
    /// Boot image.
    pub image: String,
    /// Networks to attach.
    pub networks: Vec<String>,
    /// Security groups or network tags.
    pub security_groups: Vec<String>,
    /// Pre-reserved private address.
    pub address: Option<String>,
    /// Project or resource group.
    pub project: Option<String>,
    /// Labels or tags.
    pub labels: BTreeMap<String, String>,
    /// Metadata items.
    pub metadata: Vec<(String, String)>,
}

/// Address reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpec {
    /// Reservation name.
    pub name: String,
    /// Region the address lives in.
    pub region: Option<String>,
    /// Subnetwork to allocate from.
    pub subnetwork: Option<String>,
}

/// Members holding one IAM role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IamBinding {
    /// Role name.
    pub role: String,
    /// Principals, e.g. `serviceAccount:{email}`.
    pub members: Vec<String>,
}

/// VM-style vendor API.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Instance by name, optionally restricted to one zone. A live instance
    /// wins over a terminated one with the same name.
    async fn find_instance(&self, name: &str, zone: Option<&str>) -> VendorResult<Option<Instance>>;

    /// Instance by identifier. A missing instance is a not-found vendor error.
    async fn get_instance(&self, identifier: &str) -> VendorResult<Instance>;

    /// Create an instance.
    async fn insert_instance(&self, spec: &InstanceSpec) -> VendorResult<Instance>;

    /// Power on.
    async fn start_instance(&self, identifier: &str) -> VendorResult<()>;

    /// Power off.
    async fn stop_instance(&self, identifier: &str) -> VendorResult<()>;

    /// Delete.
    async fn delete_instance(&self, identifier: &str) -> VendorResult<()>;

    /// Change the size.
    async fn resize_instance(&self, identifier: &str, offering: &str) -> VendorResult<()>;

    /// Reinstall the boot disk from `image`, keeping the identifier.
    async fn rebuild_instance(&self, identifier: &str, image: &str) -> VendorResult<()>;

    /// Size catalogue.
    async fn list_offerings(&self) -> VendorResult<Vec<Offering>>;

    /// Reserve an internal address; returns the existing one for a known name.
    async fn reserve_address(&self, spec: &AddressSpec) -> VendorResult<String>;

    /// Release an address reservation.
    async fn release_address(&self, name: &str) -> VendorResult<()>;

    /// Replace the instance metadata.
    async fn set_metadata(&self, identifier: &str, items: &[(String, String)]) -> VendorResult<()>;

    /// Create a service account in `project`; returns its email.
    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
    ) -> VendorResult<String>;

    /// Delete a service account by email.
    async fn delete_service_account(&self, email: &str) -> VendorResult<()>;

    /// Resource name of the directory group with `group_id`.
    async fn lookup_group(&self, group_id: &str) -> VendorResult<String>;

    /// Add `member` to a directory group.
    async fn add_group_member(&self, group: &str, member: &str) -> VendorResult<()>;

    /// Publish a message carrying `attributes` to `topic`.
    async fn publish(&self, topic: &str, attributes: &[(String, String)]) -> VendorResult<()>;

    /// IAM policy bindings of `project`.
    async fn iam_bindings(&self, project: &str) -> VendorResult<Vec<IamBinding>>;
}

/// Builds authenticated [`ComputeApi`] handles.
#[async_trait]
pub trait ComputeConnector: Send + Sync {
    /// Connect to the vendor named `provider` using `credential`.
    async fn connect(
        &self,
        provider: &'static str,
        credential: &Credential,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn ComputeApi>>;
}

/// Credential and client of one compute provider, both built on first use.
pub(crate) struct ComputeHandle {
    provider: &'static str,
    credential: LazyCredential,
    connector: Arc<dyn ComputeConnector>,
    settings: ClientSettings,
    client: OnceCell<Arc<dyn ComputeApi>>,
}

impl ComputeHandle {
    pub(crate) fn new(
        provider: &'static str,
        environment: &str,
        engine: &str,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn ComputeConnector>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            provider,
            credential: LazyCredential::new(credentials, provider, environment, engine),
            connector,
            settings,
            client: OnceCell::new(),
        }
    }

    pub(crate) async fn credential(&self) -> Result<&Credential> {
        self.credential.get().await
    }

    pub(crate) async fn client(&self) -> Result<&dyn ComputeApi> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let credential = self.credential.get().await?;
                tracing::debug!(
                    provider = self.provider,
                    environment = credential.environment(),
                    "Building vendor client"
                );
                self.connector
                    .connect(self.provider, credential, &self.settings)
                    .await
            })
            .await?;
        Ok(client.as_ref())
    }

    pub(crate) fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

/// Delete that treats an already-absent instance as done.
pub(crate) async fn delete_if_present(api: &dyn ComputeApi, identifier: &str) -> Result<()> {
    match api.delete_instance(identifier).await {
        Err(e) if e.not_found => Ok(()),
        other => Ok(other?),
    }
}

/// Instance named `name` that is not being deleted.
pub(crate) async fn find_live_instance(
    api: &dyn ComputeApi,
    name: &str,
    zone: Option<&str>,
) -> Result<Option<Instance>> {
    Ok(api
        .find_instance(name, zone)
        .await?
        .filter(|instance| instance.status != InstanceStatus::Terminated))
}

/// Whether the instance still exists.
pub(crate) async fn instance_exists(api: &dyn ComputeApi, identifier: &str) -> Result<bool> {
    match api.get_instance(identifier).await {
        Ok(instance) => Ok(instance.status != InstanceStatus::Terminated),
        Err(e) if e.not_found => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Catalogue entry with exactly `cpu` and `memory`.
pub(crate) async fn offering_from_catalogue(
    api: &dyn ComputeApi,
    cpu: i32,
    memory: i32,
) -> Result<Offering> {
    api.list_offerings()
        .await?
        .into_iter()
        .find(|o| o.cpu == cpu && o.memory == memory)
        .ok_or_else(|| {
            host_provider_core::Error::not_found("offering", format!("{cpu}c{memory}m"))
        })
}

pub(crate) fn vendor_unit(instance: Instance, existing: bool) -> VendorUnit {
    VendorUnit {
        identifier: instance.identifier,
        address: instance.address,
        zone: instance.zone,
        existing,
    }
}

/// A VM is ready once it runs and has an address.
pub(crate) fn readiness(instance: &Instance) -> Readiness {
    if instance.status == InstanceStatus::Running && !instance.address.is_empty() {
        Readiness::ready()
    } else {
        Readiness::not_ready()
    }
}

/// `origin` label plus the given pairs.
pub(crate) fn labels<'a>(
    settings: &ClientSettings,
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(origin) = &settings.origin_tag {
        labels.insert("origin".to_string(), origin.clone());
    }
    labels
}
