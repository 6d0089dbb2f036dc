// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider capability interface.
//!
//! Every compute back-end implements [`Provider`]. The lifecycle engine only
//! talks to vendors through it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::allocator::PlacementStrategy;
use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::model::{Host, StaticIp, Zone};

/// Fixed-interval, bounded-attempt polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between polls.
    pub interval: Duration,
    /// Maximum number of polls.
    pub attempts: u32,
}

impl PollPolicy {
    /// Readiness after create: 100 polls, 3 seconds apart.
    pub const READY: Self = Self::new(Duration::from_secs(3), 100);
    /// Power state after start/stop.
    pub const POWER: Self = Self::new(Duration::from_secs(3), 40);
    /// Old unit gone during restore.
    pub const GONE: Self = Self::new(Duration::from_secs(3), 100);
    /// Requested service account roles visible.
    pub const ROLES: Self = Self::new(Duration::from_secs(3), 33);

    /// Build a policy.
    pub const fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// No sleeping between polls; for tests.
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(Duration::ZERO, attempts)
    }
}

/// How a back-end restores a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStrategy {
    /// Destroy and create again under the same name, guarded by `Host::recreating`.
    Recreate,
    /// The vendor rebuilds the unit from the engine template, keeping its identity.
    InPlace,
}

/// Vendor-reported power state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    /// Running.
    Running,
    /// Stopped.
    Stopped,
    /// Between states.
    Pending,
    /// Anything else the vendor reports.
    Other(String),
}

impl PowerState {
    /// Lowercase name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Pending => "pending",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one readiness probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Whether the unit accepts work.
    pub ready: bool,
    /// Engine version reported by the unit, when known.
    pub version: Option<String>,
}

impl Readiness {
    /// Ready, without a version.
    pub fn ready() -> Self {
        Self {
            ready: true,
            version: None,
        }
    }

    /// Not ready yet.
    pub fn not_ready() -> Self {
        Self::default()
    }
}

/// Outcome of asking the vendor to grant service account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleGrant {
    /// The roles are in effect.
    Applied,
    /// The grant was handed off; poll [`Provider::service_account_has_roles`].
    Requested,
}

/// What the lifecycle engine asks a back-end to create.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Unit name; back-ends dedupe on it.
    pub name: String,
    /// Group of the host.
    pub group: String,
    /// Virtual CPUs.
    pub cpu: i32,
    /// Memory in megabytes.
    pub memory: i32,
    /// Placement zone, `None` for unzoned back-ends.
    pub zone: Option<String>,
    /// Reserved address to attach.
    pub static_ip: Option<StaticIp>,
    /// Back-end specific caller options.
    pub extra: Map<String, Value>,
}

/// A unit as reported by the vendor after create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorUnit {
    /// Vendor identifier.
    pub identifier: String,
    /// Network address.
    pub address: String,
    /// Zone the vendor put the unit in, when it reports one.
    pub zone: Option<String>,
    /// The unit existed before this call (idempotent replay).
    pub existing: bool,
}

/// Capability interface of a compute back-end.
///
/// One instance serves one (provider, environment, engine) and is request
/// scoped. Vendor clients and the credential are built lazily and memoized.
/// Implementations must not keep process-global state.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable back-end identifier (e.g. "gce", "k8s").
    fn provider_id(&self) -> &'static str;

    /// Environment this instance serves.
    fn environment(&self) -> &str;

    /// Engine this instance was built for.
    fn engine(&self) -> &str;

    /// Create attempts, each with the next placement candidate.
    fn create_attempts(&self) -> usize {
        1
    }

    /// Placement used unless the credential overrides it.
    fn default_placement(&self) -> PlacementStrategy {
        PlacementStrategy::RoundRobin
    }

    /// How [`Provider::restore`] or the recreate sequence is used.
    fn restore_strategy(&self) -> RestoreStrategy {
        RestoreStrategy::Recreate
    }

    /// Whether create needs a static IP reserved for the host name first.
    fn requires_static_ip(&self) -> bool {
        false
    }

    /// Readiness budget after create.
    fn ready_policy(&self) -> PollPolicy {
        PollPolicy::READY
    }

    /// Power-state budget after start/stop.
    fn power_policy(&self) -> PollPolicy {
        PollPolicy::POWER
    }

    /// Budget for the old unit to disappear during restore.
    fn gone_policy(&self) -> PollPolicy {
        PollPolicy::GONE
    }

    /// Budget for requested service account roles to show up.
    fn role_policy(&self) -> PollPolicy {
        PollPolicy::ROLES
    }

    /// Credential view, loaded on first use.
    async fn credential(&self) -> Result<&Credential>;

    /// Zone table of the credential. Unzoned back-ends return nothing.
    async fn zones(&self) -> Result<Vec<Zone>> {
        Ok(Vec::new())
    }

    /// Effective placement strategy.
    async fn placement(&self) -> Result<PlacementStrategy> {
        let default = self.default_placement();
        if default == PlacementStrategy::Unzoned {
            return Ok(default);
        }
        Ok(self
            .credential()
            .await?
            .placement_override()?
            .unwrap_or(default))
    }

    /// Create the unit, or return the existing one with the same name.
    async fn create(&self, request: &CreateRequest) -> Result<VendorUnit>;

    /// Power on.
    async fn start(&self, host: &Host) -> Result<()>;

    /// Power off.
    async fn stop(&self, host: &Host) -> Result<()>;

    /// Current power state.
    async fn power_state(&self, host: &Host) -> Result<PowerState>;

    /// Change capacity.
    async fn resize(&self, host: &Host, cpu: i32, memory: i32) -> Result<()>;

    /// Delete the unit. An already absent unit is success.
    async fn destroy(&self, host: &Host) -> Result<()>;

    /// Whether the vendor still knows the unit.
    async fn exists(&self, host: &Host) -> Result<bool>;

    /// One readiness probe.
    async fn is_ready(&self, host: &Host) -> Result<Readiness>;

    /// Rebuild the unit in place from the engine template.
    async fn restore(&self, host: &Host, engine: &str, extra: &Map<String, Value>) -> Result<()> {
        let _ = (host, engine, extra);
        Err(Error::unsupported(self.provider_id(), "in-place restore"))
    }

    /// Refresh vendor-owned fields (address) of `host`.
    async fn refresh_metadata(&self, host: &mut Host) -> Result<()> {
        let _ = host;
        Ok(())
    }

    /// Push credential metadata onto the unit.
    async fn update_metadata(&self, host: &Host) -> Result<()> {
        let _ = host;
        Err(Error::unsupported(self.provider_id(), "metadata update"))
    }

    /// Reserve an address named `name` for `group`. Reserving an existing name returns it.
    async fn reserve_static_ip(&self, group: &str, name: &str) -> Result<String> {
        let _ = (group, name);
        Err(Error::unsupported(self.provider_id(), "static IP"))
    }

    /// Release a reserved address. An absent reservation is success.
    async fn release_static_ip(&self, name: &str) -> Result<()> {
        let _ = name;
        Err(Error::unsupported(self.provider_id(), "static IP"))
    }

    /// Create a service account named `name` and return its vendor identifier.
    async fn create_service_account(&self, name: &str) -> Result<String> {
        let _ = name;
        Err(Error::unsupported(self.provider_id(), "service account"))
    }

    /// Delete a service account. An absent account is success.
    async fn destroy_service_account(&self, account: &str) -> Result<()> {
        let _ = account;
        Err(Error::unsupported(self.provider_id(), "service account"))
    }

    /// Grant the credential's roles to `account`.
    async fn grant_service_account_roles(&self, account: &str) -> Result<RoleGrant> {
        let _ = account;
        Err(Error::unsupported(self.provider_id(), "service account"))
    }

    /// Whether `account` holds every role the credential lists.
    async fn service_account_has_roles(&self, account: &str) -> Result<bool> {
        let _ = account;
        Err(Error::unsupported(self.provider_id(), "service account"))
    }
}
