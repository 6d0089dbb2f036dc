// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host lifecycle engine.
//!
//! Sequences placement, vendor calls, readiness polling and persistence for
//! every caller-facing operation. Each call runs to completion within one
//! request; there is no background work.
//!
//! # Create
//!
//! ```text
//! PLACING ──► CREATING ──► AWAITING_READY ──► PERSISTED
//!    ▲            │
//!    └────────────┘ retryable vendor error, attempts left
//! ```
//!
//! A readiness timeout fails the request and leaves the unit in place.
//!
//! # Restore
//!
//! For [`RestoreStrategy::Recreate`] back-ends the old unit is destroyed and
//! `recreating = true` is persisted before anything else happens. A restore
//! that finds the flag already set skips the destroy and resumes at the
//! wait-until-gone step.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::allocator::{Placement, PlacementStrategy, ZoneAllocator};
use crate::error::{Error, Result};
use crate::model::{Host, StaticIp};
use crate::persistence::{HostStore, StaticIpStore, Stores, ZoneLedger};
use crate::provider::{
    CreateRequest, PollPolicy, PowerState, Provider, Readiness, RestoreStrategy, RoleGrant,
    VendorUnit,
};

/// Caller key naming the static IP reservation to attach.
pub const STATIC_IP_KEY: &str = "static_ip_id";

/// What to create.
#[derive(Debug, Clone)]
pub struct HostSpec {
    /// Unit name.
    pub name: String,
    /// Group.
    pub group: String,
    /// Virtual CPUs.
    pub cpu: i32,
    /// Memory in megabytes.
    pub memory: i32,
    /// Zone override; bypasses the ledger.
    pub zone: Option<String>,
    /// Back-end specific options.
    pub extra: Map<String, Value>,
}

/// Lifecycle engine over the host, ledger and static IP stores.
#[derive(Clone)]
pub struct LifecycleEngine {
    hosts: Arc<dyn HostStore>,
    ledger: Arc<dyn ZoneLedger>,
    static_ips: Arc<dyn StaticIpStore>,
    poll_override: Option<PollPolicy>,
}

impl LifecycleEngine {
    /// Engine over `stores`.
    pub fn new(stores: &Stores) -> Self {
        Self {
            hosts: stores.hosts.clone(),
            ledger: stores.ledger.clone(),
            static_ips: stores.static_ips.clone(),
            poll_override: None,
        }
    }

    /// Use `policy` for every poll loop instead of the back-end's budgets.
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_override = Some(policy);
        self
    }

    async fn allocator(&self, provider: &dyn Provider) -> Result<ZoneAllocator> {
        let strategy = provider.placement().await?;
        let zones = match strategy {
            PlacementStrategy::Unzoned => Vec::new(),
            _ => provider.zones().await?,
        };
        Ok(ZoneAllocator::new(
            self.ledger.clone(),
            provider.provider_id(),
            provider.environment(),
            &zones,
            strategy,
        ))
    }

    /// Live hosts of `group` on the same (provider, environment).
    async fn group_members(&self, provider: &dyn Provider, group: &str) -> Result<Vec<Host>> {
        Ok(self
            .hosts
            .filter(group)
            .await?
            .into_iter()
            .filter(|h| {
                h.provider == provider.provider_id() && h.environment == provider.environment()
            })
            .collect())
    }

    /// Load a host record.
    pub async fn get(&self, id: i64) -> Result<Host> {
        self.hosts
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("host", id))
    }

    /// Create a host, or return the existing record for the same name.
    pub async fn create(&self, provider: &dyn Provider, spec: &HostSpec) -> Result<Host> {
        if let Some(existing) = self
            .hosts
            .find_by_name(provider.provider_id(), provider.environment(), &spec.name)
            .await?
        {
            if existing.group != spec.group {
                return Err(Error::validation(
                    "name",
                    format!(
                        "host '{}' already belongs to group '{}'",
                        spec.name, existing.group
                    ),
                ));
            }
            info!(host_id = ?existing.id, name = %spec.name, "Host already exists");
            return Ok(existing);
        }

        let allocator = self.allocator(provider).await?;
        let occupied: Vec<String> = self
            .group_members(provider, &spec.group)
            .await?
            .into_iter()
            .filter_map(|h| h.zone)
            .collect();

        let static_ip = self.static_ip_for_create(provider, spec).await?;
        let (unit, placement) = self
            .create_unit(provider, &allocator, spec, &occupied, static_ip.clone())
            .await?;

        let now = Utc::now();
        let host = Host {
            id: None,
            name: spec.name.clone(),
            group: spec.group.clone(),
            engine: provider.engine().to_string(),
            environment: provider.environment().to_string(),
            cpu: spec.cpu,
            memory: spec.memory,
            provider: provider.provider_id().to_string(),
            identifier: unit.identifier,
            address: unit.address,
            zone: unit.zone.or(placement.zone),
            recreating: false,
            created_at: now,
            updated_at: now,
        };

        self.wait_ready(provider, &host).await?;

        if allocator.strategy() != PlacementStrategy::Unzoned
            && let Some(zone) = &host.zone
        {
            allocator.after_create(&spec.group, zone).await?;
        }

        let host = self.hosts.save(&host).await?;
        if let (Some(ip), Some(id)) = (&static_ip, host.id) {
            self.static_ips.bind(&ip.name, id).await?;
        }

        info!(
            host_id = ?host.id,
            name = %host.name,
            group = %host.group,
            zone = ?host.zone,
            identifier = %host.identifier,
            "Host created"
        );
        Ok(host)
    }

    async fn static_ip_for_create(
        &self,
        provider: &dyn Provider,
        spec: &HostSpec,
    ) -> Result<Option<StaticIp>> {
        let name = spec
            .extra
            .get(STATIC_IP_KEY)
            .and_then(Value::as_str)
            .unwrap_or(&spec.name);

        let Some(ip) = self.static_ips.get_by_name(name).await? else {
            if provider.requires_static_ip() {
                return Err(Error::not_found("static_ip", name));
            }
            return Ok(None);
        };

        if ip.group != spec.group {
            return Err(Error::validation(
                "static_ip",
                format!("static IP '{}' is reserved for group '{}'", ip.name, ip.group),
            ));
        }
        if let Some(host_id) = ip.host_id
            && self.hosts.get(host_id).await?.is_some()
        {
            return Err(Error::validation(
                "static_ip",
                format!("static IP '{}' is bound to host {host_id}", ip.name),
            ));
        }
        Ok(Some(ip))
    }

    /// PLACING and CREATING, looping on retryable vendor errors.
    async fn create_unit(
        &self,
        provider: &dyn Provider,
        allocator: &ZoneAllocator,
        spec: &HostSpec,
        occupied: &[String],
        static_ip: Option<StaticIp>,
    ) -> Result<(VendorUnit, Placement)> {
        let budget = provider.create_attempts().max(1);
        let mut attempt = 0;
        let mut tries = 0;
        let mut last_error = None;

        loop {
            let placement = match allocator
                .before_create(&spec.group, spec.zone.as_deref(), occupied, attempt)
                .await
            {
                Ok(placement) => placement,
                // Out of zones after a vendor failure: report the vendor error.
                Err(e @ Error::PlacementExhausted { .. }) => return Err(last_error.unwrap_or(e)),
                Err(e) => return Err(e),
            };
            tries += 1;

            let request = CreateRequest {
                name: spec.name.clone(),
                group: spec.group.clone(),
                cpu: spec.cpu,
                memory: spec.memory,
                zone: placement.zone.clone(),
                static_ip: static_ip.clone(),
                extra: spec.extra.clone(),
            };

            info!(
                name = %spec.name,
                group = %spec.group,
                zone = ?placement.zone,
                attempt = placement.attempt,
                "Creating unit"
            );

            match provider.create(&request).await {
                Ok(unit) => {
                    if unit.existing {
                        info!(
                            name = %spec.name,
                            identifier = %unit.identifier,
                            "Unit already existed"
                        );
                    }
                    return Ok((unit, placement));
                }
                Err(e) if e.is_retryable() && tries < budget => {
                    warn!(
                        name = %spec.name,
                        zone = ?placement.zone,
                        attempt = placement.attempt,
                        error = %e,
                        "Create failed, trying next placement"
                    );
                    attempt = placement.attempt + 1;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// AWAITING_READY. Vendor errors count as a not-ready probe.
    async fn wait_ready(&self, provider: &dyn Provider, host: &Host) -> Result<Readiness> {
        let policy = self.poll_override.unwrap_or(provider.ready_policy());

        for attempt in 1..=policy.attempts {
            match provider.is_ready(host).await {
                Ok(readiness) if readiness.ready => {
                    debug!(name = %host.name, attempt, version = ?readiness.version, "Unit ready");
                    return Ok(readiness);
                }
                Ok(_) => debug!(name = %host.name, attempt, "Unit not ready"),
                Err(Error::Vendor(e)) => {
                    warn!(name = %host.name, attempt, error = %e, "Readiness probe failed")
                }
                Err(e) => return Err(e),
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(Error::ReadinessTimeout {
            name: host.name.clone(),
            zone: host.zone.clone(),
            attempts: policy.attempts,
        })
    }

    /// Destroy the unit and the record; the last host of a group clears its ledger row.
    pub async fn destroy(&self, provider: &dyn Provider, host: &Host) -> Result<()> {
        self.destroy_unit(provider, host).await?;

        if let Some(id) = host.id {
            self.hosts.delete(id).await?;
        }

        let remaining = self
            .group_members(provider, &host.group)
            .await?
            .iter()
            .filter(|h| h.id != host.id)
            .count();

        info!(host_id = ?host.id, name = %host.name, remaining, "Host destroyed");

        if remaining == 0 {
            ZoneAllocator::new(
                self.ledger.clone(),
                provider.provider_id(),
                provider.environment(),
                &[],
                PlacementStrategy::default(),
            )
            .remove_group(&host.group)
            .await?;
        }
        Ok(())
    }

    async fn destroy_unit(&self, provider: &dyn Provider, host: &Host) -> Result<()> {
        match provider.destroy(host).await {
            Err(e) if e.is_vendor_not_found() => {
                debug!(name = %host.name, "Unit already gone");
                Ok(())
            }
            other => other,
        }
    }

    /// Power on and wait for the running state.
    pub async fn start(&self, provider: &dyn Provider, host: &Host) -> Result<()> {
        provider.start(host).await?;
        self.wait_power(provider, host, PowerState::Running).await
    }

    /// Power off and wait for the stopped state.
    pub async fn stop(&self, provider: &dyn Provider, host: &Host) -> Result<()> {
        provider.stop(host).await?;
        self.wait_power(provider, host, PowerState::Stopped).await
    }

    async fn wait_power(
        &self,
        provider: &dyn Provider,
        host: &Host,
        target: PowerState,
    ) -> Result<()> {
        let policy = self.poll_override.unwrap_or(provider.power_policy());
        let mut last = PowerState::Pending;

        for attempt in 1..=policy.attempts {
            last = provider.power_state(host).await?;
            if last == target {
                info!(host_id = ?host.id, state = %target, "Power state reached");
                return Ok(());
            }
            debug!(host_id = ?host.id, attempt, state = %last, "Waiting for power state");
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(Error::UnexpectedState {
            expected: target.to_string(),
            actual: last.to_string(),
        })
    }

    /// Change capacity. Unchanged capacity makes no vendor call.
    pub async fn resize(
        &self,
        provider: &dyn Provider,
        host: &Host,
        cpu: i32,
        memory: i32,
    ) -> Result<Host> {
        if cpu <= 0 {
            return Err(Error::validation("cpu", "must be positive"));
        }
        if memory <= 0 {
            return Err(Error::validation("memory", "must be positive"));
        }
        if host.cpu == cpu && host.memory == memory {
            debug!(host_id = ?host.id, "Resize is a no-op");
            return Ok(host.clone());
        }

        provider.resize(host, cpu, memory).await?;

        let mut resized = host.clone();
        resized.cpu = cpu;
        resized.memory = memory;
        let resized = self.hosts.save(&resized).await?;

        info!(host_id = ?host.id, cpu, memory, "Host resized");
        Ok(resized)
    }

    /// Restore the unit to the provider's engine.
    pub async fn restore(
        &self,
        provider: &dyn Provider,
        host: &Host,
        extra: &Map<String, Value>,
    ) -> Result<Host> {
        match provider.restore_strategy() {
            RestoreStrategy::InPlace => self.restore_in_place(provider, host, extra).await,
            RestoreStrategy::Recreate => self.recreate(provider, host, extra).await,
        }
    }

    async fn restore_in_place(
        &self,
        provider: &dyn Provider,
        host: &Host,
        extra: &Map<String, Value>,
    ) -> Result<Host> {
        provider.restore(host, provider.engine(), extra).await?;
        self.wait_ready(provider, host).await?;

        let mut restored = host.clone();
        restored.engine = provider.engine().to_string();
        let restored = self.hosts.save(&restored).await?;

        info!(host_id = ?host.id, engine = %restored.engine, "Host restored in place");
        Ok(restored)
    }

    async fn recreate(
        &self,
        provider: &dyn Provider,
        host: &Host,
        extra: &Map<String, Value>,
    ) -> Result<Host> {
        let mut host = host.clone();

        if host.recreating {
            info!(host_id = ?host.id, "Resuming restore, old unit already destroyed");
        } else {
            self.destroy_unit(provider, &host).await?;
            host.recreating = true;
            host = self.hosts.save(&host).await?;
            info!(host_id = ?host.id, identifier = %host.identifier, "Old unit destroyed");
        }

        self.wait_gone(provider, &host).await?;

        let static_ip = match host.id {
            Some(id) => self.static_ips.get_by_host(id).await?,
            None => None,
        };
        if static_ip.is_none() && provider.requires_static_ip() {
            return Err(Error::not_found("static_ip", &host.name));
        }

        let request = CreateRequest {
            name: host.name.clone(),
            group: host.group.clone(),
            cpu: host.cpu,
            memory: host.memory,
            zone: host.zone.clone(),
            static_ip,
            extra: extra.clone(),
        };
        let unit = self.create_pinned(provider, &request).await?;

        host.identifier = unit.identifier;
        host.address = unit.address;
        if unit.zone.is_some() {
            host.zone = unit.zone;
        }
        host.engine = provider.engine().to_string();

        self.wait_ready(provider, &host).await?;

        host.recreating = false;
        let host = self.hosts.save(&host).await?;

        info!(
            host_id = ?host.id,
            identifier = %host.identifier,
            engine = %host.engine,
            "Host recreated"
        );
        Ok(host)
    }

    /// Create in a fixed zone, retrying retryable vendor errors.
    async fn create_pinned(
        &self,
        provider: &dyn Provider,
        request: &CreateRequest,
    ) -> Result<VendorUnit> {
        let budget = provider.create_attempts().max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            match provider.create(request).await {
                Err(e) if e.is_retryable() && tries < budget => {
                    warn!(
                        name = %request.name,
                        attempt = tries,
                        error = %e,
                        "Recreate failed, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    async fn wait_gone(&self, provider: &dyn Provider, host: &Host) -> Result<()> {
        let policy = self.poll_override.unwrap_or(provider.gone_policy());

        for attempt in 1..=policy.attempts {
            match provider.exists(host).await {
                Ok(false) => return Ok(()),
                Err(e) if e.is_vendor_not_found() => return Ok(()),
                Ok(true) => debug!(host_id = ?host.id, attempt, "Old unit still present"),
                Err(e) => return Err(e),
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(Error::UnexpectedState {
            expected: "absent".to_string(),
            actual: "present".to_string(),
        })
    }

    /// Re-read vendor-owned fields and persist them.
    pub async fn refresh(&self, provider: &dyn Provider, host: &Host) -> Result<Host> {
        let mut refreshed = host.clone();
        provider.refresh_metadata(&mut refreshed).await?;
        if refreshed == *host {
            return Ok(refreshed);
        }
        self.hosts.save(&refreshed).await
    }

    /// Push credential metadata onto the unit.
    pub async fn update_metadata(&self, provider: &dyn Provider, host: &Host) -> Result<()> {
        provider.update_metadata(host).await?;
        info!(host_id = ?host.id, "Host metadata updated");
        Ok(())
    }

    /// Reserve a static IP named `name` for `group`. An existing reservation is returned as is.
    pub async fn create_static_ip(
        &self,
        provider: &dyn Provider,
        group: &str,
        name: &str,
    ) -> Result<StaticIp> {
        if let Some(existing) = self.static_ips.get_by_name(name).await? {
            return Ok(existing);
        }

        let address = provider.reserve_static_ip(group, name).await?;
        let ip = self
            .static_ips
            .save(&StaticIp {
                id: None,
                name: name.to_string(),
                group: group.to_string(),
                address,
                host_id: None,
            })
            .await?;

        info!(name = %ip.name, group = %ip.group, address = %ip.address, "Static IP reserved");
        Ok(ip)
    }

    /// Release a static IP. Returns whether a record was removed.
    pub async fn destroy_static_ip(&self, provider: &dyn Provider, name: &str) -> Result<bool> {
        if let Some(ip) = self.static_ips.get_by_name(name).await?
            && let Some(host_id) = ip.host_id
        {
            return Err(Error::validation(
                "static_ip",
                format!("'{name}' is bound to host {host_id}"),
            ));
        }

        match provider.release_static_ip(name).await {
            Err(e) if e.is_vendor_not_found() => {}
            other => other?,
        }

        let removed = self.static_ips.delete(name).await?;
        info!(name = %name, removed, "Static IP released");
        Ok(removed)
    }

    /// Create a service account; returns the vendor identifier.
    pub async fn create_service_account(
        &self,
        provider: &dyn Provider,
        name: &str,
    ) -> Result<String> {
        let account = provider.create_service_account(name).await?;
        info!(name = %name, account = %account, "Service account created");
        Ok(account)
    }

    /// Delete a service account. An absent account is success.
    pub async fn destroy_service_account(
        &self,
        provider: &dyn Provider,
        account: &str,
    ) -> Result<()> {
        match provider.destroy_service_account(account).await {
            Err(e) if e.is_vendor_not_found() => {
                debug!(account = %account, "Service account already gone");
            }
            other => other?,
        }
        info!(account = %account, "Service account deleted");
        Ok(())
    }

    /// Grant the credential's roles to `account` and wait until they apply.
    pub async fn set_service_account_roles(
        &self,
        provider: &dyn Provider,
        account: &str,
    ) -> Result<()> {
        if provider.grant_service_account_roles(account).await? == RoleGrant::Applied {
            info!(account = %account, "Service account roles applied");
            return Ok(());
        }

        let policy = self.poll_override.unwrap_or(provider.role_policy());
        for attempt in 1..=policy.attempts {
            if provider.service_account_has_roles(account).await? {
                info!(account = %account, attempt, "Service account roles applied");
                return Ok(());
            }
            debug!(account = %account, attempt, "Service account roles pending");
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(Error::UnexpectedState {
            expected: "roles granted".to_string(),
            actual: "roles missing".to_string(),
        })
    }
}
