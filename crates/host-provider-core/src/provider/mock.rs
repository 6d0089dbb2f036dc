// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provider for testing.
//!
//! Keeps vendor units in memory, counts calls and can be scripted to fail
//! creates, boot slowly, or keep reporting a destroyed unit for a while.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::registry::{ProviderContext, ProviderFactory};
use super::traits::*;
use crate::allocator::PlacementStrategy;
use crate::credential::{Credential, LazyCredential};
use crate::error::{Result, VendorError};
use crate::model::{Host, Zone};

const PROVIDER_ID: &str = "mock";

/// A unit held by the mock vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUnit {
    /// Vendor identifier.
    pub identifier: String,
    /// Unit name.
    pub name: String,
    /// Zone it was created in.
    pub zone: Option<String>,
    /// Address.
    pub address: String,
    /// Power state.
    pub power: PowerState,
    /// Virtual CPUs.
    pub cpu: i32,
    /// Memory in megabytes.
    pub memory: i32,
    /// Engine the unit runs.
    pub engine: String,
    polls: u32,
}

/// Vendor calls observed by the mock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// `create` calls, including failed and deduplicated ones.
    pub creates: u32,
    /// `destroy` calls.
    pub destroys: u32,
    /// `start` calls.
    pub starts: u32,
    /// `stop` calls.
    pub stops: u32,
    /// `resize` calls.
    pub resizes: u32,
    /// In-place `restore` calls.
    pub restores: u32,
    /// `update_metadata` calls.
    pub metadata_updates: u32,
}

#[derive(Debug, Default)]
struct MockState {
    units: HashMap<String, MockUnit>,
    lingering: HashMap<String, u32>,
    static_ips: HashMap<String, String>,
    service_accounts: HashSet<String>,
    role_polls: HashMap<String, u32>,
    roles_after: Option<u32>,
    calls: MockCalls,
    create_failures: VecDeque<VendorError>,
    ready_after: u32,
    never_ready: bool,
    linger_polls: u32,
    power_stuck: bool,
    next_id: u32,
}

impl MockState {
    fn unit_mut(&mut self, identifier: &str) -> Result<&mut MockUnit> {
        self.units
            .values_mut()
            .find(|u| u.identifier == identifier)
            .ok_or_else(|| {
                VendorError::not_found(PROVIDER_ID, format!("no unit {identifier}")).into()
            })
    }
}

/// Behaviour shared by every provider a [`MockFactory`] builds.
#[derive(Debug, Clone, Copy)]
struct MockConfig {
    placement: PlacementStrategy,
    create_attempts: usize,
    restore: RestoreStrategy,
    static_ip: bool,
    ready: PollPolicy,
    power: PollPolicy,
    gone: PollPolicy,
    roles: PollPolicy,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            placement: PlacementStrategy::RoundRobin,
            create_attempts: 1,
            restore: RestoreStrategy::Recreate,
            static_ip: false,
            ready: PollPolicy::immediate(5),
            power: PollPolicy::immediate(5),
            gone: PollPolicy::immediate(5),
            roles: PollPolicy::immediate(5),
        }
    }
}

/// Factory for mock providers sharing one in-memory vendor.
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
    config: MockConfig,
}

impl MockFactory {
    /// Round-robin, one create attempt, restore by recreate, immediate polling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `placement` unless the credential overrides it.
    pub fn with_placement(mut self, placement: PlacementStrategy) -> Self {
        self.config.placement = placement;
        self
    }

    /// Allow `attempts` create attempts.
    pub fn with_create_attempts(mut self, attempts: usize) -> Self {
        self.config.create_attempts = attempts;
        self
    }

    /// Restore with `strategy`.
    pub fn with_restore(mut self, strategy: RestoreStrategy) -> Self {
        self.config.restore = strategy;
        self
    }

    /// Require a reserved static IP for create.
    pub fn requiring_static_ip(mut self) -> Self {
        self.config.static_ip = true;
        self
    }

    /// Set every polling budget at once.
    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        let policy = PollPolicy::immediate(attempts);
        self.config.ready = policy;
        self.config.power = policy;
        self.config.gone = policy;
        self.config.roles = policy;
        self
    }

    /// Fail the next create call with `error`. Failures queue up.
    pub async fn fail_next_create(&self, error: VendorError) {
        self.state.lock().await.create_failures.push_back(error);
    }

    /// Report not-ready for the first `polls` probes of every unit.
    pub async fn ready_after(&self, polls: u32) {
        self.state.lock().await.ready_after = polls;
    }

    /// Hand role grants off and report them after `polls` checks.
    /// Grants apply at once unless this is set.
    pub async fn roles_after(&self, polls: u32) {
        self.state.lock().await.roles_after = Some(polls);
    }

    /// Service account exists.
    pub async fn has_service_account(&self, account: &str) -> bool {
        self.state.lock().await.service_accounts.contains(account)
    }

    /// Never report ready.
    pub async fn never_ready(&self) {
        self.state.lock().await.never_ready = true;
    }

    /// Keep reporting destroyed units as existing for `polls` probes.
    pub async fn linger_after_destroy(&self, polls: u32) {
        self.state.lock().await.linger_polls = polls;
    }

    /// Ignore start/stop requests, so power state never changes.
    pub async fn power_stuck(&self) {
        self.state.lock().await.power_stuck = true;
    }

    /// Calls so far.
    pub async fn calls(&self) -> MockCalls {
        self.state.lock().await.calls.clone()
    }

    /// Unit by name.
    pub async fn unit(&self, name: &str) -> Option<MockUnit> {
        self.state.lock().await.units.get(name).cloned()
    }

    /// Number of live units.
    pub async fn unit_count(&self) -> usize {
        self.state.lock().await.units.len()
    }

    /// Drop a unit behind the engine's back.
    pub async fn remove_unit(&self, name: &str) -> Option<MockUnit> {
        self.state.lock().await.units.remove(name)
    }
}

impl ProviderFactory for MockFactory {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn build(
        &self,
        environment: &str,
        engine: &str,
        context: &ProviderContext,
    ) -> Box<dyn Provider> {
        Box::new(MockProvider {
            environment: environment.to_string(),
            engine: engine.to_string(),
            credential: LazyCredential::new(
                context.credentials.clone(),
                PROVIDER_ID,
                environment,
                engine,
            ),
            state: self.state.clone(),
            config: self.config,
        })
    }
}

/// Provider backed by the in-memory mock vendor.
///
/// Zones come from the `zones` table of the `mock` credential.
pub struct MockProvider {
    environment: String,
    engine: String,
    credential: LazyCredential,
    state: Arc<Mutex<MockState>>,
    config: MockConfig,
}

#[async_trait]
impl Provider for MockProvider {
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
        self.config.create_attempts
    }

    fn default_placement(&self) -> PlacementStrategy {
        self.config.placement
    }

    fn restore_strategy(&self) -> RestoreStrategy {
        self.config.restore
    }

    fn requires_static_ip(&self) -> bool {
        self.config.static_ip
    }

    fn ready_policy(&self) -> PollPolicy {
        self.config.ready
    }

    fn power_policy(&self) -> PollPolicy {
        self.config.power
    }

    fn gone_policy(&self) -> PollPolicy {
        self.config.gone
    }

    fn role_policy(&self) -> PollPolicy {
        self.config.roles
    }

    async fn credential(&self) -> Result<&Credential> {
        self.credential.get().await
    }

    async fn zones(&self) -> Result<Vec<Zone>> {
        if self.config.placement == PlacementStrategy::Unzoned {
            return Ok(Vec::new());
        }
        self.credential().await?.zone_table("zones")
    }

    async fn create(&self, request: &CreateRequest) -> Result<VendorUnit> {
        let mut state = self.state.lock().await;
        state.calls.creates += 1;

        if let Some(error) = state.create_failures.pop_front() {
            return Err(error.into());
        }

        if let Some(unit) = state.units.get(&request.name) {
            return Ok(VendorUnit {
                identifier: unit.identifier.clone(),
                address: unit.address.clone(),
                zone: unit.zone.clone(),
                existing: true,
            });
        }

        state.next_id += 1;
        let id = state.next_id;
        let unit = MockUnit {
            identifier: format!("mock-{id}"),
            name: request.name.clone(),
            zone: request.zone.clone(),
            address: match &request.static_ip {
                Some(ip) => ip.address.clone(),
                None => format!("10.0.0.{id}"),
            },
            power: PowerState::Running,
            cpu: request.cpu,
            memory: request.memory,
            engine: self.engine.clone(),
            polls: 0,
        };
        let created = VendorUnit {
            identifier: unit.identifier.clone(),
            address: unit.address.clone(),
            zone: unit.zone.clone(),
            existing: false,
        };
        state.units.insert(request.name.clone(), unit);
        Ok(created)
    }

    async fn start(&self, host: &Host) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.starts += 1;
        let stuck = state.power_stuck;
        let unit = state.unit_mut(&host.identifier)?;
        if !stuck {
            unit.power = PowerState::Running;
        }
        Ok(())
    }

    async fn stop(&self, host: &Host) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.stops += 1;
        let stuck = state.power_stuck;
        let unit = state.unit_mut(&host.identifier)?;
        if !stuck {
            unit.power = PowerState::Stopped;
        }
        Ok(())
    }

    async fn power_state(&self, host: &Host) -> Result<PowerState> {
        let mut state = self.state.lock().await;
        Ok(state.unit_mut(&host.identifier)?.power.clone())
    }

    async fn resize(&self, host: &Host, cpu: i32, memory: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.resizes += 1;
        let unit = state.unit_mut(&host.identifier)?;
        unit.cpu = cpu;
        unit.memory = memory;
        Ok(())
    }

    async fn destroy(&self, host: &Host) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.destroys += 1;

        let name = state
            .units
            .iter()
            .find(|(_, u)| u.identifier == host.identifier)
            .map(|(name, _)| name.clone());

        if let Some(name) = name {
            state.units.remove(&name);
            let linger = state.linger_polls;
            if linger > 0 {
                state.lingering.insert(host.identifier.clone(), linger);
            }
        }
        Ok(())
    }

    async fn exists(&self, host: &Host) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.units.values().any(|u| u.identifier == host.identifier) {
            return Ok(true);
        }
        match state.lingering.get_mut(&host.identifier) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_ready(&self, host: &Host) -> Result<Readiness> {
        let mut state = self.state.lock().await;
        let never_ready = state.never_ready;
        let ready_after = state.ready_after;
        let unit = state.unit_mut(&host.identifier)?;

        unit.polls += 1;
        if never_ready || unit.polls <= ready_after {
            return Ok(Readiness::not_ready());
        }
        Ok(Readiness {
            ready: true,
            version: Some(unit.engine.clone()),
        })
    }

    async fn restore(&self, host: &Host, engine: &str, _extra: &Map<String, Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.restores += 1;
        let unit = state.unit_mut(&host.identifier)?;
        unit.engine = engine.to_string();
        unit.polls = 0;
        Ok(())
    }

    async fn refresh_metadata(&self, host: &mut Host) -> Result<()> {
        let mut state = self.state.lock().await;
        host.address = state.unit_mut(&host.identifier)?.address.clone();
        Ok(())
    }

    async fn update_metadata(&self, host: &Host) -> Result<()> {
        let mut state = self.state.lock().await;
        state.unit_mut(&host.identifier)?;
        state.calls.metadata_updates += 1;
        Ok(())
    }

    async fn reserve_static_ip(&self, _group: &str, name: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let next = state.static_ips.len() + 1;
        Ok(state
            .static_ips
            .entry(name.to_string())
            .or_insert_with(|| format!("10.1.0.{next}"))
            .clone())
    }

    async fn release_static_ip(&self, name: &str) -> Result<()> {
        self.state.lock().await.static_ips.remove(name);
        Ok(())
    }

    async fn create_service_account(&self, name: &str) -> Result<String> {
        let account = format!("{name}@{}", self.environment);
        self.state
            .lock()
            .await
            .service_accounts
            .insert(account.clone());
        Ok(account)
    }

    async fn destroy_service_account(&self, account: &str) -> Result<()> {
        if self.state.lock().await.service_accounts.remove(account) {
            Ok(())
        } else {
            Err(VendorError::not_found(PROVIDER_ID, format!("no service account {account}")).into())
        }
    }

    async fn grant_service_account_roles(&self, account: &str) -> Result<RoleGrant> {
        let mut state = self.state.lock().await;
        if !state.service_accounts.contains(account) {
            return Err(
                VendorError::not_found(PROVIDER_ID, format!("no service account {account}")).into(),
            );
        }
        if state.roles_after.is_none() {
            return Ok(RoleGrant::Applied);
        }
        state.role_polls.insert(account.to_string(), 0);
        Ok(RoleGrant::Requested)
    }

    async fn service_account_has_roles(&self, account: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let after = state.roles_after.unwrap_or(0);
        let polls = state.role_polls.entry(account.to_string()).or_insert(0);
        *polls += 1;
        Ok(*polls > after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::persistence::MemoryStore;

    fn provider(factory: &MockFactory) -> Box<dyn Provider> {
        let context = ProviderContext {
            credentials: Arc::new(MemoryStore::new()),
            settings: ClientSettings::default(),
        };
        factory.build("dev", "mongodb_4_2_3", &context)
    }

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            name: name.to_string(),
            group: "g".to_string(),
            cpu: 1,
            memory: 1024,
            zone: Some("z1".to_string()),
            static_ip: None,
            extra: Map::new(),
        }
    }

    fn host_for(unit: &VendorUnit) -> Host {
        let now = chrono::Utc::now();
        Host {
            id: None,
            name: "h1".to_string(),
            group: "g".to_string(),
            engine: "mongodb_4_2_3".to_string(),
            environment: "dev".to_string(),
            cpu: 1,
            memory: 1024,
            provider: PROVIDER_ID.to_string(),
            identifier: unit.identifier.clone(),
            address: unit.address.clone(),
            zone: unit.zone.clone(),
            recreating: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_mock_create_dedupes_by_name() {
        let factory = MockFactory::new();
        let provider = provider(&factory);

        let first = provider.create(&request("h1")).await.unwrap();
        let second = provider.create(&request("h1")).await.unwrap();

        assert!(!first.existing);
        assert!(second.existing);
        assert_eq!(first.identifier, second.identifier);
        assert_eq!(factory.unit_count().await, 1);
        assert_eq!(factory.calls().await.creates, 2);
    }

    #[tokio::test]
    async fn test_mock_scripted_create_failure() {
        let factory = MockFactory::new();
        factory
            .fail_next_create(VendorError::retryable(PROVIDER_ID, "capacity"))
            .await;
        let provider = provider(&factory);

        let err = provider.create(&request("h1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(provider.create(&request("h1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_ready_after_polls() {
        let factory = MockFactory::new();
        factory.ready_after(2).await;
        let provider = provider(&factory);
        let host = host_for(&provider.create(&request("h1")).await.unwrap());

        assert!(!provider.is_ready(&host).await.unwrap().ready);
        assert!(!provider.is_ready(&host).await.unwrap().ready);
        let readiness = provider.is_ready(&host).await.unwrap();
        assert!(readiness.ready);
        assert_eq!(readiness.version.as_deref(), Some("mongodb_4_2_3"));
    }

    #[tokio::test]
    async fn test_mock_destroy_lingers_and_tolerates_absence() {
        let factory = MockFactory::new();
        factory.linger_after_destroy(1).await;
        let provider = provider(&factory);
        let host = host_for(&provider.create(&request("h1")).await.unwrap());

        provider.destroy(&host).await.unwrap();
        assert!(provider.exists(&host).await.unwrap());
        assert!(!provider.exists(&host).await.unwrap());

        provider.destroy(&host).await.unwrap();
        assert_eq!(factory.calls().await.destroys, 2);
    }

    #[tokio::test]
    async fn test_mock_power_cycle() {
        let factory = MockFactory::new();
        let provider = provider(&factory);
        let host = host_for(&provider.create(&request("h1")).await.unwrap());

        provider.stop(&host).await.unwrap();
        assert_eq!(provider.power_state(&host).await.unwrap(), PowerState::Stopped);
        provider.start(&host).await.unwrap();
        assert_eq!(provider.power_state(&host).await.unwrap(), PowerState::Running);
    }
}
