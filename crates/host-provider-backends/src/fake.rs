// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory vendors for tests and local runs.
//!
//! [`FakeCompute`] stands in for a VM API and [`FakeWorkload`] for an
//! orchestrator. Both act as their own connector and count how often a
//! provider connected, so lazy client construction can be observed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use host_provider_core::credential::Credential;
use host_provider_core::{ClientSettings, Result, VendorError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::compute::{
    AddressSpec, ComputeApi, ComputeConnector, IamBinding, Instance, InstanceSpec, InstanceStatus,
    Offering, VendorResult,
};
use crate::workload::{
    PodStatus, StatefulSet, StatefulSetSpec, WorkloadApi, WorkloadConnector,
};

const FAKE: &str = "fake";

#[derive(Debug, Default)]
struct ComputeState {
    provider: Option<&'static str>,
    instances: HashMap<String, Instance>,
    offerings: Vec<Offering>,
    addresses: HashMap<String, String>,
    inserted: Vec<InstanceSpec>,
    insert_failures: VecDeque<VendorError>,
    connects: u32,
    rebuilds: u32,
    next_address: u32,
    keep_deleted: bool,
    service_accounts: HashSet<String>,
    group_members: HashMap<String, Vec<String>>,
    published: Vec<(String, Vec<(String, String)>)>,
    bindings: Vec<IamBinding>,
    hold_role_grants: bool,
}

impl ComputeState {
    fn provider(&self) -> &'static str {
        self.provider.unwrap_or(FAKE)
    }

    fn instance_mut(&mut self, identifier: &str) -> VendorResult<&mut Instance> {
        let provider = self.provider();
        self.instances
            .get_mut(identifier)
            .ok_or_else(|| VendorError::not_found(provider, format!("no instance {identifier}")))
    }

    fn live(&self) -> impl Iterator<Item = &Instance> {
        self.instances
            .values()
            .filter(|i| i.status != InstanceStatus::Terminated)
    }

    fn grant(&mut self, role: &str, member: String) {
        match self.bindings.iter_mut().find(|b| b.role == role) {
            Some(binding) if binding.members.contains(&member) => {}
            Some(binding) => binding.members.push(member),
            None => self.bindings.push(IamBinding {
                role: role.to_string(),
                members: vec![member],
            }),
        }
    }

    fn allocate_address(&mut self, prefix: &str) -> String {
        self.next_address += 1;
        format!("{prefix}.{}", self.next_address)
    }
}

/// In-memory VM vendor.
#[derive(Clone, Default)]
pub struct FakeCompute {
    state: Arc<Mutex<ComputeState>>,
}

impl FakeCompute {
    /// Empty vendor with a small size catalogue.
    pub fn new() -> Self {
        let state = ComputeState {
            offerings: vec![
                offering("small", 1, 1024),
                offering("medium", 2, 2048),
                offering("large", 4, 8192),
            ],
            ..ComputeState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Fail the next insert with `error`. Failures queue up.
    pub async fn fail_next_insert(&self, error: VendorError) {
        self.state.lock().await.insert_failures.push_back(error);
    }

    /// Keep deleted instances listed as terminated instead of dropping them.
    pub async fn keep_deleted(&self) {
        self.state.lock().await.keep_deleted = true;
    }

    /// Live instance by name.
    pub async fn instance_named(&self, name: &str) -> Option<Instance> {
        self.state
            .lock()
            .await
            .live()
            .find(|i| i.name == name)
            .cloned()
    }

    /// Number of live instances.
    pub async fn instance_count(&self) -> usize {
        self.state.lock().await.live().count()
    }

    /// Number of terminated instances still listed.
    pub async fn terminated_count(&self) -> usize {
        let state = self.state.lock().await;
        state.instances.len() - state.live().count()
    }

    /// Drop an instance behind the engine's back.
    pub async fn remove_instance(&self, name: &str) -> Option<Instance> {
        let mut state = self.state.lock().await;
        let identifier = state
            .live()
            .find(|i| i.name == name)
            .map(|i| i.identifier.clone())?;
        state.instances.remove(&identifier)
    }

    /// Every insert request received, failed ones included.
    pub async fn inserted(&self) -> Vec<InstanceSpec> {
        self.state.lock().await.inserted.clone()
    }

    /// Reserved address by reservation name.
    pub async fn address(&self, name: &str) -> Option<String> {
        self.state.lock().await.addresses.get(name).cloned()
    }

    /// How many clients were built.
    pub async fn connects(&self) -> u32 {
        self.state.lock().await.connects
    }

    /// Leave published role grants unapplied.
    pub async fn hold_role_grants(&self) {
        self.state.lock().await.hold_role_grants = true;
    }

    /// Whether the service account exists.
    pub async fn service_account_exists(&self, email: &str) -> bool {
        self.state.lock().await.service_accounts.contains(email)
    }

    /// Members of a directory group by resource name.
    pub async fn group_members(&self, group: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .group_members
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Every published message as (topic, attributes).
    pub async fn published(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.state.lock().await.published.clone()
    }

    /// How many in-place rebuilds were requested.
    pub async fn rebuilds(&self) -> u32 {
        self.state.lock().await.rebuilds
    }
}

fn offering(id: &str, cpu: i32, memory: i32) -> Offering {
    Offering {
        id: id.to_string(),
        cpu,
        memory,
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn find_instance(
        &self,
        name: &str,
        zone: Option<&str>,
    ) -> VendorResult<Option<Instance>> {
        Ok(self
            .state
            .lock()
            .await
            .instances
            .values()
            .filter(|i| i.name == name && (zone.is_none() || i.zone.as_deref() == zone))
            .min_by_key(|i| i.status == InstanceStatus::Terminated)
            .cloned())
    }

    async fn get_instance(&self, identifier: &str) -> VendorResult<Instance> {
        Ok(self.state.lock().await.instance_mut(identifier)?.clone())
    }

    async fn insert_instance(&self, spec: &InstanceSpec) -> VendorResult<Instance> {
        let mut state = self.state.lock().await;
        state.inserted.push(spec.clone());
        if let Some(error) = state.insert_failures.pop_front() {
            return Err(error);
        }

        let address = match &spec.address {
            Some(address) => address.clone(),
            None => state.allocate_address("10.2.0"),
        };
        let instance = Instance {
            identifier: format!("i-{}", Uuid::new_v4().simple()),
            name: spec.name.clone(),
            zone: spec.zone.clone(),
            address,
            status: InstanceStatus::Running,
            offering: spec.offering.clone(),
            image: spec.image.clone(),
            labels: spec.labels.clone(),
            metadata: spec.metadata.clone(),
        };
        state
            .instances
            .insert(instance.identifier.clone(), instance.clone());
        Ok(instance)
    }

    async fn start_instance(&self, identifier: &str) -> VendorResult<()> {
        self.state.lock().await.instance_mut(identifier)?.status = InstanceStatus::Running;
        Ok(())
    }

    async fn stop_instance(&self, identifier: &str) -> VendorResult<()> {
        self.state.lock().await.instance_mut(identifier)?.status = InstanceStatus::Stopped;
        Ok(())
    }

    async fn delete_instance(&self, identifier: &str) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        if state.keep_deleted {
            state.instance_mut(identifier)?.status = InstanceStatus::Terminated;
        } else {
            state.instance_mut(identifier)?;
            state.instances.remove(identifier);
        }
        Ok(())
    }

    async fn resize_instance(&self, identifier: &str, offering: &str) -> VendorResult<()> {
        self.state.lock().await.instance_mut(identifier)?.offering = offering.to_string();
        Ok(())
    }

    async fn rebuild_instance(&self, identifier: &str, image: &str) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        state.instance_mut(identifier)?.image = image.to_string();
        state.rebuilds += 1;
        Ok(())
    }

    async fn list_offerings(&self) -> VendorResult<Vec<Offering>> {
        Ok(self.state.lock().await.offerings.clone())
    }

    async fn reserve_address(&self, spec: &AddressSpec) -> VendorResult<String> {
        let mut state = self.state.lock().await;
        if let Some(address) = state.addresses.get(&spec.name) {
            return Ok(address.clone());
        }
        let address = state.allocate_address("10.3.0");
        state.addresses.insert(spec.name.clone(), address.clone());
        Ok(address)
    }

    async fn release_address(&self, name: &str) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        let provider = state.provider();
        state
            .addresses
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VendorError::not_found(provider, format!("no address {name}")))
    }

    async fn set_metadata(&self, identifier: &str, items: &[(String, String)]) -> VendorResult<()> {
        self.state.lock().await.instance_mut(identifier)?.metadata = items.to_vec();
        Ok(())
    }

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
    ) -> VendorResult<String> {
        let email = format!("{account_id}@{project}.iam.gserviceaccount.com");
        self.state
            .lock()
            .await
            .service_accounts
            .insert(email.clone());
        Ok(email)
    }

    async fn delete_service_account(&self, email: &str) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        if state.service_accounts.remove(email) {
            return Ok(());
        }
        Err(VendorError::not_found(
            state.provider(),
            format!("no service account {email}"),
        ))
    }

    async fn lookup_group(&self, group_id: &str) -> VendorResult<String> {
        Ok(format!("groups/{group_id}"))
    }

    async fn add_group_member(&self, group: &str, member: &str) -> VendorResult<()> {
        self.state
            .lock()
            .await
            .group_members
            .entry(group.to_string())
            .or_default()
            .push(member.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, attributes: &[(String, String)]) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        state.published.push((topic.to_string(), attributes.to_vec()));
        if state.hold_role_grants {
            return Ok(());
        }

        let attribute = |key: &str| {
            attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let (Some(roles), Some(account)) = (attribute("roles"), attribute("service_account"))
        else {
            return Ok(());
        };
        let roles: Vec<String> = serde_json::from_str(roles)
            .map_err(|e| VendorError::fatal(state.provider(), format!("bad roles: {e}")))?;
        for role in roles {
            state.grant(&role, format!("serviceAccount:{account}"));
        }
        Ok(())
    }

    async fn iam_bindings(&self, _project: &str) -> VendorResult<Vec<IamBinding>> {
        Ok(self.state.lock().await.bindings.clone())
    }
}

#[async_trait]
impl ComputeConnector for FakeCompute {
    async fn connect(
        &self,
        provider: &'static str,
        _credential: &Credential,
        _settings: &ClientSettings,
    ) -> Result<Arc<dyn ComputeApi>> {
        let mut state = self.state.lock().await;
        state.provider = Some(provider);
        state.connects += 1;
        Ok(Arc::new(self.clone()))
    }
}

#[derive(Debug, Default)]
struct WorkloadState {
    sets: HashMap<(String, String), StatefulSet>,
    specs: HashMap<(String, String), StatefulSetSpec>,
    pending_polls: u32,
    connects: u32,
}

impl WorkloadState {
    fn set_mut(&mut self, namespace: &str, name: &str) -> VendorResult<&mut StatefulSet> {
        self.sets
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| {
                VendorError::not_found("k8s", format!("no stateful set {namespace}/{name}"))
            })
    }
}

/// In-memory orchestrator.
#[derive(Clone, Default)]
pub struct FakeWorkload {
    state: Arc<Mutex<WorkloadState>>,
}

impl FakeWorkload {
    /// Empty orchestrator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the next `polls` pod reads as pending.
    pub async fn pods_pending_for(&self, polls: u32) {
        self.state.lock().await.pending_polls = polls;
    }

    /// Stateful set by namespace and name.
    pub async fn stateful_set(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        self.state
            .lock()
            .await
            .sets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Spec the stateful set was last created or patched with.
    pub async fn spec(&self, namespace: &str, name: &str) -> Option<StatefulSetSpec> {
        self.state
            .lock()
            .await
            .specs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// How many clients were built.
    pub async fn connects(&self) -> u32 {
        self.state.lock().await.connects
    }
}

#[async_trait]
impl WorkloadApi for FakeWorkload {
    async fn create_stateful_set(&self, spec: &StatefulSetSpec) -> VendorResult<StatefulSet> {
        let mut state = self.state.lock().await;
        let key = (spec.namespace.clone(), spec.name.clone());
        if let Some(existing) = state.sets.get(&key) {
            return Ok(existing.clone());
        }

        let set = StatefulSet {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            replicas: 1,
            ready_replicas: 1,
            image: spec.image.clone(),
        };
        state.sets.insert(key.clone(), set.clone());
        state.specs.insert(key, spec.clone());
        Ok(set)
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> VendorResult<Option<StatefulSet>> {
        Ok(self
            .state
            .lock()
            .await
            .sets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        state.set_mut(namespace, name)?;
        let key = (namespace.to_string(), name.to_string());
        state.sets.remove(&key);
        state.specs.remove(&key);
        Ok(())
    }

    async fn scale_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        let set = state.set_mut(namespace, name)?;
        set.replicas = replicas;
        set.ready_replicas = replicas;
        Ok(())
    }

    async fn patch_resources(
        &self,
        namespace: &str,
        name: &str,
        cpu: i32,
        memory: i32,
    ) -> VendorResult<()> {
        let mut state = self.state.lock().await;
        state.set_mut(namespace, name)?;
        if let Some(spec) = state
            .specs
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            spec.cpu = cpu;
            spec.memory = memory;
        }
        Ok(())
    }

    async fn read_pod_status(&self, namespace: &str, pod: &str) -> VendorResult<PodStatus> {
        let mut state = self.state.lock().await;
        let set_name = pod.rsplit_once('-').map_or(pod, |(set, _)| set);
        let set = state.set_mut(namespace, set_name)?.clone();
        if set.replicas == 0 {
            return Err(VendorError::not_found("k8s", format!("no pod {namespace}/{pod}")));
        }

        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(PodStatus {
                phase: "Pending".to_string(),
                ready: false,
                image: None,
            });
        }
        Ok(PodStatus {
            phase: "Running".to_string(),
            ready: true,
            image: Some(set.image),
        })
    }
}

#[async_trait]
impl WorkloadConnector for FakeWorkload {
    async fn connect(
        &self,
        _credential: &Credential,
        _settings: &ClientSettings,
    ) -> Result<Arc<dyn WorkloadApi>> {
        self.state.lock().await.connects += 1;
        Ok(Arc::new(self.clone()))
    }
}
