// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence.
//!
//! Implements every store trait over maps behind one lock. Used by tests and
//! by embedders that do not need durability.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{CredentialStore, HostStore, StaticIpStore, ZoneLedger, already_bound};
use crate::error::{Error, Result};
use crate::model::{Host, StaticIp};

type EnvKey = (String, String);
type GroupKey = (String, String, String);

#[derive(Default)]
struct Inner {
    credentials: HashMap<EnvKey, Map<String, Value>>,
    group_zones: HashMap<GroupKey, String>,
    latest_zones: HashMap<EnvKey, String>,
    hosts: BTreeMap<i64, Host>,
    next_host_id: i64,
    static_ips: BTreeMap<String, StaticIp>,
    next_ip_id: i64,
}

fn env_key(provider: &str, environment: &str) -> EnvKey {
    (provider.to_string(), environment.to_string())
}

fn group_key(provider: &str, environment: &str, group: &str) -> GroupKey {
    (
        provider.to_string(),
        environment.to_string(),
        group.to_string(),
    )
}

/// In-memory implementation of all stores.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of host records.
    pub async fn host_count(&self) -> usize {
        self.inner.lock().await.hosts.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, provider: &str, environment: &str) -> Result<Option<Map<String, Value>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .credentials
            .get(&env_key(provider, environment))
            .cloned())
    }

    async fn upsert(
        &self,
        provider: &str,
        environment: &str,
        content: &Map<String, Value>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .credentials
            .insert(env_key(provider, environment), content.clone());
        Ok(())
    }

    async fn delete(&self, provider: &str, environment: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .credentials
            .remove(&env_key(provider, environment))
            .is_some())
    }
}

#[async_trait]
impl ZoneLedger for MemoryStore {
    async fn get_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
    ) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .group_zones
            .get(&group_key(provider, environment, group))
            .cloned())
    }

    async fn get_latest_zone(&self, provider: &str, environment: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .latest_zones
            .get(&env_key(provider, environment))
            .cloned())
    }

    async fn upsert_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
        zone: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .group_zones
            .insert(group_key(provider, environment, group), zone.to_string());
        Ok(())
    }

    async fn upsert_latest_zone_if_absent(
        &self,
        provider: &str,
        environment: &str,
        zone: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .latest_zones
            .entry(env_key(provider, environment))
            .or_insert_with(|| zone.to_string());
        Ok(())
    }

    async fn delete_group(&self, provider: &str, environment: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .group_zones
            .remove(&group_key(provider, environment, group));
        Ok(())
    }

    async fn delete_latest_zone(&self, provider: &str, environment: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.latest_zones.remove(&env_key(provider, environment));
        Ok(())
    }

    async fn has_groups(&self, provider: &str, environment: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .group_zones
            .keys()
            .any(|(p, e, _)| p == provider && e == environment))
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn save(&self, host: &Host) -> Result<Host> {
        let mut inner = self.inner.lock().await;
        let mut stored = host.clone();
        stored.updated_at = Utc::now();

        match stored.id {
            Some(id) => {
                let existing = inner
                    .hosts
                    .get_mut(&id)
                    .ok_or_else(|| Error::not_found("host", id))?;
                stored.created_at = existing.created_at;
                *existing = stored.clone();
            }
            None => {
                let duplicate = inner.hosts.values().any(|h| {
                    h.provider == stored.provider
                        && h.environment == stored.environment
                        && h.name == stored.name
                });
                if duplicate {
                    return Err(Error::validation(
                        "name",
                        format!("host '{}' already exists", stored.name),
                    ));
                }
                inner.next_host_id += 1;
                let id = inner.next_host_id;
                stored.id = Some(id);
                stored.created_at = stored.updated_at;
                inner.hosts.insert(id, stored.clone());
            }
        }

        Ok(stored)
    }

    async fn get(&self, id: i64) -> Result<Option<Host>> {
        let inner = self.inner.lock().await;
        Ok(inner.hosts.get(&id).cloned())
    }

    async fn filter(&self, group: &str) -> Result<Vec<Host>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .hosts
            .values()
            .filter(|h| h.group == group)
            .cloned()
            .collect())
    }

    async fn find_by_name(
        &self,
        provider: &str,
        environment: &str,
        name: &str,
    ) -> Result<Option<Host>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .hosts
            .values()
            .find(|h| h.provider == provider && h.environment == environment && h.name == name)
            .cloned())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.hosts.remove(&id);
        for ip in inner.static_ips.values_mut() {
            if ip.host_id == Some(id) {
                ip.host_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StaticIpStore for MemoryStore {
    async fn save(&self, ip: &StaticIp) -> Result<StaticIp> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.static_ips.get(&ip.name) {
            return Ok(existing.clone());
        }
        inner.next_ip_id += 1;
        let mut stored = ip.clone();
        stored.id = Some(inner.next_ip_id);
        inner.static_ips.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<StaticIp>> {
        let inner = self.inner.lock().await;
        Ok(inner.static_ips.get(name).cloned())
    }

    async fn get_by_host(&self, host_id: i64) -> Result<Option<StaticIp>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .static_ips
            .values()
            .find(|ip| ip.host_id == Some(host_id))
            .cloned())
    }

    async fn bind(&self, name: &str, host_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let ip = inner
            .static_ips
            .get_mut(name)
            .ok_or_else(|| Error::not_found("static_ip", name))?;
        if ip.host_id.is_some_and(|bound| bound != host_id) {
            return Err(already_bound(name));
        }
        ip.host_id = Some(host_id);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.static_ips.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, group: &str) -> Host {
        let now = Utc::now();
        Host {
            id: None,
            name: name.to_string(),
            group: group.to_string(),
            engine: "mongodb_4_2_3".to_string(),
            environment: "dev".to_string(),
            cpu: 1,
            memory: 1024,
            provider: "mock".to_string(),
            identifier: format!("id-{}", name),
            address: "10.0.0.1".to_string(),
            zone: Some("z1".to_string()),
            recreating: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_host_save_assigns_id_and_updates() {
        let store = MemoryStore::new();

        let saved = HostStore::save(&store, &host("h1", "g")).await.unwrap();
        assert_eq!(saved.id, Some(1));

        let mut changed = saved.clone();
        changed.cpu = 4;
        let updated = HostStore::save(&store, &changed).await.unwrap();
        assert_eq!(updated.id, Some(1));
        assert_eq!(updated.created_at, saved.created_at);
        assert_eq!(HostStore::get(&store, 1).await.unwrap().unwrap().cpu, 4);
    }

    #[tokio::test]
    async fn test_host_duplicate_name_rejected() {
        let store = MemoryStore::new();
        HostStore::save(&store, &host("h1", "g")).await.unwrap();
        let err = HostStore::save(&store, &host("h1", "g")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_latest_zone_first_writer_wins() {
        let store = MemoryStore::new();
        store
            .upsert_latest_zone_if_absent("mock", "dev", "z1")
            .await
            .unwrap();
        store
            .upsert_latest_zone_if_absent("mock", "dev", "z2")
            .await
            .unwrap();
        assert_eq!(
            store.get_latest_zone("mock", "dev").await.unwrap().as_deref(),
            Some("z1")
        );
    }

    #[tokio::test]
    async fn test_deleting_host_unbinds_static_ip() {
        let store = MemoryStore::new();
        let saved = HostStore::save(&store, &host("h1", "g")).await.unwrap();
        let id = saved.id.unwrap();
        StaticIpStore::save(
            &store,
            &StaticIp {
                id: None,
                name: "ip-h1".to_string(),
                group: "g".to_string(),
                address: "10.1.0.5".to_string(),
                host_id: None,
            },
        )
        .await
        .unwrap();
        store.bind("ip-h1", id).await.unwrap();
        assert!(store.get_by_host(id).await.unwrap().is_some());

        HostStore::delete(&store, id).await.unwrap();
        assert!(store.get_by_host(id).await.unwrap().is_none());
        assert!(store.get_by_name("ip-h1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bound_static_ip_cannot_move_to_another_host() {
        let store = MemoryStore::new();
        let first = HostStore::save(&store, &host("h1", "g")).await.unwrap();
        let second = HostStore::save(&store, &host("h2", "g")).await.unwrap();
        StaticIpStore::save(
            &store,
            &StaticIp {
                id: None,
                name: "ip-h1".to_string(),
                group: "g".to_string(),
                address: "10.1.0.5".to_string(),
                host_id: None,
            },
        )
        .await
        .unwrap();

        store.bind("ip-h1", first.id.unwrap()).await.unwrap();
        let err = store.bind("ip-h1", second.id.unwrap()).await.unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(
            store.get_by_name("ip-h1").await.unwrap().unwrap().host_id,
            first.id
        );
    }
}
