//! Persistence interfaces and backends for host-provider-core.
//!
//! The engine only sees the four store traits. [`PostgresStore`] and
//! [`SqliteStore`] implement all of them on one pool; [`MemoryStore`] keeps
//! everything in process for tests and embedding.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{Host, StaticIp};

/// Credential documents keyed by (provider, environment). Exact match only.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential document, `None` when absent.
    async fn get(&self, provider: &str, environment: &str) -> Result<Option<Map<String, Value>>>;

    /// Insert or replace the credential document.
    async fn upsert(
        &self,
        provider: &str,
        environment: &str,
        content: &Map<String, Value>,
    ) -> Result<()>;

    /// Delete the credential document. Returns whether anything was deleted.
    async fn delete(&self, provider: &str, environment: &str) -> Result<bool>;
}

/// Round-robin bookkeeping: last zone per group, and one latest-used zone per
/// (provider, environment).
#[async_trait]
pub trait ZoneLedger: Send + Sync {
    /// Zone assigned to the most recent host of the group.
    async fn get_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
    ) -> Result<Option<String>>;

    /// Latest zone used by any group.
    async fn get_latest_zone(&self, provider: &str, environment: &str) -> Result<Option<String>>;

    /// Record the zone for a group, replacing any previous one.
    async fn upsert_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
        zone: &str,
    ) -> Result<()>;

    /// Record the latest-used zone only if none is recorded yet.
    async fn upsert_latest_zone_if_absent(
        &self,
        provider: &str,
        environment: &str,
        zone: &str,
    ) -> Result<()>;

    /// Remove the group's row.
    async fn delete_group(&self, provider: &str, environment: &str, group: &str) -> Result<()>;

    /// Remove the latest-used row.
    async fn delete_latest_zone(&self, provider: &str, environment: &str) -> Result<()>;

    /// Whether any group row exists for (provider, environment).
    async fn has_groups(&self, provider: &str, environment: &str) -> Result<bool>;
}

/// Relational store of host records.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Insert (when `id` is `None`) or update the host. Returns the stored record.
    async fn save(&self, host: &Host) -> Result<Host>;

    /// Get a host by id.
    async fn get(&self, id: i64) -> Result<Option<Host>>;

    /// All hosts of a group, oldest first.
    async fn filter(&self, group: &str) -> Result<Vec<Host>>;

    /// Host with the given name in (provider, environment).
    async fn find_by_name(
        &self,
        provider: &str,
        environment: &str,
        name: &str,
    ) -> Result<Option<Host>>;

    /// Delete a host record. Deleting a missing record is not an error.
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Reserved addresses for address-preallocating back-ends.
#[async_trait]
pub trait StaticIpStore: Send + Sync {
    /// Insert the reservation (or return the existing one with the same name).
    async fn save(&self, ip: &StaticIp) -> Result<StaticIp>;

    /// Reservation by name.
    async fn get_by_name(&self, name: &str) -> Result<Option<StaticIp>>;

    /// Reservation bound to a host.
    async fn get_by_host(&self, host_id: i64) -> Result<Option<StaticIp>>;

    /// Bind the reservation to a host.
    async fn bind(&self, name: &str, host_id: i64) -> Result<()>;

    /// Remove the reservation. Returns whether anything was deleted.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Error for binding a reservation already held by another host.
pub(crate) fn already_bound(name: &str) -> Error {
    Error::validation(
        "static_ip",
        format!("static IP '{name}' is bound to another host"),
    )
}

/// The four stores, usually backed by one database.
#[derive(Clone)]
pub struct Stores {
    /// Credential documents.
    pub credentials: Arc<dyn CredentialStore>,
    /// Zone ledger.
    pub ledger: Arc<dyn ZoneLedger>,
    /// Host records.
    pub hosts: Arc<dyn HostStore>,
    /// Static IP reservations.
    pub static_ips: Arc<dyn StaticIpStore>,
}

impl Stores {
    /// Use one object for every store.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore + ZoneLedger + HostStore + StaticIpStore + 'static,
    {
        Self {
            credentials: store.clone(),
            ledger: store.clone(),
            hosts: store.clone(),
            static_ips: store,
        }
    }

    /// Connect by URL scheme (`postgres://`, `postgresql://` or `sqlite:`) and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        if database_url.starts_with("sqlite:") {
            let store = SqliteStore::connect(database_url).await?;
            Ok(Self::from_shared(Arc::new(store)))
        } else if database_url.starts_with("postgres://")
            || database_url.starts_with("postgresql://")
        {
            let store = PostgresStore::connect(database_url).await?;
            Ok(Self::from_shared(Arc::new(store)))
        } else {
            Err(Error::validation(
                "database_url",
                "expected a postgres:// or sqlite: URL",
            ))
        }
    }

    /// In-memory stores.
    pub fn in_memory() -> Self {
        Self::from_shared(Arc::new(MemoryStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let result = Stores::connect("mysql://localhost/hosts").await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let stores = Stores::connect("sqlite::memory:").await.unwrap();
        assert!(stores.hosts.get(1).await.unwrap().is_none());
        assert!(!stores.ledger.has_groups("gce", "dev").await.unwrap());
    }
}
