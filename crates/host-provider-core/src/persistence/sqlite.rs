//! SQLite-backed persistence implementation.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::{CredentialStore, HostStore, StaticIpStore, ZoneLedger, already_bound};
use crate::error::{Error, Result};
use crate::model::{Host, StaticIp};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const HOST_COLUMNS: &str = "id, name, group_name, engine, environment, cpu, memory, provider, \
     identifier, address, zone, recreating, created_at, updated_at";

/// SQLite-backed store for hosts, static IPs, credentials and the zone ledger.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `sqlite:<path>` (created if missing) or `sqlite::memory:` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn unique_violation(err: sqlx::Error, name: &str) -> Error {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return Error::validation("name", format!("host '{}' already exists", name));
    }
    Error::Database(err)
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn get(&self, provider: &str, environment: &str) -> Result<Option<Map<String, Value>>> {
        let content: Option<String> = sqlx::query_scalar(
            "SELECT content FROM credentials WHERE provider = ? AND environment = ?",
        )
        .bind(provider)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await?;

        content
            .map(|c| serde_json::from_str(&c).map_err(Error::from))
            .transpose()
    }

    async fn upsert(
        &self,
        provider: &str,
        environment: &str,
        content: &Map<String, Value>,
    ) -> Result<()> {
        let content = serde_json::to_string(content)?;
        sqlx::query(
            r#"
            INSERT INTO credentials (provider, environment, content, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (provider, environment)
            DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at
            "#,
        )
        .bind(provider)
        .bind(environment)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, provider: &str, environment: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE provider = ? AND environment = ?")
            .bind(provider)
            .bind(environment)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ZoneLedger for SqliteStore {
    async fn get_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
    ) -> Result<Option<String>> {
        let zone = sqlx::query_scalar(
            r#"
            SELECT zone FROM zone_ledger
            WHERE provider = ? AND environment = ? AND group_name = ?
            "#,
        )
        .bind(provider)
        .bind(environment)
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        Ok(zone)
    }

    async fn get_latest_zone(&self, provider: &str, environment: &str) -> Result<Option<String>> {
        let zone = sqlx::query_scalar(
            "SELECT zone FROM zone_ledger_latest WHERE provider = ? AND environment = ?",
        )
        .bind(provider)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(zone)
    }

    async fn upsert_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
        zone: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zone_ledger (provider, environment, group_name, zone, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (provider, environment, group_name)
            DO UPDATE SET zone = excluded.zone, updated_at = excluded.updated_at
            "#,
        )
        .bind(provider)
        .bind(environment)
        .bind(group)
        .bind(zone)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_latest_zone_if_absent(
        &self,
        provider: &str,
        environment: &str,
        zone: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zone_ledger_latest (provider, environment, zone)
            VALUES (?, ?, ?)
            ON CONFLICT (provider, environment) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(environment)
        .bind(zone)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_group(&self, provider: &str, environment: &str, group: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM zone_ledger WHERE provider = ? AND environment = ? AND group_name = ?",
        )
        .bind(provider)
        .bind(environment)
        .bind(group)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_latest_zone(&self, provider: &str, environment: &str) -> Result<()> {
        sqlx::query("DELETE FROM zone_ledger_latest WHERE provider = ? AND environment = ?")
            .bind(provider)
            .bind(environment)
            .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn has_groups(&self, provider: &str, environment: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM zone_ledger WHERE provider = ? AND environment = ?",
        )
        .bind(provider)
        .bind(environment)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

#[async_trait]
impl HostStore for SqliteStore {
    async fn save(&self, host: &Host) -> Result<Host> {
        let now = Utc::now();

        let id = match host.id {
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE hosts
                    SET name = ?, group_name = ?, engine = ?, environment = ?, cpu = ?,
                        memory = ?, provider = ?, identifier = ?, address = ?, zone = ?,
                        recreating = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&host.name)
                .bind(&host.group)
                .bind(&host.engine)
                .bind(&host.environment)
                .bind(host.cpu)
                .bind(host.memory)
                .bind(&host.provider)
                .bind(&host.identifier)
                .bind(&host.address)
                .bind(&host.zone)
                .bind(host.recreating)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| unique_violation(e, &host.name))?;

                if result.rows_affected() == 0 {
                    return Err(Error::not_found("host", id));
                }
                id
            }
            None => sqlx::query_scalar(
                r#"
                INSERT INTO hosts (name, group_name, engine, environment, cpu, memory, provider,
                                   identifier, address, zone, recreating, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&host.name)
            .bind(&host.group)
            .bind(&host.engine)
            .bind(&host.environment)
            .bind(host.cpu)
            .bind(host.memory)
            .bind(&host.provider)
            .bind(&host.identifier)
            .bind(&host.address)
            .bind(&host.zone)
            .bind(host.recreating)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| unique_violation(e, &host.name))?,
        };

        HostStore::get(self, id)
            .await?
            .ok_or_else(|| Error::not_found("host", id))
    }

    async fn get(&self, id: i64) -> Result<Option<Host>> {
        let host = sqlx::query_as::<_, Host>(&format!(
            "SELECT {} FROM hosts WHERE id = ?",
            HOST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(host)
    }

    async fn filter(&self, group: &str) -> Result<Vec<Host>> {
        let hosts = sqlx::query_as::<_, Host>(&format!(
            "SELECT {} FROM hosts WHERE group_name = ? ORDER BY created_at, id",
            HOST_COLUMNS
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        Ok(hosts)
    }

    async fn find_by_name(
        &self,
        provider: &str,
        environment: &str,
        name: &str,
    ) -> Result<Option<Host>> {
        let host = sqlx::query_as::<_, Host>(&format!(
            "SELECT {} FROM hosts WHERE provider = ? AND environment = ? AND name = ?",
            HOST_COLUMNS
        ))
        .bind(provider)
        .bind(environment)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(host)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE static_ips SET host_id = NULL WHERE host_id = ?")
            .bind(id)
            .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StaticIpStore for SqliteStore {
    async fn save(&self, ip: &StaticIp) -> Result<StaticIp> {
        sqlx::query(
            r#"
            INSERT INTO static_ips (name, group_name, address, host_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&ip.name)
        .bind(&ip.group)
        .bind(&ip.address)
        .bind(ip.host_id)
        .execute(&self.pool)
        .await?;

        self.get_by_name(&ip.name)
            .await?
            .ok_or_else(|| Error::not_found("static_ip", &ip.name))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<StaticIp>> {
        let ip = sqlx::query_as::<_, StaticIp>(
            "SELECT id, name, group_name, address, host_id FROM static_ips WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ip)
    }

    async fn get_by_host(&self, host_id: i64) -> Result<Option<StaticIp>> {
        let ip = sqlx::query_as::<_, StaticIp>(
            "SELECT id, name, group_name, address, host_id FROM static_ips WHERE host_id = ?",
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ip)
    }

    async fn bind(&self, name: &str, host_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE static_ips SET host_id = ? \
             WHERE name = ? AND (host_id IS NULL OR host_id = ?)",
        )
        .bind(host_id)
        .bind(name)
        .bind(host_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_name(name).await? {
                Some(_) => Err(already_bound(name)),
                None => Err(Error::not_found("static_ip", name)),
            };
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM static_ips WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
