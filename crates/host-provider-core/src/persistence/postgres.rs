// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{CredentialStore, HostStore, StaticIpStore, ZoneLedger, already_bound};
use crate::error::{Error, Result};
use crate::model::{Host, StaticIp};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

const HOST_COLUMNS: &str = "id, name, group_name, engine, environment, cpu, memory, provider, \
     identifier, address, zone, recreating, created_at, updated_at";

/// PostgreSQL-backed store for hosts, static IPs, credentials and the zone ledger.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a `postgres://` URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
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
    pub fn pool(&self) -> &PgPool {
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
impl CredentialStore for PostgresStore {
    async fn get(&self, provider: &str, environment: &str) -> Result<Option<Map<String, Value>>> {
        let content: Option<String> = sqlx::query_scalar(
            "SELECT content FROM credentials WHERE provider = $1 AND environment = $2",
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
            VALUES ($1, $2, $3, $4)
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
        let result =
            sqlx::query("DELETE FROM credentials WHERE provider = $1 AND environment = $2")
                .bind(provider)
                .bind(environment)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ZoneLedger for PostgresStore {
    async fn get_group_zone(
        &self,
        provider: &str,
        environment: &str,
        group: &str,
    ) -> Result<Option<String>> {
        let zone = sqlx::query_scalar(
            r#"
            SELECT zone FROM zone_ledger
            WHERE provider = $1 AND environment = $2 AND group_name = $3
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
            "SELECT zone FROM zone_ledger_latest WHERE provider = $1 AND environment = $2",
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
            VALUES ($1, $2, $3, $4, $5)
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
            VALUES ($1, $2, $3)
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
            "DELETE FROM zone_ledger WHERE provider = $1 AND environment = $2 AND group_name = $3",
        )
        .bind(provider)
        .bind(environment)
        .bind(group)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_latest_zone(&self, provider: &str, environment: &str) -> Result<()> {
        sqlx::query("DELETE FROM zone_ledger_latest WHERE provider = $1 AND environment = $2")
            .bind(provider)
            .bind(environment)
            .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn has_groups(&self, provider: &str, environment: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM zone_ledger WHERE provider = $1 AND environment = $2",
        )
        .bind(provider)
        .bind(environment)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

#[async_trait]
impl HostStore for PostgresStore {
    async fn save(&self, host: &Host) -> Result<Host> {
        let now = Utc::now();

        let id = match host.id {
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE hosts
                    SET name = $1, group_name = $2, engine = $3, environment = $4, cpu = $5,
                        memory = $6, provider = $7, identifier = $8, address = $9, zone = $10,
                        recreating = $11, updated_at = $12
                    WHERE id = $13
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
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
            "SELECT {} FROM hosts WHERE id = $1",
            HOST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(host)
    }

    async fn filter(&self, group: &str) -> Result<Vec<Host>> {
        let hosts = sqlx::query_as::<_, Host>(&format!(
            "SELECT {} FROM hosts WHERE group_name = $1 ORDER BY created_at, id",
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
            "SELECT {} FROM hosts WHERE provider = $1 AND environment = $2 AND name = $3",
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
        sqlx::query("UPDATE static_ips SET host_id = NULL WHERE host_id = $1")
            .bind(id)
            .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM hosts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StaticIpStore for PostgresStore {
    async fn save(&self, ip: &StaticIp) -> Result<StaticIp> {
        sqlx::query(
            r#"
            INSERT INTO static_ips (name, group_name, address, host_id)
            VALUES ($1, $2, $3, $4)
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
            "SELECT id, name, group_name, address, host_id FROM static_ips WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ip)
    }

    async fn get_by_host(&self, host_id: i64) -> Result<Option<StaticIp>> {
        let ip = sqlx::query_as::<_, StaticIp>(
            "SELECT id, name, group_name, address, host_id FROM static_ips WHERE host_id = $1",
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ip)
    }

    async fn bind(&self, name: &str, host_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE static_ips SET host_id = $1 \
             WHERE name = $2 AND (host_id IS NULL OR host_id = $1)",
        )
        .bind(host_id)
        .bind(name)
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
        let result = sqlx::query("DELETE FROM static_ips WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
