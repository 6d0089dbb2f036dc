// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host, static IP and zone records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One provisioned unit and its vendor identity.
///
/// Owned by the lifecycle engine; nothing else mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    /// Internal identifier, `None` until the record is first saved.
    pub id: Option<i64>,
    /// Unit name, unique per (provider, environment).
    pub name: String,
    /// Logical group (database infra) the host belongs to.
    #[sqlx(rename = "group_name")]
    pub group: String,
    /// Engine type, e.g. `mongodb_4_2_3`.
    pub engine: String,
    /// Environment the host lives in.
    pub environment: String,
    /// Number of virtual CPUs.
    pub cpu: i32,
    /// Memory in megabytes.
    pub memory: i32,
    /// Provider identifier.
    pub provider: String,
    /// Vendor-assigned identifier of the current unit.
    pub identifier: String,
    /// Network address.
    pub address: String,
    /// Zone the unit was placed in.
    pub zone: Option<String>,
    /// Set once the old unit is destroyed during restore, cleared when the new unit is ready.
    pub recreating: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last saved.
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// Engine family, the part before the first `_` (`mongodb_4_2_3` -> `mongodb`).
    pub fn engine_name(&self) -> &str {
        engine_name(&self.engine)
    }

    /// Whether the host has been persisted.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

/// Engine family of an engine string.
pub fn engine_name(engine: &str) -> &str {
    engine.split('_').next().unwrap_or(engine)
}

/// A network address reserved for a group before its host exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StaticIp {
    /// Internal identifier.
    pub id: Option<i64>,
    /// Reservation name, unique.
    pub name: String,
    /// Group the address was reserved for.
    #[sqlx(rename = "group_name")]
    pub group: String,
    /// Reserved address.
    pub address: String,
    /// Host currently bound to the address.
    pub host_id: Option<i64>,
}

/// A placement zone from a credential's zone table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone name (the key in the zone table).
    pub name: String,
    /// Only active zones take part in allocation.
    pub active: bool,
    /// Back-end specific attributes (subnet id, networks, ...).
    pub attributes: Value,
}

impl Zone {
    /// String attribute of the zone.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}
