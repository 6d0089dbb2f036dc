// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential views.
//!
//! A credential is the per (provider, environment) configuration document:
//! secrets, the zone table, the offering catalogue and engine templates. The
//! document key order is preserved, and the order of the zone table is the
//! allocation ring.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use crate::allocator::PlacementStrategy;
use crate::error::{Error, Result};
use crate::model::Zone;
use crate::persistence::CredentialStore;

/// Credential content bound to the engine a provider was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    provider: String,
    environment: String,
    engine: String,
    content: Map<String, Value>,
}

impl Credential {
    /// Wrap already-loaded content.
    pub fn new(
        provider: impl Into<String>,
        environment: impl Into<String>,
        engine: impl Into<String>,
        content: Map<String, Value>,
    ) -> Self {
        Self {
            provider: provider.into(),
            environment: environment.into(),
            engine: engine.into(),
            content,
        }
    }

    /// Load from the store. Absence is `NotFound`, never an empty default.
    pub async fn load(
        store: &dyn CredentialStore,
        provider: &str,
        environment: &str,
        engine: &str,
    ) -> Result<Self> {
        let content = store
            .get(provider, environment)
            .await?
            .ok_or_else(|| Error::not_found("credential", format!("{provider}/{environment}")))?;

        tracing::debug!(provider, environment, "Loaded credential");
        Ok(Self::new(provider, environment, engine, content))
    }

    /// Provider identifier.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Environment name.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Engine the credential was loaded for.
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Raw document.
    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    /// Required field.
    pub fn field(&self, key: &str) -> Result<&Value> {
        self.content
            .get(key)
            .ok_or_else(|| Error::validation(key, "missing from credential"))
    }

    /// Required string field.
    pub fn str_field(&self, key: &str) -> Result<&str> {
        self.field(key)?
            .as_str()
            .ok_or_else(|| Error::validation(key, "must be a string"))
    }

    /// Optional string field.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Every entry of the zone table stored under `field`, in document order.
    pub fn zone_table(&self, field: &str) -> Result<Vec<Zone>> {
        parse_zone_table(field, self.field(field)?)
    }

    /// Entries of the zone table that take part in allocation.
    pub fn active_zones(&self, field: &str) -> Result<Vec<Zone>> {
        Ok(self
            .zone_table(field)?
            .into_iter()
            .filter(|z| z.active)
            .collect())
    }

    /// Offering id for `{cpu}c{memory}m`.
    pub fn offering_to(&self, cpu: i32, memory: i32) -> Result<&str> {
        let key = format!("{cpu}c{memory}m");
        let offering = self
            .field("offerings")?
            .get(&key)
            .ok_or_else(|| Error::validation(format!("offerings.{key}"), "no such offering"))?;

        offering
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| offering.as_str())
            .ok_or_else(|| Error::validation(format!("offerings.{key}"), "offering has no id"))
    }

    /// Template (image) reference for an engine.
    pub fn template_to(&self, engine: &str) -> Result<&str> {
        self.field("templates")?
            .get(engine)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation(format!("templates.{engine}"), "no template"))
    }

    /// Template for the engine this credential was loaded for.
    pub fn template(&self) -> Result<&str> {
        self.template_to(&self.engine)
    }

    /// Placement strategy pinned by the `placement` field, if any.
    pub fn placement_override(&self) -> Result<Option<PlacementStrategy>> {
        self.opt_str("placement").map(str::parse).transpose()
    }

    /// `metadata` object flattened to key/value pairs, in document order.
    pub fn metadata_items(&self) -> Vec<(String, String)> {
        let Some(Value::Object(metadata)) = self.content.get("metadata") else {
            return Vec::new();
        };

        metadata
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

fn parse_zone_table(field: &str, table: &Value) -> Result<Vec<Zone>> {
    match table {
        // {name: {active, ...}}: active must be set explicitly
        Value::Object(entries) => entries
            .iter()
            .map(|(name, attributes)| {
                if !attributes.is_object() {
                    return Err(Error::validation(
                        format!("{field}.{name}"),
                        "zone entry must be an object",
                    ));
                }
                Ok(Zone {
                    name: name.clone(),
                    active: attributes
                        .get("active")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    attributes: attributes.clone(),
                })
            })
            .collect(),
        Value::Array(entries) => entries
            .iter()
            .map(|entry| match entry {
                Value::String(name) => Ok(Zone {
                    name: name.clone(),
                    active: true,
                    attributes: Value::Object(Map::new()),
                }),
                Value::Object(attributes) => {
                    let name = attributes.get("name").and_then(Value::as_str).ok_or_else(
                        || Error::validation(field, "zone entry without a name"),
                    )?;
                    Ok(Zone {
                        name: name.to_string(),
                        active: attributes
                            .get("active")
                            .and_then(Value::as_bool)
                            .unwrap_or(true),
                        attributes: entry.clone(),
                    })
                }
                _ => Err(Error::validation(field, "unsupported zone entry")),
            })
            .collect(),
        _ => Err(Error::validation(field, "zone table must be an object or array")),
    }
}

/// Check that `content` has at least `content[minimum_key]` active zones under `field`.
///
/// The minimum may be a number or a numeric string and defaults to zero.
pub fn require_active_zones(
    content: &Map<String, Value>,
    field: &str,
    minimum_key: &str,
) -> Result<()> {
    let minimum = match content.get(minimum_key) {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| Error::validation(minimum_key, "must be a non-negative integer"))?,
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| Error::validation(minimum_key, "must be a non-negative integer"))?,
        Some(_) => return Err(Error::validation(minimum_key, "must be a non-negative integer")),
    };

    let active = match content.get(field) {
        Some(table) => parse_zone_table(field, table)?
            .iter()
            .filter(|z| z.active)
            .count() as u64,
        None => 0,
    };

    if active < minimum {
        return Err(Error::validation(
            field,
            format!("Must be {minimum} active {field} at least"),
        ));
    }
    Ok(())
}

/// Credential fetched on first use and memoized for the provider's lifetime.
pub struct LazyCredential {
    store: Arc<dyn CredentialStore>,
    provider: String,
    environment: String,
    engine: String,
    cell: OnceCell<Credential>,
}

impl LazyCredential {
    /// Nothing is read until [`LazyCredential::get`].
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provider: impl Into<String>,
        environment: impl Into<String>,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider: provider.into(),
            environment: environment.into(),
            engine: engine.into(),
            cell: OnceCell::new(),
        }
    }

    /// Load on first call, then return the memoized view.
    pub async fn get(&self) -> Result<&Credential> {
        self.cell
            .get_or_try_init(|| {
                Credential::load(
                    self.store.as_ref(),
                    &self.provider,
                    &self.environment,
                    &self.engine,
                )
            })
            .await
    }
}
