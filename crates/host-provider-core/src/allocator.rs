// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zone allocation.
//!
//! The active zones of a credential, in document order, form a ring. A new
//! host of a group goes to the zone after the one recorded for the group in the
//! [`ZoneLedger`]; a group without a row starts after the environment's
//! latest-used zone; with neither, the first zone of the ring is used.
//!
//! The ledger is read and then upserted without any lock, so two concurrent
//! creates for the same group may pick the same zone. Anti-collocation narrows
//! that window using the zones of the group's live hosts, but it is best-effort
//! and not a guarantee.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::Zone;
use crate::persistence::ZoneLedger;

/// How a back-end chooses zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// The back-end has no zones; the ledger is not used.
    Unzoned,
    /// Next zone after the ledger reference, one candidate per attempt.
    #[default]
    RoundRobin,
    /// Like round-robin, but skips zones already used by live hosts of the group.
    AntiCollocation,
}

impl PlacementStrategy {
    /// Name as written in credentials.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unzoned => "unzoned",
            Self::RoundRobin => "round_robin",
            Self::AntiCollocation => "anti_collocation",
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unzoned" => Ok(Self::Unzoned),
            "round_robin" => Ok(Self::RoundRobin),
            "anti_collocation" => Ok(Self::AntiCollocation),
            other => Err(Error::validation(
                "placement",
                format!("unknown placement strategy '{other}'"),
            )),
        }
    }
}

/// Outcome of [`ZoneAllocator::before_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Chosen zone, `None` for unzoned back-ends.
    pub zone: Option<String>,
    /// Attempt index the zone was chosen for. The next retry uses `attempt + 1`.
    pub attempt: usize,
    /// The caller supplied the zone; the ledger was not consulted.
    pub pinned: bool,
}

/// Zone allocator for one (provider, environment).
pub struct ZoneAllocator {
    ledger: Arc<dyn ZoneLedger>,
    provider: String,
    environment: String,
    ring: Vec<String>,
    strategy: PlacementStrategy,
}

impl ZoneAllocator {
    /// Build the ring from `zones`, keeping only active ones in their given order.
    pub fn new(
        ledger: Arc<dyn ZoneLedger>,
        provider: impl Into<String>,
        environment: impl Into<String>,
        zones: &[Zone],
        strategy: PlacementStrategy,
    ) -> Self {
        Self {
            ledger,
            provider: provider.into(),
            environment: environment.into(),
            ring: zones
                .iter()
                .filter(|z| z.active)
                .map(|z| z.name.clone())
                .collect(),
            strategy,
        }
    }

    /// Active zone names in allocation order.
    pub fn ring(&self) -> &[String] {
        &self.ring
    }

    /// Strategy in use.
    pub fn strategy(&self) -> PlacementStrategy {
        self.strategy
    }

    /// Ring index after `reference`, or 0 when it is no longer in the ring.
    fn index_after(&self, reference: Option<&str>) -> usize {
        match reference.and_then(|r| self.ring.iter().position(|z| z == r)) {
            Some(index) => (index + 1) % self.ring.len(),
            None => 0,
        }
    }

    /// Zone after `reference` in ring order, `None` for an empty ring.
    pub fn next_zone_from(&self, reference: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        Some(self.ring[self.index_after(Some(reference))].as_str())
    }

    /// Group row, falling back to the environment's latest-used row.
    async fn reference_zone(&self, group: &str) -> Result<Option<String>> {
        if let Some(zone) = self
            .ledger
            .get_group_zone(&self.provider, &self.environment, group)
            .await?
        {
            return Ok(Some(zone));
        }
        self.ledger
            .get_latest_zone(&self.provider, &self.environment)
            .await
    }

    /// Choose the zone for create attempt `attempt` of a host in `group`.
    ///
    /// `zone_override` is used verbatim. `occupied` holds the zones of the
    /// group's live hosts and is only consulted for anti-collocation.
    pub async fn before_create(
        &self,
        group: &str,
        zone_override: Option<&str>,
        occupied: &[String],
        attempt: usize,
    ) -> Result<Placement> {
        if let Some(zone) = zone_override {
            return Ok(Placement {
                zone: Some(zone.to_string()),
                attempt,
                pinned: true,
            });
        }

        if self.strategy == PlacementStrategy::Unzoned {
            return Ok(Placement {
                zone: None,
                attempt,
                pinned: false,
            });
        }

        let n = self.ring.len();
        if n == 0 {
            return Err(Error::PlacementExhausted {
                group: group.to_string(),
                attempts: 0,
            });
        }

        let reference = self.reference_zone(group).await?;
        let base = self.index_after(reference.as_deref());

        let chosen = match self.strategy {
            PlacementStrategy::AntiCollocation => (attempt..n)
                .map(|step| (step, &self.ring[(base + step) % n]))
                .find(|(_, zone)| !occupied.contains(zone)),
            _ => (attempt < n).then(|| (attempt, &self.ring[(base + attempt) % n])),
        };

        let Some((step, zone)) = chosen else {
            return Err(Error::PlacementExhausted {
                group: group.to_string(),
                attempts: n,
            });
        };

        debug!(
            provider = %self.provider,
            environment = %self.environment,
            group = %group,
            reference = ?reference,
            zone = %zone,
            attempt = step,
            strategy = %self.strategy,
            "Placement chosen"
        );

        Ok(Placement {
            zone: Some(zone.clone()),
            attempt: step,
            pinned: false,
        })
    }

    /// Record the zone a host of `group` was created in.
    pub async fn after_create(&self, group: &str, zone: &str) -> Result<()> {
        self.ledger
            .upsert_latest_zone_if_absent(&self.provider, &self.environment, zone)
            .await?;
        self.ledger
            .upsert_group_zone(&self.provider, &self.environment, group, zone)
            .await?;

        debug!(group = %group, zone = %zone, "Zone ledger advanced");
        Ok(())
    }

    /// Forget the group. When it was the last group of the environment the
    /// latest-used row goes too, so the ring restarts at its first zone.
    pub async fn remove_group(&self, group: &str) -> Result<()> {
        self.ledger
            .delete_group(&self.provider, &self.environment, group)
            .await?;

        if !self
            .ledger
            .has_groups(&self.provider, &self.environment)
            .await?
        {
            self.ledger
                .delete_latest_zone(&self.provider, &self.environment)
                .await?;
        }

        info!(
            provider = %self.provider,
            environment = %self.environment,
            group = %group,
            "Group removed from zone ledger"
        );
        Ok(())
    }
}
