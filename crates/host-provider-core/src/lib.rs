// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host Provider Core - Database Host Provisioning Engine
//!
//! This crate provisions database hosts on heterogeneous compute back-ends
//! behind one lifecycle contract: create, start, stop, resize, restore and
//! destroy. Callers supply capacity, a group and an engine and get a [`Host`]
//! record back; nothing vendor specific leaks through.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Transport / operator CLI                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        HostProviderService                               │
//! │              (request validation, provider resolution)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LifecycleEngine                                  │
//! │        (placement, create retries, readiness, crash-safe restore)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                        │                          │
//!           ▼                        ▼                          ▼
//! ┌───────────────────┐  ┌───────────────────────┐  ┌─────────────────────────┐
//! │   ZoneAllocator   │  │   Provider (trait)    │  │  HostStore /            │
//! │  ring + ledger    │  │  cloudstack, ec2,     │  │  StaticIpStore          │
//! └───────────────────┘  │  gce, azure, k8s      │  └─────────────────────────┘
//!           │            └───────────────────────┘              │
//!           ▼                                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              PostgreSQL / SQLite / in-memory persistence                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Zone Allocation
//!
//! The active zones of a credential form a ring in document order. A new host
//! of a group is placed in the zone after the group's last one, falling back
//! to the zone after the environment's latest-used zone, then to the first
//! zone. See [`allocator`] for the anti-collocation variant.
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `create_host` | Place, create (with retries on the next zone), wait ready, persist |
//! | `start_host` / `stop_host` | Power change, then wait for the vendor state |
//! | `resize_host` | No vendor call when capacity is unchanged |
//! | `restore_host` | In-place rebuild, or destroy and recreate guarded by `recreating` |
//! | `destroy_host` | Vendor delete, record delete, ledger cleanup for the last host |
//! | `get_host` | Optionally refresh vendor-owned fields |
//! | `set_service_account_roles` | Grant credential roles, polling until the vendor shows them |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HOST_PROVIDER_DATABASE_URL` | Yes | - | `postgres://` or `sqlite:` URL |
//! | `HOST_PROVIDER_CA_CERTS_PATH` | No | system roots | CA bundle for vendor TLS |
//! | `HOST_PROVIDER_HTTP_PROXY` | No | - | `scheme://host:port` proxy |
//! | `HOST_PROVIDER_ORIGIN_TAG` | No | - | `origin` tag on vendor resources |
//! | `HOST_PROVIDER_VERIFY_SSL` | No | `true` | Vendor TLS verification |

#![deny(missing_docs)]

pub mod allocator;
pub mod config;
pub mod credential;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod persistence;
pub mod provider;
pub mod service;

pub use allocator::{Placement, PlacementStrategy, ZoneAllocator};
pub use config::{ClientSettings, Config, ConfigError, ProxySettings};
pub use credential::{Credential, LazyCredential};
pub use error::{Error, Result, VendorError};
pub use lifecycle::{HostSpec, LifecycleEngine};
pub use model::{Host, StaticIp, Zone};
pub use persistence::{
    CredentialStore, HostStore, MemoryStore, PostgresStore, SqliteStore, StaticIpStore, Stores,
    ZoneLedger,
};
pub use provider::{
    CreateRequest, PollPolicy, PowerState, Provider, ProviderContext, ProviderFactory,
    ProviderRegistry, Readiness, RestoreStrategy, RoleGrant, VendorUnit,
};
pub use service::{CreateHostRequest, HostProviderService};
