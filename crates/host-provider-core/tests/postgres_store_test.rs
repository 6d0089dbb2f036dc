// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store tests.
//!
//! Run with `TEST_HOST_PROVIDER_DATABASE_URL=postgres://...`; skipped otherwise.
//! Every test works in its own environment so runs can share a database.

mod common;

use common::contract;
use host_provider_core::PostgresStore;
use uuid::Uuid;

async fn store() -> Option<PostgresStore> {
    let url = std::env::var("TEST_HOST_PROVIDER_DATABASE_URL").ok()?;
    match PostgresStore::connect(&url).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Skipping test: failed to connect: {e}");
            None
        }
    }
}

fn environment() -> String {
    format!("test-{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_postgres_credentials() {
    skip_if_no_postgres!();
    let Some(store) = store().await else { return };
    contract::credentials(&store, &environment()).await;
}

#[tokio::test]
async fn test_postgres_ledger() {
    skip_if_no_postgres!();
    let Some(store) = store().await else { return };
    contract::ledger(&store, &environment()).await;
}

#[tokio::test]
async fn test_postgres_hosts() {
    skip_if_no_postgres!();
    let Some(store) = store().await else { return };
    contract::hosts(&store, &environment()).await;
}

#[tokio::test]
async fn test_postgres_static_ips() {
    skip_if_no_postgres!();
    let Some(store) = store().await else { return };
    contract::static_ips(&store, &environment()).await;
}
