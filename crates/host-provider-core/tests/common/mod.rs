// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for host provider integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use host_provider_core::provider::mock::MockFactory;
use host_provider_core::{
    ClientSettings, CredentialStore, HostProviderService, HostSpec, LifecycleEngine, MemoryStore,
    Provider, ProviderContext, ProviderFactory, ProviderRegistry, Stores,
};
use serde_json::{Map, Value, json};

pub const ENGINE: &str = "mongodb_4_2_3";
pub const ENVIRONMENT: &str = "dev";

/// Credential with three active zones and one inactive one.
pub fn zoned_credential() -> Map<String, Value> {
    match json!({
        "zones": {
            "z1": {"active": true},
            "z2": {"active": true},
            "z0": {"active": false},
            "z3": {"active": true}
        },
        "metadata": {"team": "storage"}
    }) {
        Value::Object(content) => content,
        _ => unreachable!(),
    }
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub engine: LifecycleEngine,
    pub factory: MockFactory,
    pub context: ProviderContext,
}

impl TestContext {
    pub async fn new(factory: MockFactory) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert("mock", ENVIRONMENT, &zoned_credential())
            .await
            .expect("Failed to store credential");

        let stores = Stores::from_shared(store.clone());
        Self {
            engine: LifecycleEngine::new(&stores),
            context: ProviderContext {
                credentials: store.clone(),
                settings: ClientSettings::default(),
            },
            stores,
            store,
            factory,
        }
    }

    pub fn provider(&self) -> Box<dyn Provider> {
        self.factory.build(ENVIRONMENT, ENGINE, &self.context)
    }

    pub fn provider_with_engine(&self, engine: &str) -> Box<dyn Provider> {
        self.factory.build(ENVIRONMENT, engine, &self.context)
    }

    pub fn service(&self) -> HostProviderService {
        let registry =
            ProviderRegistry::new(self.context.clone()).with(Arc::new(self.factory.clone()));
        HostProviderService::new(registry, self.stores.clone())
    }
}

pub fn spec(name: &str, group: &str) -> HostSpec {
    HostSpec {
        name: name.to_string(),
        group: group.to_string(),
        cpu: 1,
        memory: 1024,
        zone: None,
        extra: Map::new(),
    }
}

pub mod contract;

/// Skip the test when no PostgreSQL URL is configured.
#[macro_export]
macro_rules! skip_if_no_postgres {
    () => {
        if std::env::var("TEST_HOST_PROVIDER_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_HOST_PROVIDER_DATABASE_URL not set");
            return;
        }
    };
}
