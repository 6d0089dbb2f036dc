// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for back-end integration tests.

#![allow(dead_code)]

use host_provider_backends::fake::{FakeCompute, FakeWorkload};
use host_provider_backends::{Connectors, default_registry};
use host_provider_core::{
    ClientSettings, CreateHostRequest, HostProviderService, LifecycleEngine, PollPolicy,
    ProviderContext, Stores,
};
use serde_json::{Map, Value};

pub const ENVIRONMENT: &str = "dev";
pub const ENGINE: &str = "mongodb_4_2_3";

pub struct Harness {
    pub stores: Stores,
    pub compute: FakeCompute,
    pub workload: FakeWorkload,
    pub service: HostProviderService,
}

impl Harness {
    pub fn new() -> Self {
        let stores = Stores::in_memory();
        let compute = FakeCompute::new();
        let workload = FakeWorkload::new();

        let context = ProviderContext {
            credentials: stores.credentials.clone(),
            settings: ClientSettings {
                origin_tag: Some("dbaas".to_string()),
                ..ClientSettings::default()
            },
        };
        let registry = default_registry(
            context,
            &Connectors::fake(compute.clone(), workload.clone()),
        );
        let engine = LifecycleEngine::new(&stores).with_poll_policy(PollPolicy::immediate(5));

        Self {
            service: HostProviderService::new(registry, stores.clone()).with_engine(engine),
            stores,
            compute,
            workload,
        }
    }

    pub async fn with_credential(self, provider: &str, content: Value) -> Self {
        self.service
            .credential_add(provider, ENVIRONMENT, &object(content))
            .await
            .expect("Failed to store credential");
        self
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

pub fn request(provider: &str, name: &str, group: &str) -> CreateHostRequest {
    CreateHostRequest {
        provider: provider.to_string(),
        environment: ENVIRONMENT.to_string(),
        cpu: 2,
        memory: 2048,
        name: name.to_string(),
        group: group.to_string(),
        engine: ENGINE.to_string(),
        zone: None,
        extra: Map::new(),
    }
}
