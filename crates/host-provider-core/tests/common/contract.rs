// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Behaviour every store implementation must share.
//!
//! Each check scopes its rows by `environment` (and name prefixes) so it can
//! run against a shared database.

use chrono::Utc;
use host_provider_core::{
    CredentialStore, Error, Host, HostStore, StaticIp, StaticIpStore, ZoneLedger,
};
use serde_json::{Map, Value, json};

pub fn host(environment: &str, name: &str, group: &str) -> Host {
    let now = Utc::now();
    Host {
        id: None,
        name: name.to_string(),
        group: group.to_string(),
        engine: "redis_6_0_5".to_string(),
        environment: environment.to_string(),
        cpu: 1,
        memory: 512,
        provider: "gce".to_string(),
        identifier: format!("{environment}-{name}"),
        address: "10.0.0.1".to_string(),
        zone: Some("us-east1-b".to_string()),
        recreating: false,
        created_at: now,
        updated_at: now,
    }
}

pub async fn credentials<S: CredentialStore>(store: &S, environment: &str) {
    assert_eq!(store.get("gce", environment).await.unwrap(), None);

    let Value::Object(content) = json!({
        "zeta": 1,
        "alpha": {"b": 2, "a": 1},
        "availability_zones": {"us-east1-b": {"active": true}}
    }) else {
        unreachable!()
    };
    store.upsert("gce", environment, &content).await.unwrap();

    let stored = store.get("gce", environment).await.unwrap().unwrap();
    let keys: Vec<&String> = stored.keys().collect();
    assert_eq!(keys, ["zeta", "alpha", "availability_zones"]);

    let mut replaced = Map::new();
    replaced.insert("project".to_string(), json!("p-1"));
    store.upsert("gce", environment, &replaced).await.unwrap();
    assert_eq!(store.get("gce", environment).await.unwrap(), Some(replaced));

    assert!(store.delete("gce", environment).await.unwrap());
    assert!(!store.delete("gce", environment).await.unwrap());
}

pub async fn ledger<S: ZoneLedger>(store: &S, environment: &str) {
    assert!(!store.has_groups("gce", environment).await.unwrap());
    assert_eq!(store.get_latest_zone("gce", environment).await.unwrap(), None);

    store.upsert_latest_zone_if_absent("gce", environment, "a").await.unwrap();
    store.upsert_latest_zone_if_absent("gce", environment, "b").await.unwrap();
    assert_eq!(
        store.get_latest_zone("gce", environment).await.unwrap().as_deref(),
        Some("a")
    );

    store.upsert_group_zone("gce", environment, "g1", "a").await.unwrap();
    store.upsert_group_zone("gce", environment, "g1", "b").await.unwrap();
    store.upsert_group_zone("gce", environment, "g2", "c").await.unwrap();
    assert_eq!(
        store.get_group_zone("gce", environment, "g1").await.unwrap().as_deref(),
        Some("b")
    );
    // Same group name on another back-end is a separate row.
    assert_eq!(store.get_group_zone("ec2", environment, "g1").await.unwrap(), None);

    store.delete_group("gce", environment, "g1").await.unwrap();
    assert!(store.has_groups("gce", environment).await.unwrap());
    store.delete_group("gce", environment, "g2").await.unwrap();
    assert!(!store.has_groups("gce", environment).await.unwrap());

    store.delete_latest_zone("gce", environment).await.unwrap();
    assert_eq!(store.get_latest_zone("gce", environment).await.unwrap(), None);
}

pub async fn hosts<S: HostStore>(store: &S, environment: &str) {
    let group = format!("{environment}-group");

    let first = store.save(&host(environment, "h1", &group)).await.unwrap();
    let id = first.id.expect("saved host has an id");
    assert_eq!(store.get(id).await.unwrap().as_ref(), Some(&first));

    let second = store.save(&host(environment, "h2", &group)).await.unwrap();
    let names: Vec<String> = store
        .filter(&group)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.name)
        .collect();
    assert_eq!(names, ["h1", "h2"]);

    let mut updated = first.clone();
    updated.recreating = true;
    updated.cpu = 8;
    let updated = store.save(&updated).await.unwrap();
    assert_eq!(updated.id, Some(id));
    assert!(updated.recreating);
    assert_eq!(store.get(id).await.unwrap().unwrap().cpu, 8);

    let found = store
        .find_by_name("gce", environment, "h2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, second.id);
    assert_eq!(store.find_by_name("ec2", environment, "h2").await.unwrap(), None);

    let err = store
        .save(&host(environment, "h1", &group))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    store.delete(id).await.unwrap();
    store.delete(id).await.unwrap();
    assert_eq!(store.get(id).await.unwrap(), None);

    let mut missing = host(environment, "h9", &group);
    missing.id = Some(i64::MAX);
    assert!(matches!(
        store.save(&missing).await,
        Err(Error::NotFound { .. })
    ));
}

pub async fn static_ips<S: HostStore + StaticIpStore>(store: &S, environment: &str) {
    let name = format!("{environment}-ip");
    let ip = StaticIp {
        id: None,
        name: name.clone(),
        group: "g".to_string(),
        address: "34.1.2.3".to_string(),
        host_id: None,
    };

    let saved = StaticIpStore::save(store, &ip).await.unwrap();
    assert!(saved.id.is_some());
    let again = StaticIpStore::save(store, &ip).await.unwrap();
    assert_eq!(again.id, saved.id);

    let owner = HostStore::save(store, &host(environment, "ip-owner", "g"))
        .await
        .unwrap();
    let owner_id = owner.id.unwrap();
    store.bind(&name, owner_id).await.unwrap();

    let bound = store.get_by_host(owner_id).await.unwrap().unwrap();
    assert_eq!(bound.name, name);
    assert_eq!(bound.host_id, Some(owner_id));

    // Rebinding to the same host is a no-op, another host is refused.
    store.bind(&name, owner_id).await.unwrap();
    let intruder = HostStore::save(store, &host(environment, "ip-intruder", "g"))
        .await
        .unwrap();
    let err = store.bind(&name, intruder.id.unwrap()).await.unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "static_ip"));
    assert_eq!(
        store.get_by_name(&name).await.unwrap().unwrap().host_id,
        Some(owner_id)
    );
    assert!(matches!(
        store.bind("no-such-ip", owner_id).await,
        Err(Error::NotFound { .. })
    ));
    HostStore::delete(store, intruder.id.unwrap()).await.unwrap();

    HostStore::delete(store, owner_id).await.unwrap();
    let released = store.get_by_name(&name).await.unwrap().unwrap();
    assert_eq!(released.host_id, None);

    assert!(StaticIpStore::delete(store, &name).await.unwrap());
    assert!(!StaticIpStore::delete(store, &name).await.unwrap());
}
