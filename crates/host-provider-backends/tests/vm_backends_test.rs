// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CloudStack, EC2 and Azure back-ends driven through the service against
//! the in-memory compute vendor.

mod common;

use common::{ENGINE, Harness, request};
use host_provider_core::{Error, VendorError};
use serde_json::{Map, Value, json};

fn cloudstack_credential() -> Value {
    json!({
        "mimOfZones": 2,
        "endpoint": "https://cloud.example.com/client/api",
        "offerings": {
            "2c2048m": {"id": "off-medium"},
            "4c4096m": {"id": "off-large"}
        },
        "templates": {
            "mongodb_4_2_3": "tpl-mongo-4",
            "mongodb_5_0_0": "tpl-mongo-5"
        },
        "zones": {
            "zone-a": {"active": true, "networks": {"mongodb_4_2_3": [{"networkId": "net-a"}]}},
            "zone-b": {"active": true, "networks": {"mongodb_4_2_3": [{"networkId": "net-b"}]}},
            "zone-c": {"active": true, "networks": {"mongodb_4_2_3": [{"networkId": "net-c"}]}}
        }
    })
}

fn ec2_credential() -> Value {
    json!({
        "region": "eu-west-1",
        "image_id": "ami-0abc",
        "security_group_id": "sg-db",
        "keyname": "ops",
        "templates": {"mongodb_4_2_3": "ami-mongo-4"},
        "subnets": {
            "subnet-1": {"active": true},
            "subnet-2": {"active": true}
        }
    })
}

fn azure_credential() -> Value {
    json!({
        "mimOfSubnets": 1,
        "resource_group": "rg-databases",
        "templates": {"mongodb_4_2_3": "img-mongo-4"},
        "subnets": {"subnet-a": {"active": true}, "subnet-b": {"active": true}}
    })
}

#[tokio::test]
async fn test_cloudstack_round_robin_and_networks() {
    let h = Harness::new()
        .with_credential("cloudstack", cloudstack_credential())
        .await;

    let mut zones = Vec::new();
    for name in ["rs-0", "rs-1", "rs-2"] {
        let host = h
            .service
            .create_host(request("cloudstack", name, "infra-1"))
            .await
            .expect("Failed to create host");
        zones.push(host.zone.expect("zoned host"));
    }
    assert_eq!(zones, vec!["zone-a", "zone-b", "zone-c"]);

    let inserted = h.compute.inserted().await;
    assert_eq!(inserted.len(), 3);
    assert_eq!(inserted[1].networks, vec!["net-b"]);
    assert_eq!(inserted[0].offering, "off-medium");
    assert_eq!(inserted[0].image, "tpl-mongo-4");
    assert_eq!(inserted[0].labels.get("engine").map(String::as_str), Some("mongodb"));
    assert_eq!(inserted[0].labels.get("group").map(String::as_str), Some("infra-1"));
    assert_eq!(inserted[0].labels.get("origin").map(String::as_str), Some("dbaas"));
}

#[tokio::test]
async fn test_cloudstack_restore_rebuilds_in_place() {
    let h = Harness::new()
        .with_credential("cloudstack", cloudstack_credential())
        .await;
    let host = h
        .service
        .create_host(request("cloudstack", "rs-0", "infra-1"))
        .await
        .unwrap();
    let id = host.id.unwrap();

    let restored = h
        .service
        .restore_host(id, Some("mongodb_5_0_0"), &Map::new())
        .await
        .expect("Failed to restore");

    assert_eq!(restored.identifier, host.identifier);
    assert_eq!(restored.engine, "mongodb_5_0_0");
    assert_eq!(h.compute.rebuilds().await, 1);
    assert_eq!(h.compute.instance_count().await, 1);
    let instance = h.compute.instance_named("rs-0").await.unwrap();
    assert_eq!(instance.image, "tpl-mongo-5");
}

#[tokio::test]
async fn test_cloudstack_resize_uses_credential_offerings() {
    let h = Harness::new()
        .with_credential("cloudstack", cloudstack_credential())
        .await;
    let host = h
        .service
        .create_host(request("cloudstack", "rs-0", "infra-1"))
        .await
        .unwrap();
    let id = host.id.unwrap();

    let resized = h.service.resize_host(id, 4, 4096).await.unwrap();
    assert_eq!((resized.cpu, resized.memory), (4, 4096));
    assert_eq!(
        h.compute.instance_named("rs-0").await.unwrap().offering,
        "off-large"
    );

    let err = h.service.resize_host(id, 8, 1).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(h.service.get_host(id, false).await.unwrap().cpu, 4);
}

#[tokio::test]
async fn test_cloudstack_credential_validation() {
    let h = Harness::new();
    let mut credential = common::object(cloudstack_credential());
    credential.insert("mimOfZones".to_string(), json!(4));

    let err = h
        .service
        .credential_add("cloudstack", common::ENVIRONMENT, &credential)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Validation error for 'zones': Must be 4 active zones at least"
    );
}

#[tokio::test]
async fn test_ec2_offering_from_catalogue() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;

    let host = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .unwrap();
    assert_eq!(host.zone.as_deref(), Some("subnet-1"));

    let inserted = h.compute.inserted().await;
    assert_eq!(inserted[0].offering, "medium");
    assert_eq!(inserted[0].image, "ami-0abc");
    assert_eq!(inserted[0].security_groups, vec!["sg-db"]);
    assert_eq!(inserted[0].project.as_deref(), Some("ops"));

    let mut odd = request("ec2", "cache-1", "infra-2");
    odd.cpu = 3;
    odd.memory = 3000;
    let err = h.service.create_host(odd).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "offering", .. }));
}

#[tokio::test]
async fn test_ec2_power_cycle() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;
    let host = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .unwrap();
    let id = host.id.unwrap();

    h.service.stop_host(id).await.expect("Failed to stop");
    assert_eq!(
        h.compute.instance_named("cache-0").await.unwrap().status.to_string(),
        "stopped"
    );
    h.service.start_host(id).await.expect("Failed to start");
    assert_eq!(
        h.compute.instance_named("cache-0").await.unwrap().status.to_string(),
        "running"
    );
}

#[tokio::test]
async fn test_ec2_create_failure_not_retried() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;
    h.compute
        .fail_next_insert(VendorError::retryable("ec2", "InsufficientInstanceCapacity"))
        .await;

    let err = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .unwrap_err();

    // One attempt only for this back-end.
    assert!(err.is_retryable());
    assert_eq!(h.compute.instance_count().await, 0);
}

#[tokio::test]
async fn test_ec2_destroy_tolerates_missing_instance() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;
    let host = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .unwrap();
    h.compute.remove_instance("cache-0").await.unwrap();

    h.service
        .destroy_host(host.id.unwrap())
        .await
        .expect("Destroy should tolerate a missing instance");
    assert!(matches!(
        h.service.get_host(host.id.unwrap(), false).await,
        Err(Error::NotFound { kind: "host", .. })
    ));
}

#[tokio::test]
async fn test_azure_sanitizes_vendor_name() {
    let h = Harness::new().with_credential("azure", azure_credential()).await;

    let host = h
        .service
        .create_host(request("azure", "db-infra-7-0", "infra-7"))
        .await
        .unwrap();

    assert_eq!(host.name, "db-infra-7-0");
    assert!(h.compute.instance_named("dbinfra70").await.is_some());
    let inserted = h.compute.inserted().await;
    assert_eq!(inserted[0].project.as_deref(), Some("rg-databases"));
    assert_eq!(inserted[0].image, "img-mongo-4");
    assert_eq!(
        inserted[0].labels.get("host").map(String::as_str),
        Some("db-infra-7-0")
    );

    let err = h
        .service
        .create_host(request("azure", "123-456", "infra-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_azure_restore_recreates() {
    let h = Harness::new().with_credential("azure", azure_credential()).await;
    let host = h
        .service
        .create_host(request("azure", "db-infra-7-0", "infra-7"))
        .await
        .unwrap();

    let restored = h
        .service
        .restore_host(host.id.unwrap(), None, &Map::new())
        .await
        .expect("Failed to restore");

    assert_ne!(restored.identifier, host.identifier);
    assert_eq!(restored.zone, host.zone);
    assert!(!restored.recreating);
    assert_eq!(restored.engine, ENGINE);
    assert_eq!(h.compute.instance_count().await, 1);
    assert_eq!(h.compute.rebuilds().await, 0);
}

#[tokio::test]
async fn test_azure_restore_ignores_terminated_instance() {
    let h = Harness::new().with_credential("azure", azure_credential()).await;
    h.compute.keep_deleted().await;
    let host = h
        .service
        .create_host(request("azure", "db-infra-7-0", "infra-7"))
        .await
        .unwrap();

    let restored = h
        .service
        .restore_host(host.id.unwrap(), None, &Map::new())
        .await
        .expect("Failed to restore");

    assert_ne!(restored.identifier, host.identifier);
    assert!(!restored.recreating);
    assert_eq!(h.compute.instance_count().await, 1);
    assert_eq!(h.compute.terminated_count().await, 1);
}

#[tokio::test]
async fn test_ec2_create_after_destroy_builds_new_instance() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;
    h.compute.keep_deleted().await;
    let first = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .unwrap();
    h.service.destroy_host(first.id.unwrap()).await.unwrap();

    let second = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .expect("Failed to create over a terminated instance");

    assert_ne!(second.identifier, first.identifier);
    assert_eq!(h.compute.inserted().await.len(), 2);
    assert_eq!(
        h.compute.instance_named("cache-0").await.unwrap().identifier,
        second.identifier
    );
}

#[tokio::test]
async fn test_vendor_client_built_lazily() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;
    let host = h
        .service
        .create_host(request("ec2", "cache-0", "infra-2"))
        .await
        .unwrap();
    let id = host.id.unwrap();
    let after_create = h.compute.connects().await;
    assert_eq!(after_create, 1);

    h.service.get_host(id, false).await.unwrap();
    assert_eq!(h.compute.connects().await, after_create);

    let refreshed = h.service.get_host(id, true).await.unwrap();
    assert_eq!(refreshed.address, host.address);
    assert_eq!(h.compute.connects().await, after_create + 1);
}

#[tokio::test]
async fn test_missing_credential_is_not_found() {
    let h = Harness::new();
    let err = h
        .service
        .create_host(request("cloudstack", "rs-0", "infra-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "credential", .. }));
    assert_eq!(h.compute.connects().await, 0);
}

#[tokio::test]
async fn test_metadata_update_unsupported_on_cloudstack() {
    let h = Harness::new()
        .with_credential("cloudstack", cloudstack_credential())
        .await;
    let host = h
        .service
        .create_host(request("cloudstack", "rs-0", "infra-1"))
        .await
        .unwrap();

    let err = h
        .service
        .update_host_metadata(host.id.unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED");
}

#[tokio::test]
async fn test_service_accounts_unsupported_on_ec2() {
    let h = Harness::new().with_credential("ec2", ec2_credential()).await;

    let err = h
        .service
        .create_service_account("ec2", common::ENVIRONMENT, "db-backup")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "UNSUPPORTED");
}
