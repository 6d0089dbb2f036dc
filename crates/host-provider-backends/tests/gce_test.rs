// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GCE back-end: static IPs, anti-collocation, recreate restore and service
//! accounts.

mod common;

use common::{Harness, request};
use host_provider_core::{Error, Host, VendorError};
use serde_json::{Map, Value, json};

fn credential() -> Value {
    json!({
        "project": "db-project",
        "region": "us-east1",
        "subnetwork": "regions/us-east1/subnetworks/databases",
        "network_tag": "mongodb",
        "template_project": "db-images",
        "templates": {"mongodb_4_2_3": "mongo-4-2-3-v7"},
        "offerings": {"2c2048m": "n1-standard-2"},
        "availability_zones": ["us-east1-b", "us-east1-c", "us-east1-d"],
        "metadata": {"team": "storage", "backup": true}
    })
}

async fn harness() -> Harness {
    Harness::new().with_credential("gce", credential()).await
}

async fn create_with_ip(h: &Harness, name: &str, group: &str) -> Result<Host, Error> {
    h.service
        .create_static_ip("gce", common::ENVIRONMENT, group, name)
        .await?;
    h.service.create_host(request("gce", name, group)).await
}

#[tokio::test]
async fn test_create_requires_static_ip() {
    let h = harness().await;

    let err = h
        .service
        .create_host(request("gce", "rs-0", "infra-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { kind: "static_ip", .. }));
    assert!(h.compute.inserted().await.is_empty());
}

#[tokio::test]
async fn test_replicas_spread_over_zones() {
    let h = harness().await;

    let mut zones = Vec::new();
    for name in ["rs-0", "rs-1", "rs-2"] {
        let host = create_with_ip(&h, name, "infra-1").await.unwrap();
        assert_eq!(Some(host.address.clone()), h.compute.address(name).await);
        zones.push(host.zone.unwrap());
    }
    zones.sort();
    zones.dedup();
    assert_eq!(zones.len(), 3, "replicas must not share a zone");

    let err = create_with_ip(&h, "rs-3", "infra-1").await.unwrap_err();
    assert!(matches!(err, Error::PlacementExhausted { .. }));
    assert_eq!(h.compute.instance_count().await, 3);
}

#[tokio::test]
async fn test_instance_spec() {
    let h = harness().await;
    let host = create_with_ip(&h, "rs-0", "infra-1").await.unwrap();
    let zone = host.zone.unwrap();

    let spec = h.compute.inserted().await.remove(0);
    assert_eq!(
        spec.offering,
        format!("zones/{zone}/machineTypes/n1-standard-2")
    );
    assert_eq!(spec.image, "projects/db-images/global/images/mongo-4-2-3-v7");
    assert_eq!(spec.project.as_deref(), Some("db-project"));
    assert_eq!(spec.security_groups, vec!["mongodb"]);
    assert_eq!(
        spec.labels.get("infra_name").map(String::as_str),
        Some("infra-1")
    );
    assert_eq!(
        spec.metadata,
        vec![
            ("team".to_string(), "storage".to_string()),
            ("backup".to_string(), "true".to_string())
        ]
    );
}

#[tokio::test]
async fn test_retryable_failure_moves_to_next_zone() {
    let h = harness().await;
    h.compute
        .fail_next_insert(VendorError::retryable("gce", "ZONE_RESOURCE_POOL_EXHAUSTED"))
        .await;

    let host = create_with_ip(&h, "rs-0", "infra-1").await.unwrap();

    let inserted = h.compute.inserted().await;
    assert_eq!(inserted.len(), 2);
    assert_ne!(inserted[0].zone, inserted[1].zone);
    assert_eq!(host.zone, inserted[1].zone);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let h = harness().await;
    h.compute
        .fail_next_insert(VendorError::fatal("gce", "image not found"))
        .await;

    let err = create_with_ip(&h, "rs-0", "infra-1").await.unwrap_err();

    assert!(matches!(err, Error::Vendor(ref e) if !e.retryable));
    assert_eq!(h.compute.inserted().await.len(), 1);
}

#[tokio::test]
async fn test_restore_recreates_on_same_address() {
    let h = harness().await;
    let host = create_with_ip(&h, "rs-0", "infra-1").await.unwrap();

    let restored = h
        .service
        .restore_host(host.id.unwrap(), None, &Map::new())
        .await
        .expect("Failed to restore");

    assert_ne!(restored.identifier, host.identifier);
    assert_eq!(restored.address, host.address);
    assert_eq!(restored.zone, host.zone);
    assert!(!restored.recreating);
    assert_eq!(h.compute.instance_count().await, 1);
}

#[tokio::test]
async fn test_update_metadata() {
    let h = harness().await;
    let host = create_with_ip(&h, "rs-0", "infra-1").await.unwrap();
    h.service
        .credential_add(
            "gce",
            common::ENVIRONMENT,
            &common::object(json!({
                "project": "db-project",
                "region": "us-east1",
                "subnetwork": "regions/us-east1/subnetworks/databases",
                "network_tag": "mongodb",
                "template_project": "db-images",
                "templates": {"mongodb_4_2_3": "mongo-4-2-3-v7"},
                "offerings": {"2c2048m": "n1-standard-2"},
                "availability_zones": ["us-east1-b", "us-east1-c", "us-east1-d"],
                "metadata": {"team": "platform"}
            })),
        )
        .await
        .unwrap();

    h.service
        .update_host_metadata(host.id.unwrap())
        .await
        .expect("Failed to update metadata");

    let instance = h.compute.instance_named("rs-0").await.unwrap();
    assert_eq!(
        instance.metadata,
        vec![("team".to_string(), "platform".to_string())]
    );
}

#[tokio::test]
async fn test_static_ip_release_after_host_destroyed() {
    let h = harness().await;
    let host = create_with_ip(&h, "rs-0", "infra-1").await.unwrap();

    let err = h
        .service
        .destroy_static_ip("gce", common::ENVIRONMENT, "rs-0")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    h.service.destroy_host(host.id.unwrap()).await.unwrap();
    let removed = h
        .service
        .destroy_static_ip("gce", common::ENVIRONMENT, "rs-0")
        .await
        .unwrap();
    assert!(removed);
    assert_eq!(h.compute.address("rs-0").await, None);

    // Releasing again is a no-op.
    assert!(
        !h.service
            .destroy_static_ip("gce", common::ENVIRONMENT, "rs-0")
            .await
            .unwrap()
    );
}

const ACCOUNT: &str = "db-backup@db-project.iam.gserviceaccount.com";

fn credential_with(fields: Value) -> Value {
    let mut content = credential();
    if let (Value::Object(content), Value::Object(fields)) = (&mut content, fields) {
        content.extend(fields);
    }
    content
}

#[tokio::test]
async fn test_service_account_create_and_destroy() {
    let h = harness().await;

    let email = h
        .service
        .create_service_account("gce", common::ENVIRONMENT, "db-backup")
        .await
        .expect("Failed to create service account");
    assert_eq!(email, "db-backup@db-project.iam.gserviceaccount.com");
    assert!(h.compute.service_account_exists(&email).await);

    h.service
        .destroy_service_account("gce", common::ENVIRONMENT, &email)
        .await
        .unwrap();
    assert!(!h.compute.service_account_exists(&email).await);

    // An account that is already gone counts as deleted.
    h.service
        .destroy_service_account("gce", common::ENVIRONMENT, &email)
        .await
        .expect("Missing account should be tolerated");
}

#[tokio::test]
async fn test_service_account_roles_through_group() {
    let h = Harness::new()
        .with_credential(
            "gce",
            credential_with(json!({"group_id": "dbaas-sa@example.com"})),
        )
        .await;
    let email = h
        .service
        .create_service_account("gce", common::ENVIRONMENT, "db-backup")
        .await
        .unwrap();

    h.service
        .set_service_account_roles("gce", common::ENVIRONMENT, &email)
        .await
        .expect("Failed to grant roles");

    assert_eq!(
        h.compute.group_members("groups/dbaas-sa@example.com").await,
        vec![email]
    );
    assert!(h.compute.published().await.is_empty());
}

#[tokio::test]
async fn test_service_account_roles_through_pubsub() {
    let h = Harness::new()
        .with_credential(
            "gce",
            credential_with(json!({
                "pubsub": "sa-roles",
                "roles": ["roles/storage.objectAdmin", "roles/monitoring.metricWriter"]
            })),
        )
        .await;
    let email = h
        .service
        .create_service_account("gce", common::ENVIRONMENT, "db-backup")
        .await
        .unwrap();

    h.service
        .set_service_account_roles("gce", common::ENVIRONMENT, &email)
        .await
        .expect("Failed to grant roles");

    let published = h.compute.published().await;
    assert_eq!(published.len(), 1);
    let (topic, attributes) = &published[0];
    assert_eq!(topic, "projects/db-project/topics/sa-roles");
    assert!(attributes.contains(&("service_account".to_string(), email.clone())));
    assert!(attributes.contains(&("project".to_string(), "db-project".to_string())));
}

#[tokio::test]
async fn test_service_account_roles_not_applied() {
    let h = Harness::new()
        .with_credential(
            "gce",
            credential_with(json!({"pubsub": "sa-roles", "roles": ["roles/storage.objectAdmin"]})),
        )
        .await;
    h.compute.hold_role_grants().await;

    let err = h
        .service
        .set_service_account_roles("gce", common::ENVIRONMENT, ACCOUNT)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnexpectedState { .. }));
}

#[tokio::test]
async fn test_service_account_roles_need_pubsub_settings() {
    let h = harness().await;

    let err = h
        .service
        .set_service_account_roles("gce", common::ENVIRONMENT, ACCOUNT)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { ref field, .. } if field == "pubsub"));
    assert!(h.compute.published().await.is_empty());
}
