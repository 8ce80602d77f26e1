//! Controller driving the reconciler from store watch events.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use heat_reconciler::config::{ControllerConfig, ReconcilerConfig};
use heat_reconciler::models::{ConditionStatus, ConditionType, HeatSpec, ObjectKey, ObjectKind, ObjectMeta, StoredObject};
use heat_reconciler::orchestration::Controller;
use heat_reconciler::store::ObjectStore;

fn fast_config() -> ReconcilerConfig {
    let mut config = ReconcilerConfig::default();
    config.backoff.base_delay_ms = 10;
    config.backoff.max_delay_seconds = 1;
    config
}

async fn ready(cluster: &TestCluster) -> bool {
    let Some(object) = cluster.object(ObjectKind::Heat, &instance_key()).await else {
        return false;
    };
    let Ok(instance) = heat_reconciler::models::HeatInstance::from_object(&object) else {
        return false;
    };
    instance.status.conditions.status(ConditionType::Ready) == ConditionStatus::True
}

#[tokio::test]
async fn test_controller_converges_instance() {
    let cluster = TestCluster::with_config(fast_config());
    let controller = Controller::new(
        cluster.reconciler.clone(),
        ControllerConfig {
            max_concurrent_reconciles: 2,
            watch_namespace: None,
        },
    );
    let running = tokio::spawn(Arc::clone(&controller).run());

    cluster.create_instance(HeatSpec::new("openstack")).await;
    cluster.create_secret(secret_values("12345678")).await;
    cluster.report_identity_ready().await;

    let converged = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            cluster.provision_requested().await;
            if ready(&cluster).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "instance did not converge under the controller");

    controller.shutdown();
    running.await.unwrap().unwrap();
    assert!(controller.stats().passes() > 0);
    assert_eq!(controller.stats().failed_passes(), 0);
}

#[tokio::test]
async fn test_controller_tears_down_deleted_instance() {
    let cluster = TestCluster::with_config(fast_config());
    cluster.create_instance(HeatSpec::new("openstack")).await;
    cluster.collaborators_ready().await;
    cluster.converge().await;

    let controller = Controller::new(cluster.reconciler.clone(), ControllerConfig::default());
    let running = tokio::spawn(Arc::clone(&controller).run());

    cluster
        .store
        .delete(ObjectKind::Heat, &instance_key())
        .await
        .unwrap();

    let gone = tokio::time::timeout(Duration::from_secs(5), async {
        while cluster.object(ObjectKind::Heat, &instance_key()).await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "instance was not released");
    assert!(cluster.store.owned_by(&instance_key()).is_empty());

    controller.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_controller_ignores_other_namespaces() {
    let cluster = TestCluster::with_config(fast_config());
    let controller = Controller::new(
        cluster.reconciler.clone(),
        ControllerConfig {
            max_concurrent_reconciles: 1,
            watch_namespace: Some("elsewhere".to_string()),
        },
    );
    let running = tokio::spawn(Arc::clone(&controller).run());

    cluster.create_instance(HeatSpec::new("openstack")).await;
    let foreign = StoredObject::from_spec(
        ObjectKind::Heat,
        ObjectMeta::new(ObjectKey::new("elsewhere", "heat")),
        &HeatSpec::new("openstack"),
    )
    .unwrap();
    cluster.store.create(foreign).await.unwrap();

    let watched = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let object = cluster
                .object(ObjectKind::Heat, &ObjectKey::new("elsewhere", "heat"))
                .await
                .unwrap();
            if !object.status.is_null() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(watched.is_ok(), "in-scope instance was never reconciled");

    let ignored = cluster.heat_object().await;
    assert!(ignored.status.is_null());
    assert!(ignored.metadata.finalizers.is_empty());

    controller.shutdown();
    running.await.unwrap().unwrap();
}
