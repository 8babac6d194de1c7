// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::controllers::{split_key, ResourceHandler};
use crate::error::{LazyError, Result};
use crate::lazy::Recompute;
use crate::model::{ServiceSnapshot, StateStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use std::sync::Arc;
use tracing::debug;

/// Tracks one cluster's services.
///
/// Any change to the merged view of a service can hide or reveal it for every lazy service,
/// so changes schedule a full recompute.
pub struct ServiceReconciler {
    cluster: String,
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
}

impl ServiceReconciler {
    pub fn new(cluster: impl Into<String>, store: Arc<StateStore>, recompute: Arc<dyn Recompute>) -> Self {
        Self {
            cluster: cluster.into(),
            store,
            recompute,
        }
    }

    fn id(&self, key: &str) -> Result<(String, String, String)> {
        match split_key(key)? {
            (Some(namespace), name) => Ok((
                self.store.service_id(name, namespace),
                name.to_string(),
                namespace.to_string(),
            )),
            (None, _) => Err(LazyError::InvalidKey(key.to_string())),
        }
    }

    fn changed(&self, id: &str) {
        self.recompute.service(id);
        self.recompute.all();
    }
}

#[async_trait]
impl ResourceHandler<Service> for ServiceReconciler {
    fn needs_update(&self, old: &Service, new: &Service) -> bool {
        ServiceSnapshot::from_k8s(old) != ServiceSnapshot::from_k8s(new)
    }

    async fn sync(&self, key: &str, svc: Arc<Service>) -> Result<()> {
        let (id, name, namespace) = self.id(key)?;
        let snapshot = ServiceSnapshot::from_k8s(&svc);
        if self.store.update_service(&self.cluster, &name, &namespace, snapshot)? {
            debug!("Service {} changed in {}", id, self.cluster);
            self.changed(&id);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (id, _, _) = self.id(key)?;
        if self.store.delete_service(&self.cluster, &id) {
            debug!("Service {} deleted from {}", id, self.cluster);
            self.changed(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NamespaceSnapshot;
    use crate::test_utils::RecordingRecompute;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use kube::api::ObjectMeta;
    use std::collections::{BTreeMap, BTreeSet};

    fn make_service(port_name: &str) -> Arc<Service> {
        Arc::new(Service {
            metadata: ObjectMeta {
                name: Some("orders".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), "orders".to_string())])),
                ports: Some(vec![ServicePort {
                    name: Some(port_name.to_string()),
                    port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn make_reconciler(cluster: &str, store: &Arc<StateStore>, recompute: &Arc<RecordingRecompute>) -> ServiceReconciler {
        ServiceReconciler::new(cluster, store.clone(), recompute.clone())
    }

    #[tokio::test]
    async fn test_retries_until_namespace_is_known() {
        let store = Arc::new(StateStore::new("cluster.local"));
        let recompute = Arc::new(RecordingRecompute::default());
        let reconciler = make_reconciler("east", &store, &recompute);

        let result = reconciler.sync("ns1/orders", make_service("http")).await;
        assert!(matches!(result, Err(LazyError::NamespaceNotFound(_))));

        store.update_namespace("east", "ns1", NamespaceSnapshot::default());
        reconciler.sync("ns1/orders", make_service("http")).await.unwrap();
        assert_eq!(recompute.all_count(), 1);

        // Re-delivery of the same object is a no-op
        reconciler.sync("ns1/orders", make_service("http")).await.unwrap();
        assert_eq!(recompute.all_count(), 1);
    }

    #[tokio::test]
    async fn test_port_is_http_only_if_http_everywhere() {
        let store = Arc::new(StateStore::new("cluster.local"));
        let recompute = Arc::new(RecordingRecompute::default());
        for cluster in ["east", "west", "north"] {
            store.update_namespace(cluster, "ns1", NamespaceSnapshot::default());
        }

        make_reconciler("east", &store, &recompute).sync("ns1/orders", make_service("http")).await.unwrap();
        make_reconciler("west", &store, &recompute).sync("ns1/orders", make_service("http-api")).await.unwrap();
        make_reconciler("north", &store, &recompute).sync("ns1/orders", make_service("tcp")).await.unwrap();

        let spec = store.service("orders.ns1.svc.cluster.local").unwrap().spec();
        assert!(spec.http_ports.is_empty());
        assert_eq!(spec.tcp_ports, BTreeSet::from([8080]));

        make_reconciler("north", &store, &recompute).delete("ns1/orders").await.unwrap();
        let spec = store.service("orders.ns1.svc.cluster.local").unwrap().spec();
        assert_eq!(spec.http_ports, BTreeSet::from([8080]));
    }

    #[tokio::test]
    async fn test_delete_schedules_removed_service() {
        let store = Arc::new(StateStore::new("cluster.local"));
        let recompute = Arc::new(RecordingRecompute::default());
        store.update_namespace("east", "ns1", NamespaceSnapshot::default());
        let reconciler = make_reconciler("east", &store, &recompute);
        reconciler.sync("ns1/orders", make_service("http")).await.unwrap();

        reconciler.delete("ns1/orders").await.unwrap();

        assert!(store.service("orders.ns1.svc.cluster.local").is_none());
        assert_eq!(
            recompute.services(),
            vec!["orders.ns1.svc.cluster.local", "orders.ns1.svc.cluster.local"]
        );
        assert!(reconciler.delete("orders").await.is_err());
    }
}
