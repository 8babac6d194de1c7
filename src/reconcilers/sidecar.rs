// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::namespace_changed;
use crate::controllers::{split_key, ResourceHandler};
use crate::error::{LazyError, Result};
use crate::kubernetes::config_api::is_managed;
use crate::lazy::Recompute;
use crate::model::StateStore;
use crate::types::Sidecar;
use async_trait::async_trait;
use kube::Resource;
use std::sync::Arc;
use tracing::info;

/// Watches Sidecars for user-authored ones, which opt their namespace out of lazy loading
pub struct SidecarReconciler {
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
}

impl SidecarReconciler {
    pub fn new(store: Arc<StateStore>, recompute: Arc<dyn Recompute>) -> Self {
        Self { store, recompute }
    }
}

fn split(key: &str) -> Result<(&str, &str)> {
    match split_key(key)? {
        (Some(namespace), name) => Ok((namespace, name)),
        (None, _) => Err(LazyError::InvalidKey(key.to_string())),
    }
}

#[async_trait]
impl ResourceHandler<Sidecar> for SidecarReconciler {
    fn needs_update(&self, old: &Sidecar, new: &Sidecar) -> bool {
        is_managed(old.meta()) != is_managed(new.meta())
    }

    async fn sync(&self, key: &str, sidecar: Arc<Sidecar>) -> Result<()> {
        let (namespace, name) = split(key)?;
        let change = if is_managed(sidecar.meta()) {
            self.store.remove_opt_out(namespace, name)
        } else {
            self.store.add_opt_out(namespace, name)
        };
        if change.status_changed {
            info!("Sidecar {} changed lazy loading of namespace {}", key, namespace);
            namespace_changed(&self.store, self.recompute.as_ref(), namespace);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (namespace, name) = split(key)?;
        if self.store.remove_opt_out(namespace, name).status_changed {
            info!("Sidecar {} removed, re-evaluating namespace {}", key, namespace);
            namespace_changed(&self.store, self.recompute.as_ref(), namespace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::config_api::managed_labels;
    use crate::model::{LazyStatus, NamespaceSnapshot, ServiceSnapshot};
    use crate::test_utils::RecordingRecompute;
    use crate::types::SidecarSpec;
    use std::collections::BTreeMap;

    fn make_sidecar(name: &str, managed: bool) -> Arc<Sidecar> {
        let mut sidecar = Sidecar::new(name, SidecarSpec::default());
        sidecar.metadata.namespace = Some("ns1".to_string());
        if managed {
            sidecar.metadata.labels = Some(managed_labels());
        }
        Arc::new(sidecar)
    }

    #[tokio::test]
    async fn test_user_sidecar_disables_namespace() {
        let store = Arc::new(StateStore::new("cluster.local"));
        store.update_namespace("east", "ns1", NamespaceSnapshot { lazy: true, labels: BTreeMap::new() });
        let snapshot = ServiceSnapshot {
            http_ports: [8080].into(),
            selector: BTreeMap::from([("app".to_string(), "orders".to_string())]),
            ..Default::default()
        };
        store.update_service("east", "orders", "ns1", snapshot).unwrap();
        let recompute = Arc::new(RecordingRecompute::default());
        let reconciler = SidecarReconciler::new(store.clone(), recompute.clone());

        // Our own objects never count as an opt-out
        reconciler.sync("ns1/lazyscope-orders", make_sidecar("lazyscope-orders", true)).await.unwrap();
        assert_eq!(store.namespace_status("ns1"), LazyStatus::Enabled);

        reconciler.sync("ns1/custom", make_sidecar("custom", false)).await.unwrap();
        assert_eq!(store.namespace_status("ns1"), LazyStatus::Disabled);
        assert!(!store.service("orders.ns1.svc.cluster.local").unwrap().spec().lazy_enabled);
        assert_eq!(recompute.services(), vec!["orders.ns1.svc.cluster.local"]);

        reconciler.delete("ns1/custom").await.unwrap();
        assert_eq!(store.namespace_status("ns1"), LazyStatus::Enabled);
        assert!(store.service("orders.ns1.svc.cluster.local").unwrap().spec().lazy_enabled);
    }
}
