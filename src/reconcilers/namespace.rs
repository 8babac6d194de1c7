// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::namespace_changed;
use crate::controllers::ResourceHandler;
use crate::error::Result;
use crate::lazy::Recompute;
use crate::model::{NamespaceSnapshot, StateStore};
use crate::sync::{SyncEvent, SyncManagerHandle};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks one cluster's namespaces
pub struct NamespaceReconciler {
    cluster: String,
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
    events: SyncManagerHandle,
}

impl NamespaceReconciler {
    pub fn new(
        cluster: impl Into<String>,
        store: Arc<StateStore>,
        recompute: Arc<dyn Recompute>,
        events: SyncManagerHandle,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            store,
            recompute,
            events,
        }
    }

    async fn changed(&self, name: &str, scope_changed: bool) {
        namespace_changed(&self.store, self.recompute.as_ref(), name);
        if scope_changed {
            info!("Namespace {} moved in or out of the discovery scope", name);
            // Services of a namespace entering the scope were dropped earlier
            self.events.send(SyncEvent::ResyncServices).await;
        }
    }
}

#[async_trait]
impl ResourceHandler<Namespace> for NamespaceReconciler {
    fn needs_update(&self, old: &Namespace, new: &Namespace) -> bool {
        NamespaceSnapshot::from_k8s(old) != NamespaceSnapshot::from_k8s(new)
    }

    async fn sync(&self, _key: &str, ns: Arc<Namespace>) -> Result<()> {
        let name = ns.name_any();
        let change = self
            .store
            .update_namespace(&self.cluster, &name, NamespaceSnapshot::from_k8s(&ns));
        debug!("Namespace {} from {}: {:?}", name, self.cluster, change);
        if change.any() {
            self.changed(&name, change.scope_changed).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let change = self.store.delete_namespace(&self.cluster, key);
        if change.any() {
            self.changed(key, false).await;
        }
        Ok(())
    }
}
