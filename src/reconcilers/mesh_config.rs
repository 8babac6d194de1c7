// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::namespace_changed;
use crate::constants::objects::MESH_CONFIG_KEY;
use crate::controllers::ResourceHandler;
use crate::error::Result;
use crate::kubernetes::MeshConfig;
use crate::lazy::Recompute;
use crate::model::StateStore;
use crate::sync::{SyncEvent, SyncManagerHandle};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::sync::Arc;
use tracing::{error, info};

/// Installs the discovery selectors of the mesh config
pub struct MeshConfigReconciler {
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
    events: SyncManagerHandle,
}

fn mesh_yaml(cm: &ConfigMap) -> &str {
    cm.data
        .as_ref()
        .and_then(|d| d.get(MESH_CONFIG_KEY))
        .map_or("", String::as_str)
}

impl MeshConfigReconciler {
    pub fn new(store: Arc<StateStore>, recompute: Arc<dyn Recompute>, events: SyncManagerHandle) -> Self {
        Self {
            store,
            recompute,
            events,
        }
    }

    async fn install(&self, selectors: Vec<LabelSelector>) {
        let count = selectors.len();
        let Some(changed) = self.store.set_selectors(selectors) else {
            return;
        };
        info!(
            "Discovery selectors updated ({} selectors), {} namespaces changed scope",
            count,
            changed.len()
        );
        for namespace in &changed {
            namespace_changed(&self.store, self.recompute.as_ref(), namespace);
        }
        self.events.send(SyncEvent::ScopeChanged).await;
    }
}

#[async_trait]
impl ResourceHandler<ConfigMap> for MeshConfigReconciler {
    fn needs_update(&self, old: &ConfigMap, new: &ConfigMap) -> bool {
        mesh_yaml(old) != mesh_yaml(new)
    }

    async fn sync(&self, key: &str, cm: Arc<ConfigMap>) -> Result<()> {
        match MeshConfig::parse(mesh_yaml(&cm)) {
            Ok(mesh) => self.install(mesh.discovery_selectors).await,
            // Keep the last good selectors; the next edit is delivered by the watch
            Err(e) => error!("Ignoring mesh config {}: {}", key, e),
        }
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        self.install(Vec::new()).await;
        Ok(())
    }
}
