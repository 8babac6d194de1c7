// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::controllers::ResourceHandler;
use crate::error::Result;
use crate::kubernetes::config_api::is_managed;
use crate::lazy::Recompute;
use crate::model::StateStore;
use crate::types::VirtualService;
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Records which in-mesh services each user VirtualService binds together
pub struct VirtualServiceReconciler {
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
}

impl VirtualServiceReconciler {
    pub fn new(store: Arc<StateStore>, recompute: Arc<dyn Recompute>) -> Self {
        Self { store, recompute }
    }

    fn bound_services(&self, vs: &VirtualService) -> BTreeSet<String> {
        let namespace = vs.namespace().unwrap_or_default();
        vs.spec
            .referenced_hosts()
            .filter_map(|host| self.store.resolve_host(host, &namespace))
            .collect()
    }
}

#[async_trait]
impl ResourceHandler<VirtualService> for VirtualServiceReconciler {
    fn needs_update(&self, old: &VirtualService, new: &VirtualService) -> bool {
        old.spec != new.spec || is_managed(old.meta()) != is_managed(new.meta())
    }

    async fn sync(&self, key: &str, vs: Arc<VirtualService>) -> Result<()> {
        // The gateway routing table is ours and binds everything
        let services = if is_managed(vs.meta()) {
            BTreeSet::new()
        } else {
            self.bound_services(&vs)
        };

        let changed = if services.len() > 1 {
            self.store.update_binding(key, services)
        } else {
            self.store.delete_binding(key)
        };
        if changed {
            debug!("Binding of VirtualService {} changed", key);
            self.recompute.all();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.store.delete_binding(key) {
            self.recompute.all();
        }
        Ok(())
    }
}
