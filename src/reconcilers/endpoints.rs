// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::controllers::{split_key, ResourceHandler};
use crate::error::{LazyError, Result};
use crate::model::StateStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Keeps the pod IP reverse index of one cluster current
pub struct EndpointsReconciler {
    cluster: String,
    store: Arc<StateStore>,
}

/// Addresses of all subsets, ready or not
fn pod_ips(endpoints: &Endpoints) -> BTreeSet<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|s| s.addresses.iter().flatten().chain(s.not_ready_addresses.iter().flatten()))
        .map(|a| a.ip.clone())
        .collect()
}

impl EndpointsReconciler {
    pub fn new(cluster: impl Into<String>, store: Arc<StateStore>) -> Self {
        Self {
            cluster: cluster.into(),
            store,
        }
    }

    fn id(&self, key: &str) -> Result<String> {
        match split_key(key)? {
            (Some(namespace), name) => Ok(self.store.service_id(name, namespace)),
            (None, _) => Err(LazyError::InvalidKey(key.to_string())),
        }
    }
}

#[async_trait]
impl ResourceHandler<Endpoints> for EndpointsReconciler {
    fn needs_update(&self, old: &Endpoints, new: &Endpoints) -> bool {
        pod_ips(old) != pod_ips(new)
    }

    async fn sync(&self, key: &str, endpoints: Arc<Endpoints>) -> Result<()> {
        let id = self.id(key)?;
        self.store.update_endpoints(&self.cluster, &id, pod_ips(&endpoints));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let id = self.id(key)?;
        self.store.delete_endpoints(&self.cluster, &id);
        Ok(())
    }
}
