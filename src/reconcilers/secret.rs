// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Secret reconciler - adds, restarts and removes member clusters from their credential secrets.

use crate::controllers::{split_key, ResourceHandler};
use crate::error::{LazyError, Result};
use crate::sync::ClusterRegistry;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct SecretReconciler {
    registry: Arc<ClusterRegistry>,
    home_cluster: String,
}

impl SecretReconciler {
    pub fn new(registry: Arc<ClusterRegistry>, home_cluster: impl Into<String>) -> Self {
        Self {
            registry,
            home_cluster: home_cluster.into(),
        }
    }
}

#[async_trait]
impl ResourceHandler<Secret> for SecretReconciler {
    fn needs_update(&self, old: &Secret, new: &Secret) -> bool {
        old.data != new.data
    }

    async fn sync(&self, _key: &str, secret: Arc<Secret>) -> Result<()> {
        let name = secret.name_any();
        if name == self.home_cluster {
            debug!("Secret {} names the home cluster, skipping", name);
            return Ok(());
        }

        match self.registry.add_from_secret(&name, &secret).await {
            Ok(()) => Ok(()),
            // A broken credential stays broken until the secret is edited
            Err(e @ (LazyError::Credential(_) | LazyError::KubeconfigError(_))) => {
                error!("Cannot add cluster {}: {}", name, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (_, name) = split_key(key)?;
        if name == self.home_cluster {
            return Ok(());
        }
        match self.registry.delete_cluster(name).await {
            Ok(()) => {
                info!("Cluster {} removed with its secret", name);
                Ok(())
            }
            Err(LazyError::ClusterNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
