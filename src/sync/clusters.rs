// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry of member clusters and their per-cluster controllers.

use crate::config::Workers;
use crate::controllers::{ControllerHandle, ResourceController};
use crate::error::{LazyError, Result};
use crate::kubernetes::{create_client_from_kubeconfig, credential_from_secret};
use crate::lazy::Recompute;
use crate::model::StateStore;
use crate::reconcilers::{EndpointsReconciler, NamespaceReconciler, ServiceReconciler};
use crate::sync::SyncManagerHandle;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Secret, Service};
use kube::{Api, Client};
use kube_runtime::watcher::Config as WatcherConfig;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Controllers running against one member cluster
struct MemberCluster {
    /// Credential the cluster was added with; `None` for the home cluster
    credential: Option<String>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    namespaces: ControllerHandle,
    services: ControllerHandle,
}

pub struct ClusterRegistry {
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
    events: SyncManagerHandle,
    workers: Workers,
    cancel: CancellationToken,
    clusters: Mutex<BTreeMap<String, MemberCluster>>,
}

impl ClusterRegistry {
    /// Clusters are stopped when `cancel` fires
    pub fn new(
        store: Arc<StateStore>,
        recompute: Arc<dyn Recompute>,
        events: SyncManagerHandle,
        workers: Workers,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            recompute,
            events,
            workers,
            cancel,
            clusters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start watching Namespaces, Services and Endpoints of a cluster
    pub fn add_cluster(&self, name: &str, client: Client) -> Result<()> {
        self.register(name, client, None)
    }

    fn register(&self, name: &str, client: Client, credential: Option<String>) -> Result<()> {
        let mut clusters = self.clusters.lock();
        if clusters.contains_key(name) {
            return Err(LazyError::DuplicateCluster(name.to_string()));
        }

        let cancel = self.cancel.child_token();
        let namespaces = ResourceController::new(
            format!("{}/namespaces", name),
            Api::<Namespace>::all(client.clone()),
            WatcherConfig::default(),
            Arc::new(NamespaceReconciler::new(
                name,
                self.store.clone(),
                self.recompute.clone(),
                self.events.clone(),
            )),
            self.workers.namespaces,
        );
        let services = ResourceController::new(
            format!("{}/services", name),
            Api::<Service>::all(client.clone()),
            WatcherConfig::default(),
            Arc::new(ServiceReconciler::new(name, self.store.clone(), self.recompute.clone())),
            self.workers.services,
        );
        let endpoints = ResourceController::new(
            format!("{}/endpoints", name),
            Api::<Endpoints>::all(client),
            WatcherConfig::default(),
            Arc::new(EndpointsReconciler::new(name, self.store.clone())),
            self.workers.endpoints,
        );

        let member = MemberCluster {
            credential,
            namespaces: namespaces.handle(),
            services: services.handle(),
            tasks: vec![
                tokio::spawn(namespaces.run(cancel.clone())),
                tokio::spawn(services.run(cancel.clone())),
                tokio::spawn(endpoints.run(cancel.clone())),
            ],
            cancel,
        };
        clusters.insert(name.to_string(), member);
        info!("Cluster {} added", name);
        Ok(())
    }

    /// Stop a cluster's controllers and drop everything it contributed
    #[instrument(skip(self))]
    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        let Some(member) = self.clusters.lock().remove(name) else {
            return Err(LazyError::ClusterNotFound(name.to_string()));
        };

        member.cancel.cancel();
        for task in member.tasks {
            if let Err(e) = task.await {
                warn!("Controller of cluster {} failed: {}", name, e);
            }
        }

        let affected = self.store.remove_cluster(name);
        info!("Cluster {} removed, {} services affected", name, affected.len());
        for id in &affected {
            self.recompute.service(id);
        }
        self.recompute.all();
        Ok(())
    }

    /// Add a cluster from its credential secret, restarting it when the credential changed
    #[instrument(skip(self, secret))]
    pub async fn add_from_secret(&self, name: &str, secret: &Secret) -> Result<()> {
        let credential = credential_from_secret(secret)?;

        let current = self.clusters.lock().get(name).map(|c| c.credential.clone());
        if let Some(Some(existing)) = &current {
            if *existing == credential {
                debug!("Credential of cluster {} unchanged", name);
                return Ok(());
            }
        }

        // A broken new credential leaves the running cluster untouched
        let client = create_client_from_kubeconfig(&credential).await?;
        if current.is_some() {
            info!("Credential of cluster {} changed, restarting it", name);
            self.delete_cluster(name).await?;
        }
        self.register(name, client, Some(credential))
    }

    /// Names of the registered clusters
    pub fn clusters(&self) -> Vec<String> {
        self.clusters.lock().keys().cloned().collect()
    }

    /// Re-enqueue every cached Namespace of every cluster
    pub fn requeue_namespaces(&self) {
        for member in self.clusters.lock().values() {
            member.namespaces.requeue_all();
        }
    }

    /// Re-enqueue every cached Service of every cluster
    pub fn requeue_services(&self) {
        for member in self.clusters.lock().values() {
            member.services.requeue_all();
        }
    }

    /// Stop every cluster and wait for its controllers
    pub async fn shutdown(&self) {
        let members: Vec<(String, MemberCluster)> = std::mem::take(&mut *self.clusters.lock()).into_iter().collect();
        for (name, member) in members {
            member.cancel.cancel();
            for task in member.tasks {
                if let Err(e) = task.await {
                    warn!("Controller of cluster {} failed: {}", name, e);
                }
            }
        }
    }
}
