// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Top-level component graph: wires controllers, the state store and the lazy engine.

use crate::config::Config;
use crate::constants::labels::MULTI_CLUSTER_SECRET;
use crate::controllers::{run_workers, ResourceController};
use crate::kubernetes::{ConfigApi, KubeConfigApi};
use crate::lazy::{AccessLog, LazyQueues, Reconciler, Recompute};
use crate::model::StateStore;
use crate::reconcilers::{
    MeshConfigReconciler, SecretReconciler, ServiceEntryReconciler, SidecarReconciler, VirtualServiceReconciler,
};
use crate::sync::ClusterRegistry;
use crate::types::{ServiceEntry, Sidecar, VirtualService};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events that reconcilers send to the Manager
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A namespace entered or left the discovery scope; its services must be re-read
    ResyncServices,
    /// The discovery selectors changed; every namespace and service must be re-read
    ScopeChanged,
}

/// Handle to send events to the Manager
#[derive(Clone)]
pub struct SyncManagerHandle {
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncManagerHandle {
    pub fn channel() -> (Self, mpsc::Receiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        (Self { event_tx }, event_rx)
    }

    pub async fn send(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to send event to Manager: {}", e);
        }
    }
}

pub struct Manager {
    client: Client,
    config: Config,
    store: Arc<StateStore>,
    queues: LazyQueues,
    recompute: Arc<dyn Recompute>,
    reconciler: Arc<Reconciler>,
    registry: Arc<ClusterRegistry>,
    access_log: AccessLog,
    events: SyncManagerHandle,
    event_rx: mpsc::Receiver<SyncEvent>,
    shutdown: CancellationToken,
}

impl Manager {
    /// Manager writing its objects to the home cluster
    pub fn new(client: Client, config: Config) -> Self {
        let api = Arc::new(KubeConfigApi::new(client.clone()));
        Self::with_config_api(client, config, api)
    }

    pub fn with_config_api(client: Client, config: Config, api: Arc<dyn ConfigApi>) -> Self {
        let store = Arc::new(StateStore::new(config.cluster_domain.clone()));
        let queues = LazyQueues::new(store.clone());
        let recompute: Arc<dyn Recompute> = Arc::new(queues.clone());
        let reconciler = Arc::new(Reconciler::new(
            api,
            store.clone(),
            &config.control_plane_namespace,
            &config.cluster_domain,
        ));
        let (events, event_rx) = SyncManagerHandle::channel();
        let shutdown = CancellationToken::new();
        let registry = Arc::new(ClusterRegistry::new(
            store.clone(),
            recompute.clone(),
            events.clone(),
            config.workers.clone(),
            shutdown.clone(),
        ));
        let access_log = AccessLog::new(store.clone(), recompute.clone());

        Self {
            client,
            config,
            store,
            queues,
            recompute,
            reconciler,
            registry,
            access_log,
            events,
            event_rx,
            shutdown,
        }
    }

    /// Entry point for the access-log transport
    pub fn access_log(&self) -> AccessLog {
        self.access_log.clone()
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!(
            "Manager started for cluster {} (control plane namespace {})",
            self.config.cluster_name, self.config.control_plane_namespace
        );
        self.registry.add_cluster(&self.config.cluster_name, self.client.clone())?;

        let mut tasks = self.start_controllers();
        if let Err(e) = self.reconciler.seed().await {
            warn!("Failed to list existing objects, the first pass rewrites them: {}", e);
        }
        tasks.extend(self.start_lazy_workers());
        info!("Controllers started, listening for events...");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.event_rx.recv() => event,
            };
            match event {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        info!("Shutting down");
        self.shutdown.cancel();
        self.registry.shutdown().await;
        self.queues.shutdown();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Task failed during shutdown: {}", e);
            }
        }
        Ok(())
    }

    fn handle_event(&self, event: SyncEvent) {
        debug!("Handling event: {:?}", event);

        match event {
            SyncEvent::ResyncServices => self.registry.requeue_services(),
            SyncEvent::ScopeChanged => {
                self.registry.requeue_namespaces();
                self.registry.requeue_services();
                self.recompute.all();
            }
        }
    }

    /// Controllers of the mesh-wide resources, all on the home cluster
    fn start_controllers(&self) -> Vec<JoinHandle<()>> {
        let workers = self.config.workers.config;
        let namespace = &self.config.control_plane_namespace;
        let cancel = &self.shutdown;

        let virtual_services = ResourceController::new(
            "virtualservices",
            Api::<VirtualService>::all(self.client.clone()),
            WatcherConfig::default(),
            Arc::new(VirtualServiceReconciler::new(self.store.clone(), self.recompute.clone())),
            workers,
        );
        let sidecars = ResourceController::new(
            "sidecars",
            Api::<Sidecar>::all(self.client.clone()),
            WatcherConfig::default(),
            Arc::new(SidecarReconciler::new(self.store.clone(), self.recompute.clone())),
            workers,
        );
        let service_entries = ResourceController::new(
            "serviceentries",
            Api::<ServiceEntry>::all(self.client.clone()),
            WatcherConfig::default(),
            Arc::new(ServiceEntryReconciler::new(self.store.clone(), self.recompute.clone())),
            workers,
        );
        let mesh_config = ResourceController::new(
            "meshconfig",
            Api::<ConfigMap>::namespaced(self.client.clone(), namespace),
            WatcherConfig::default().fields(&format!("metadata.name={}", self.config.mesh_configmap)),
            Arc::new(MeshConfigReconciler::new(
                self.store.clone(),
                self.recompute.clone(),
                self.events.clone(),
            )),
            1,
        );
        let secrets = ResourceController::new(
            "secrets",
            Api::<Secret>::namespaced(self.client.clone(), namespace),
            WatcherConfig::default().labels(&format!("{}=true", MULTI_CLUSTER_SECRET)),
            Arc::new(SecretReconciler::new(self.registry.clone(), self.config.cluster_name.clone())),
            workers,
        );

        vec![
            tokio::spawn(virtual_services.run(cancel.clone())),
            tokio::spawn(sidecars.run(cancel.clone())),
            tokio::spawn(service_entries.run(cancel.clone())),
            tokio::spawn(mesh_config.run(cancel.clone())),
            tokio::spawn(secrets.run(cancel.clone())),
        ]
    }

    /// Worker pools draining the lazy-service and gateway queues
    fn start_lazy_workers(&self) -> Vec<JoinHandle<()>> {
        let services = {
            let reconciler = self.reconciler.clone();
            tokio::spawn(run_workers(
                "lazy-services",
                self.queues.services().clone(),
                self.config.workers.lazy_services,
                move |id: String| {
                    let reconciler = reconciler.clone();
                    async move { reconciler.reconcile_service(&id).await }
                },
            ))
        };
        let gateway = {
            let reconciler = self.reconciler.clone();
            tokio::spawn(run_workers("gateway", self.queues.gateway().clone(), 1, move |_key: String| {
                let reconciler = reconciler.clone();
                async move { reconciler.reconcile_gateway().await }
            }))
        };
        vec![services, gateway]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NamespaceSnapshot, ServiceSnapshot};
    use crate::test_utils::{ApiCall, MockService, RecordingConfigApi};
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn make_manager() -> (Manager, Arc<RecordingConfigApi>) {
        let api = Arc::new(RecordingConfigApi::default());
        let config = Config {
            cluster_name: "home".to_string(),
            ..Default::default()
        };
        let manager = Manager::with_config_api(MockService::new().into_client(), config, api.clone());
        (manager, api)
    }

    #[tokio::test]
    async fn test_run_registers_home_cluster_and_stops() {
        let (manager, _) = make_manager();
        let registry = manager.registry.clone();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(manager.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.clusters(), vec!["home"]);

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert!(registry.clusters().is_empty());
    }

    #[tokio::test]
    async fn test_learned_access_reaches_configuration() {
        let (manager, api) = make_manager();
        let store = manager.store();
        store.update_namespace("home", "ns1", NamespaceSnapshot { lazy: true, labels: BTreeMap::new() });
        store.update_namespace("home", "ns2", NamespaceSnapshot::default());
        for (name, ns, ip) in [("orders", "ns1", "10.0.0.5"), ("billing", "ns2", "10.0.0.9")] {
            let snapshot = ServiceSnapshot {
                http_ports: [8080].into(),
                selector: BTreeMap::from([("app".to_string(), name.to_string())]),
                ..Default::default()
            };
            store.update_service("home", name, ns, snapshot).unwrap();
            store.update_endpoints("home", &store.service_id(name, ns), BTreeSet::from([ip.to_string()]));
        }
        let access_log = manager.access_log();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(manager.run(cancel.clone()));

        access_log.handle_access("10.0.0.5", "", "10.0.0.9").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sidecar = api.sidecar("ns1", "lazyscope-orders").unwrap();
        assert_eq!(
            sidecar.spec.egress_hosts().collect::<Vec<_>>(),
            vec!["istio-system/*", "ns2/billing.ns2.svc.cluster.local"]
        );
        assert!(api.calls().contains(&ApiCall::ApplySidecar("ns1/lazyscope-orders".to_string())));

        cancel.cancel();
        run.await.unwrap().unwrap();
    }
}
