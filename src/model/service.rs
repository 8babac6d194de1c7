// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::merge::merge_spec;
use super::namespace::{lazy_annotated, LazyStatus};
use k8s_openapi::api::core::v1::{Service as KubeService, ServicePort};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

const HTTP_PROTOCOLS: [&str; 4] = ["http", "http2", "grpc", "grpc-web"];

/// One cluster's copy of a service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub cluster_ip: Option<String>,
    pub http_ports: BTreeSet<u16>,
    pub tcp_ports: BTreeSet<u16>,
    /// Empty when the service selects no pods (headless without selector, ExternalName)
    pub selector: BTreeMap<String, String>,
    pub lazy: bool,
}

impl ServiceSnapshot {
    pub fn from_k8s(svc: &KubeService) -> Self {
        let mut snapshot = ServiceSnapshot {
            lazy: lazy_annotated(&svc.metadata.annotations),
            ..Default::default()
        };
        let Some(spec) = svc.spec.as_ref() else {
            return snapshot;
        };

        snapshot.cluster_ip = spec
            .cluster_ip
            .clone()
            .filter(|ip| !ip.is_empty() && ip != "None");
        if spec.type_.as_deref() != Some("ExternalName") {
            snapshot.selector = spec.selector.clone().unwrap_or_default();
        }

        for port in spec.ports.iter().flatten() {
            let Ok(number) = u16::try_from(port.port) else {
                continue;
            };
            if is_http_port(port) {
                snapshot.http_ports.insert(number);
            } else {
                snapshot.tcp_ports.insert(number);
            }
        }
        snapshot
    }
}

/// Protocol selection: `appProtocol` wins, otherwise the port name or its `<protocol>-` prefix
pub fn is_http_port(port: &ServicePort) -> bool {
    if port.protocol.as_deref().is_some_and(|p| p != "TCP") {
        return false;
    }
    if let Some(app_protocol) = port.app_protocol.as_deref() {
        return HTTP_PROTOCOLS.contains(&app_protocol.to_ascii_lowercase().as_str());
    }
    let Some(name) = port.name.as_deref() else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    HTTP_PROTOCOLS
        .iter()
        .any(|p| name == *p || name.starts_with(&format!("{}-", p)))
}

/// Desired state merged across clusters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceSpec {
    pub http_ports: BTreeSet<u16>,
    pub tcp_ports: BTreeSet<u16>,
    pub lazy_enabled: bool,
    pub selector: BTreeMap<String, String>,
    pub cluster_ips: BTreeSet<String>,
}

impl ServiceSpec {
    pub fn is_tcp_only(&self) -> bool {
        self.http_ports.is_empty() && !self.tcp_ports.is_empty()
    }
}

/// Cross-cluster view of one service.
///
/// Every method takes the entry lock for its whole read-modify-write.
pub struct Service {
    pub name: String,
    pub namespace: String,
    /// Fully-qualified host, `name.namespace.svc.<domain>`
    pub id: String,
    inner: Mutex<ServiceInner>,
}

#[derive(Default)]
struct ServiceInner {
    clusters: BTreeMap<String, ServiceSnapshot>,
    spec: ServiceSpec,
    /// Spec of the last successful reconcile
    status: Option<ServiceSpec>,
    /// Services this one was observed calling; only grows
    egress: BTreeSet<String>,
}

impl ServiceInner {
    fn derive(&mut self, namespace: LazyStatus) -> bool {
        let spec = merge_spec(namespace, &self.clusters);
        let changed = spec != self.spec;
        self.spec = spec;
        changed
    }
}

impl Service {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            id: id.into(),
            inner: Mutex::new(ServiceInner::default()),
        }
    }

    /// Store a cluster's copy; true when the merged spec changed
    pub fn update_cluster(&self, cluster: &str, snapshot: ServiceSnapshot, namespace: LazyStatus) -> bool {
        let mut inner = self.inner.lock();
        inner.clusters.insert(cluster.to_string(), snapshot);
        inner.derive(namespace)
    }

    pub fn delete_cluster(&self, cluster: &str, namespace: LazyStatus) -> bool {
        let mut inner = self.inner.lock();
        if inner.clusters.remove(cluster).is_none() {
            return false;
        }
        inner.derive(namespace)
    }

    /// Recompute the spec after the namespace status changed
    pub fn refresh(&self, namespace: LazyStatus) -> bool {
        self.inner.lock().derive(namespace)
    }

    pub fn spec(&self) -> ServiceSpec {
        self.inner.lock().spec.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().clusters.is_empty()
    }

    pub fn clusters(&self) -> Vec<String> {
        self.inner.lock().clusters.keys().cloned().collect()
    }

    pub fn needs_reconcile(&self) -> bool {
        let inner = self.inner.lock();
        inner.status.as_ref() != Some(&inner.spec)
    }

    pub fn mark_reconciled(&self, spec: ServiceSpec) {
        self.inner.lock().status = Some(spec);
    }

    /// Record an observed destination; true when it was not known yet
    pub fn add_egress(&self, destination: &str) -> bool {
        self.inner.lock().egress.insert(destination.to_string())
    }

    pub fn egress(&self) -> BTreeSet<String> {
        self.inner.lock().egress.clone()
    }
}
