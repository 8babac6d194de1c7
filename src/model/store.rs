// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Concurrent aggregation store, the single source of desired state.
//!
//! Top-level maps are sharded concurrent maps; entities carry their own lock. Mutations that add
//! to an entity run while its map entry is held. Mutations that take something away run on a
//! cloned handle, then drop the entity with `remove_if`, whose emptiness check runs under the
//! shard lock: an entity that gained a cluster copy in between is never dropped. Lock order is
//! always map shard, then entity.

use super::namespace::{LazyStatus, Namespace, NamespaceChange, NamespaceSnapshot};
use super::service::{Service, ServiceSnapshot};
use crate::error::{LazyError, Result};
use dashmap::DashMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Hosts advertised by one ServiceEntry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceEntryHosts {
    pub namespace: String,
    pub hosts: BTreeSet<String>,
}

pub struct StateStore {
    domain: String,
    namespaces: DashMap<String, Arc<Namespace>>,
    services: DashMap<String, Arc<Service>>,
    /// service id -> cluster -> pod IPs
    endpoints: DashMap<String, BTreeMap<String, BTreeSet<String>>>,
    /// pod IP -> service id
    ip_index: DashMap<String, String>,
    service_entries: DashMap<String, ServiceEntryHosts>,
    /// VirtualService key -> services it binds together
    bindings: DashMap<String, BTreeSet<String>>,
    selectors: RwLock<Vec<LabelSelector>>,
}

impl StateStore {
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            domain: cluster_domain.into(),
            namespaces: DashMap::new(),
            services: DashMap::new(),
            endpoints: DashMap::new(),
            ip_index: DashMap::new(),
            service_entries: DashMap::new(),
            bindings: DashMap::new(),
            selectors: RwLock::new(Vec::new()),
        }
    }

    /// `name.namespace.svc.<domain>`
    pub fn service_id(&self, name: &str, namespace: &str) -> String {
        format!("{}.{}.svc.{}", name, namespace, self.domain)
    }

    /// Inverse of [`StateStore::service_id`]
    pub fn parse_service_id<'a>(&self, id: &'a str) -> Option<(&'a str, &'a str)> {
        let prefix = id.strip_suffix(&format!(".svc.{}", self.domain))?;
        let (name, namespace) = prefix.split_once('.')?;
        if name.is_empty() || namespace.is_empty() || namespace.contains('.') {
            return None;
        }
        Some((name, namespace))
    }

    /// Resolve a host as written in a VirtualService in `namespace` to a service id.
    ///
    /// Short names resolve relative to `namespace`; wildcards and external hosts do not resolve.
    pub fn resolve_host(&self, host: &str, namespace: &str) -> Option<String> {
        if host.contains('*') || host.is_empty() {
            return None;
        }
        if self.parse_service_id(host).is_some() {
            return Some(host.to_string());
        }
        let parts: Vec<&str> = host.split('.').collect();
        match parts.as_slice() {
            [name] => Some(self.service_id(name, namespace)),
            [name, ns] | [name, ns, "svc"] => Some(self.service_id(name, ns)),
            _ => None,
        }
    }

    // === namespaces ===

    pub fn update_namespace(&self, cluster: &str, name: &str, snapshot: NamespaceSnapshot) -> NamespaceChange {
        let selectors = self.selectors.read().clone();
        let entry = self
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(name)));
        entry.update_cluster(cluster, snapshot, &selectors)
    }

    pub fn delete_namespace(&self, cluster: &str, name: &str) -> NamespaceChange {
        let selectors = self.selectors.read().clone();
        let Some(ns) = self.namespace(name) else {
            return NamespaceChange::default();
        };
        let change = ns.delete_cluster(cluster, &selectors);
        self.namespaces.remove_if(name, |_, ns| ns.is_empty());
        change
    }

    /// Record a user-authored Sidecar, which opts its namespace out of lazy loading
    pub fn add_opt_out(&self, namespace: &str, sidecar: &str) -> NamespaceChange {
        let selectors = self.selectors.read().clone();
        let entry = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(namespace)));
        entry.add_opt_out(sidecar, &selectors)
    }

    pub fn remove_opt_out(&self, namespace: &str, sidecar: &str) -> NamespaceChange {
        let selectors = self.selectors.read().clone();
        let Some(ns) = self.namespace(namespace) else {
            return NamespaceChange::default();
        };
        let change = ns.remove_opt_out(sidecar, &selectors);
        self.namespaces.remove_if(namespace, |_, ns| ns.is_empty());
        change
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(name).map(|ns| ns.clone())
    }

    pub fn namespace_status(&self, name: &str) -> LazyStatus {
        self.namespace(name).map(|ns| ns.status()).unwrap_or_default()
    }

    /// Install new discovery selectors; returns the namespaces whose scope changed
    pub fn set_selectors(&self, selectors: Vec<LabelSelector>) -> Option<Vec<String>> {
        {
            let mut current = self.selectors.write();
            if *current == selectors {
                return None;
            }
            *current = selectors.clone();
        }

        let namespaces: Vec<Arc<Namespace>> = self.namespaces.iter().map(|e| e.value().clone()).collect();
        Some(
            namespaces
                .into_iter()
                .filter(|ns| ns.refresh(&selectors).scope_changed)
                .map(|ns| ns.name.clone())
                .collect(),
        )
    }

    /// Re-derive every service of a namespace after its status or scope changed.
    ///
    /// Services of a namespace that left the discovery scope are dropped. Returns the ids of
    /// services whose spec changed or that were dropped.
    pub fn refresh_namespace(&self, namespace: &str) -> Vec<String> {
        let ns = self.namespace(namespace);
        let status = ns.as_ref().map(|ns| ns.status()).unwrap_or_default();
        let in_scope = ns.as_ref().is_some_and(|ns| ns.in_scope());

        let members: Vec<Arc<Service>> = self
            .services
            .iter()
            .filter(|e| e.value().namespace == namespace)
            .map(|e| e.value().clone())
            .collect();

        let mut changed = Vec::new();
        for svc in members {
            if !in_scope {
                self.services.remove(&svc.id);
                debug!("Dropped {} as namespace {} left the discovery scope", svc.id, namespace);
                changed.push(svc.id.clone());
            } else if svc.refresh(status) {
                changed.push(svc.id.clone());
            }
        }
        changed
    }

    // === services ===

    /// Merge a cluster's copy of a service; true when the merged view changed.
    ///
    /// Fails with [`LazyError::NamespaceNotFound`] until the namespace has been seen, so the
    /// caller retries.
    pub fn update_service(&self, cluster: &str, name: &str, namespace: &str, snapshot: ServiceSnapshot) -> Result<bool> {
        let Some(ns) = self.namespace(namespace).filter(|ns| ns.is_known()) else {
            return Err(LazyError::NamespaceNotFound(namespace.to_string()));
        };
        let id = self.service_id(name, namespace);
        if !ns.in_scope() {
            return Ok(self.delete_service(cluster, &id));
        }

        let status = ns.status();
        let entry = self
            .services
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Service::new(name, namespace, id.clone())));
        Ok(entry.update_cluster(cluster, snapshot, status))
    }

    /// Drop a cluster's copy; true when the merged view changed or the service is gone
    pub fn delete_service(&self, cluster: &str, id: &str) -> bool {
        let Some(svc) = self.service(id) else {
            return false;
        };
        let status = self.namespace_status(&svc.namespace);
        let had_copy = svc.clusters().iter().any(|c| c == cluster);
        svc.delete_cluster(cluster, status);
        let removed = self.services.remove_if(id, |_, s| s.is_empty()).is_some();
        had_copy || removed
    }

    pub fn service(&self, id: &str) -> Option<Arc<Service>> {
        self.services.get(id).map(|s| s.clone())
    }

    /// Point-in-time list of all services
    pub fn services(&self) -> Vec<Arc<Service>> {
        let mut services: Vec<Arc<Service>> = self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services().into_iter().map(|s| s.id.clone()).collect()
    }

    // === endpoints ===

    /// Replace a cluster's pod IPs for a service
    pub fn update_endpoints(&self, cluster: &str, id: &str, ips: BTreeSet<String>) {
        let mut entry = self.endpoints.entry(id.to_string()).or_default();
        let stale = entry.insert(cluster.to_string(), ips.clone()).unwrap_or_default();
        for ip in stale.difference(&ips) {
            if !entry.values().any(|set| set.contains(ip)) {
                self.ip_index.remove_if(ip, |_, owner| owner == id);
            }
        }
        for ip in ips {
            self.ip_index.insert(ip, id.to_string());
        }
    }

    pub fn delete_endpoints(&self, cluster: &str, id: &str) {
        let Some(mut entry) = self.endpoints.get_mut(id) else {
            return;
        };
        let stale = entry.remove(cluster).unwrap_or_default();
        for ip in &stale {
            if !entry.values().any(|set| set.contains(ip)) {
                self.ip_index.remove_if(ip, |_, owner| owner == id);
            }
        }
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.endpoints.remove_if(id, |_, clusters| clusters.is_empty());
        }
    }

    /// Reverse-map a pod IP to the service it backs
    pub fn resolve_ip(&self, ip: &str) -> Option<String> {
        self.ip_index.get(ip).map(|id| id.clone())
    }

    // === service entries and virtual service bindings ===

    pub fn update_service_entry(&self, key: &str, hosts: ServiceEntryHosts) -> bool {
        self.service_entries.insert(key.to_string(), hosts.clone()).as_ref() != Some(&hosts)
    }

    pub fn delete_service_entry(&self, key: &str) -> bool {
        self.service_entries.remove(key).is_some()
    }

    /// External hosts as `(namespace, host)`, excluding the given namespace
    pub fn service_entry_hosts(&self, excluded_namespace: &str) -> BTreeSet<(String, String)> {
        self.service_entries
            .iter()
            .filter(|e| e.namespace != excluded_namespace)
            .flat_map(|e| {
                let namespace = e.namespace.clone();
                e.hosts
                    .iter()
                    .map(move |h| (namespace.clone(), h.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn update_binding(&self, key: &str, services: BTreeSet<String>) -> bool {
        self.bindings.insert(key.to_string(), services.clone()).as_ref() != Some(&services)
    }

    pub fn delete_binding(&self, key: &str) -> bool {
        self.bindings.remove(key).is_some()
    }

    /// Services sharing at least one VirtualService binding with `id`, `id` excluded
    pub fn bound_with(&self, id: &str) -> BTreeSet<String> {
        self.bindings
            .iter()
            .filter(|e| e.value().contains(id))
            .flat_map(|e| e.value().iter().filter(|s| *s != id).cloned().collect::<Vec<_>>())
            .collect()
    }

    // === clusters ===

    /// Remove every contribution of a cluster; returns the affected service ids
    pub fn remove_cluster(&self, cluster: &str) -> Vec<String> {
        let selectors = self.selectors.read().clone();
        let namespaces: Vec<Arc<Namespace>> = self.namespaces.iter().map(|e| e.value().clone()).collect();
        let mut changed_namespaces = Vec::new();
        for ns in namespaces {
            if ns.delete_cluster(cluster, &selectors).any() {
                changed_namespaces.push(ns.name.clone());
            }
            self.namespaces.remove_if(&ns.name, |_, ns| ns.is_empty());
        }

        let mut affected = BTreeSet::new();
        for svc in self.services() {
            if self.delete_service(cluster, &svc.id) {
                affected.insert(svc.id.clone());
            }
        }
        for ns in changed_namespaces {
            affected.extend(self.refresh_namespace(&ns));
        }

        let endpoint_ids: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        for id in endpoint_ids {
            self.delete_endpoints(cluster, &id);
        }

        affected.into_iter().collect()
    }
}
