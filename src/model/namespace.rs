// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::merge::namespace_status;
use crate::constants::annotations;
use crate::kubernetes::matches_any;
use k8s_openapi::api::core::v1::Namespace as KubeNamespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Lazy loading state derived for a namespace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LazyStatus {
    #[default]
    None,
    Enabled,
    Disabled,
}

/// One cluster's copy of a namespace
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceSnapshot {
    pub lazy: bool,
    pub labels: BTreeMap<String, String>,
}

impl NamespaceSnapshot {
    pub fn from_k8s(ns: &KubeNamespace) -> Self {
        Self {
            lazy: lazy_annotated(&ns.metadata.annotations),
            labels: ns.metadata.labels.clone().unwrap_or_default(),
        }
    }
}

/// Check if an annotation map turns lazy loading on
pub fn lazy_annotated(annotations: &Option<BTreeMap<String, String>>) -> bool {
    annotations
        .as_ref()
        .and_then(|a| a.get(annotations::LAZY_LOADING))
        .is_some_and(|v| v == "true")
}

/// What an update did to a namespace's derived state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NamespaceChange {
    pub status_changed: bool,
    pub scope_changed: bool,
}

impl NamespaceChange {
    pub fn any(&self) -> bool {
        self.status_changed || self.scope_changed
    }
}

/// Cross-cluster view of one namespace
pub struct Namespace {
    pub name: String,
    inner: Mutex<NamespaceInner>,
}

#[derive(Default)]
struct NamespaceInner {
    clusters: BTreeMap<String, NamespaceSnapshot>,
    /// User-authored Sidecars observed in the namespace
    opt_outs: BTreeSet<String>,
    status: LazyStatus,
    in_scope: bool,
    /// Whether any cluster copy existed at the last derive
    listed: bool,
}

impl NamespaceInner {
    fn derive(&mut self, selectors: &[LabelSelector]) -> NamespaceChange {
        let status = namespace_status(
            !self.opt_outs.is_empty(),
            self.clusters.values().map(|c| c.lazy),
        );
        let in_scope = self
            .clusters
            .values()
            .any(|c| matches_any(selectors, &c.labels));

        // A namespace showing up for the first time has no services to resync
        let change = NamespaceChange {
            status_changed: status != self.status,
            scope_changed: self.listed && in_scope != self.in_scope,
        };
        self.status = status;
        self.in_scope = in_scope;
        self.listed = !self.clusters.is_empty();
        change
    }
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(NamespaceInner::default()),
        }
    }

    pub fn update_cluster(
        &self,
        cluster: &str,
        snapshot: NamespaceSnapshot,
        selectors: &[LabelSelector],
    ) -> NamespaceChange {
        let mut inner = self.inner.lock();
        inner.clusters.insert(cluster.to_string(), snapshot);
        inner.derive(selectors)
    }

    pub fn delete_cluster(&self, cluster: &str, selectors: &[LabelSelector]) -> NamespaceChange {
        let mut inner = self.inner.lock();
        if inner.clusters.remove(cluster).is_none() {
            return NamespaceChange::default();
        }
        inner.derive(selectors)
    }

    pub fn add_opt_out(&self, sidecar: &str, selectors: &[LabelSelector]) -> NamespaceChange {
        let mut inner = self.inner.lock();
        if !inner.opt_outs.insert(sidecar.to_string()) {
            return NamespaceChange::default();
        }
        inner.derive(selectors)
    }

    pub fn remove_opt_out(&self, sidecar: &str, selectors: &[LabelSelector]) -> NamespaceChange {
        let mut inner = self.inner.lock();
        if !inner.opt_outs.remove(sidecar) {
            return NamespaceChange::default();
        }
        inner.derive(selectors)
    }

    /// Re-derive scope after the discovery selectors changed
    pub fn refresh(&self, selectors: &[LabelSelector]) -> NamespaceChange {
        self.inner.lock().derive(selectors)
    }

    pub fn status(&self) -> LazyStatus {
        self.inner.lock().status
    }

    pub fn in_scope(&self) -> bool {
        self.inner.lock().in_scope
    }

    /// Whether any member cluster holds a copy
    pub fn is_known(&self) -> bool {
        !self.inner.lock().clusters.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.clusters.is_empty() && inner.opt_outs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy(on: bool) -> NamespaceSnapshot {
        NamespaceSnapshot {
            lazy: on,
            labels: BTreeMap::from([("team".to_string(), "orders".to_string())]),
        }
    }

    #[test]
    fn test_status_follows_clusters_and_opt_outs() {
        let ns = Namespace::new("ns1");
        assert_eq!(ns.status(), LazyStatus::None);

        let change = ns.update_cluster("east", lazy(true), &[]);
        assert!(change.status_changed);
        assert_eq!(ns.status(), LazyStatus::Enabled);

        assert!(!ns.update_cluster("west", lazy(false), &[]).status_changed);
        assert_eq!(ns.status(), LazyStatus::Enabled);

        assert!(ns.add_opt_out("custom", &[]).status_changed);
        assert_eq!(ns.status(), LazyStatus::Disabled);
        assert!(!ns.add_opt_out("custom", &[]).any());

        assert!(ns.remove_opt_out("custom", &[]).status_changed);
        assert_eq!(ns.status(), LazyStatus::Enabled);

        assert!(ns.delete_cluster("east", &[]).status_changed);
        assert_eq!(ns.status(), LazyStatus::None);
        assert!(!ns.is_empty());
        assert!(!ns.delete_cluster("east", &[]).any());

        ns.delete_cluster("west", &[]);
        assert!(ns.is_empty());
        assert!(!ns.is_known());
    }

    #[test]
    fn test_scope_follows_selectors() {
        let ns = Namespace::new("ns1");
        assert!(!ns.update_cluster("east", lazy(false), &[]).any());
        assert!(ns.in_scope());

        let other_team = LabelSelector {
            match_labels: Some(BTreeMap::from([("team".to_string(), "search".to_string())])),
            ..Default::default()
        };
        let change = ns.refresh(std::slice::from_ref(&other_team));
        assert!(change.scope_changed);
        assert!(!change.status_changed);
        assert!(!ns.in_scope());

        assert!(ns.refresh(&[]).scope_changed);
        assert!(ns.in_scope());
    }

    #[test]
    fn test_first_sighting_is_not_a_scope_transition() {
        let team = LabelSelector {
            match_labels: Some(BTreeMap::from([("team".to_string(), "orders".to_string())])),
            ..Default::default()
        };
        let ns = Namespace::new("ns1");
        assert!(!ns.update_cluster("east", lazy(false), std::slice::from_ref(&team)).scope_changed);
        assert!(ns.in_scope());

        // Leaving with the last copy is a transition; coming back is a first sighting again
        assert!(ns.add_opt_out("custom", &[]).status_changed);
        assert!(ns.delete_cluster("east", &[]).scope_changed);
        assert!(!ns.update_cluster("east", lazy(false), &[]).scope_changed);
    }

    #[test]
    fn test_lazy_annotation() {
        let annotated = |v: &str| Some(BTreeMap::from([(annotations::LAZY_LOADING.to_string(), v.to_string())]));
        assert!(lazy_annotated(&annotated("true")));
        assert!(!lazy_annotated(&annotated("false")));
        assert!(!lazy_annotated(&None));
    }
}
