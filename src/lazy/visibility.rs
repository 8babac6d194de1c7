// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Which destinations a lazy-loaded service keeps in its proxy configuration.

use crate::model::StateStore;
use std::collections::BTreeSet;

/// Destinations visible to one service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Visibility {
    /// Egress scope entries, `namespace/host`
    pub hosts: BTreeSet<String>,
    /// Ids of in-mesh services that stay resolvable and are never redirected
    pub services: BTreeSet<String>,
}

impl Visibility {
    pub fn is_visible(&self, id: &str) -> bool {
        self.services.contains(id)
    }

    fn add_service(&mut self, namespace: &str, id: &str, control_plane_namespace: &str) {
        self.services.insert(id.to_string());
        // The control plane namespace is covered by its own wildcard entry
        if namespace != control_plane_namespace {
            self.hosts.insert(format!("{}/{}", namespace, id));
        }
    }
}

/// Compute what `id` may see.
///
/// Visible are the control plane namespace, every TCP-only service, every service `id` was
/// observed calling plus whatever shares a VirtualService binding with such a service (one hop,
/// not a closure), and every ServiceEntry host outside the control plane namespace. Learned
/// destinations that no longer exist are skipped. A service is always visible to itself but
/// is not listed as an egress host of its own.
pub fn compute(store: &StateStore, control_plane_namespace: &str, id: &str) -> Visibility {
    let mut visibility = Visibility::default();

    for svc in store.services() {
        if svc.namespace == control_plane_namespace {
            visibility.services.insert(svc.id.clone());
        } else if svc.spec().is_tcp_only() {
            visibility.add_service(&svc.namespace, &svc.id, control_plane_namespace);
        }
    }

    if let Some(source) = store.service(id) {
        for learned in source.egress() {
            let bound = store.bound_with(&learned);
            for target in std::iter::once(learned).chain(bound) {
                if target == id {
                    continue;
                }
                if let Some(svc) = store.service(&target) {
                    visibility.add_service(&svc.namespace, &svc.id, control_plane_namespace);
                }
            }
        }
    }

    for (namespace, host) in store.service_entry_hosts(control_plane_namespace) {
        visibility.hosts.insert(format!("{}/{}", namespace, host));
    }

    visibility.services.insert(id.to_string());
    visibility
}
