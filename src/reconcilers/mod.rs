// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-kind handlers that fold watch events into the state store.

pub mod endpoints;
pub mod mesh_config;
pub mod namespace;
pub mod secret;
pub mod service;
pub mod service_entry;
pub mod sidecar;
pub mod virtual_service;

pub use endpoints::EndpointsReconciler;
pub use mesh_config::MeshConfigReconciler;
pub use namespace::NamespaceReconciler;
pub use secret::SecretReconciler;
pub use service::ServiceReconciler;
pub use service_entry::ServiceEntryReconciler;
pub use sidecar::SidecarReconciler;
pub use virtual_service::VirtualServiceReconciler;

use crate::lazy::Recompute;
use crate::model::StateStore;
use tracing::debug;

/// Re-derive a namespace's services and schedule what they affect
pub(crate) fn namespace_changed(store: &StateStore, recompute: &dyn Recompute, namespace: &str) {
    let changed = store.refresh_namespace(namespace);
    if changed.is_empty() {
        return;
    }
    debug!("Namespace {} changed {} services", namespace, changed.len());
    for id in &changed {
        recompute.service(id);
    }
    recompute.all();
}
