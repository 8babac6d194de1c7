// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Converges the Istio objects of lazy-loaded services with the aggregated state.
//!
//! Desired objects are always rebuilt from the [`StateStore`]; the configuration API is only
//! written when the rebuilt object differs from what was applied last. What was applied last is
//! seeded at startup from the objects a previous run left behind.

use super::objects::{build_envoy_filter, build_gateway_routes, build_sidecar, object_name, ObjectContext};
use super::visibility;
use crate::constants::objects::{GATEWAY_ROUTES, NAME_PREFIX};
use crate::error::{LazyError, Result};
use crate::kubernetes::ConfigApi;
use crate::model::{Service, ServiceSpec, StateStore};
use crate::types::{EnvoyFilter, EnvoyFilterSpec, Sidecar, SidecarSpec, VirtualServiceSpec};
use dashmap::DashMap;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Last state written for one object
#[derive(Clone, Debug, PartialEq)]
enum Applied<T> {
    Absent,
    Present(T),
}

impl<T> From<Option<T>> for Applied<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Applied::Absent, Applied::Present)
    }
}

pub struct Reconciler {
    api: Arc<dyn ConfigApi>,
    store: Arc<StateStore>,
    ctx: ObjectContext,
    sidecars: DashMap<String, Applied<SidecarSpec>>,
    filters: DashMap<String, Applied<EnvoyFilterSpec>>,
    gateway: Mutex<Option<Applied<VirtualServiceSpec>>>,
    /// Once seeded, a missing cache entry means the object does not exist
    seeded: AtomicBool,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ConfigApi>, store: Arc<StateStore>, control_plane_namespace: &str, cluster_domain: &str) -> Self {
        Self {
            api,
            store,
            ctx: ObjectContext {
                control_plane_namespace: control_plane_namespace.to_string(),
                cluster_domain: cluster_domain.to_string(),
            },
            sidecars: DashMap::new(),
            filters: DashMap::new(),
            gateway: Mutex::new(None),
            seeded: AtomicBool::new(false),
        }
    }

    /// Load the managed objects already present in the cluster.
    ///
    /// Must run before the first reconcile.
    #[instrument(skip(self))]
    pub async fn seed(&self) -> Result<()> {
        let sidecars = self.api.list_sidecars().await?;
        let filters = self.api.list_envoy_filters().await?;
        let routes = self.api.list_virtual_services().await?;

        let (mut seeded_sidecars, mut seeded_filters) = (0, 0);
        for sidecar in sidecars {
            if let Some(id) = self.owner_id(&sidecar) {
                self.sidecars.entry(id).or_insert(Applied::Present(sidecar.spec));
                seeded_sidecars += 1;
            }
        }
        for filter in filters {
            if let Some(id) = self.owner_id(&filter) {
                self.filters.entry(id).or_insert(Applied::Present(filter.spec));
                seeded_filters += 1;
            }
        }
        let gateway = routes.into_iter().find(|vs| {
            vs.name_any() == GATEWAY_ROUTES && vs.namespace().as_deref() == Some(self.ctx.control_plane_namespace.as_str())
        });
        self.gateway
            .lock()
            .get_or_insert(Applied::from(gateway.map(|vs| vs.spec)));

        self.seeded.store(true, Ordering::SeqCst);
        info!("Found {} sidecars and {} envoy filters from a previous run", seeded_sidecars, seeded_filters);
        Ok(())
    }

    /// Id of the service a managed object was written for
    fn owner_id<K: Resource>(&self, obj: &K) -> Option<String> {
        let name = obj.name_any();
        let service = name.strip_prefix(NAME_PREFIX)?;
        let namespace = obj.namespace()?;
        Some(self.store.service_id(service, &namespace))
    }

    fn is_current<T: PartialEq>(&self, applied: Option<&Applied<T>>, next: &Applied<T>) -> bool {
        match applied {
            Some(applied) => applied == next,
            None => self.seeded.load(Ordering::SeqCst) && *next == Applied::Absent,
        }
    }

    /// Bring the Sidecar and EnvoyFilter of one service in line with its desired state.
    ///
    /// Must not run concurrently for the same id; the lazy-service queue guarantees that.
    #[instrument(skip(self))]
    pub async fn reconcile_service(&self, id: &str) -> Result<()> {
        let (name, namespace) = self
            .store
            .parse_service_id(id)
            .ok_or_else(|| LazyError::InvalidKey(id.to_string()))?;
        let object = object_name(name);

        let Some(svc) = self.store.service(id) else {
            self.converge_sidecar(id, namespace, &object, None).await?;
            self.converge_filter(id, namespace, &object, None).await?;
            self.sidecars.remove(id);
            self.filters.remove(id);
            debug!("Cleaned up after removed service {}", id);
            return Ok(());
        };

        let spec = svc.spec();
        if svc.needs_reconcile() {
            info!("Service {} changed, lazy loading {}", id, if spec.lazy_enabled { "on" } else { "off" });
        }

        if !spec.lazy_enabled {
            // Its objects only depend on its own spec, which was converged already
            if !svc.needs_reconcile() {
                return Ok(());
            }
            self.converge_sidecar(id, namespace, &object, None).await?;
            self.converge_filter(id, namespace, &object, None).await?;
            svc.mark_reconciled(spec);
            return Ok(());
        }

        let visibility = visibility::compute(&self.store, &self.ctx.control_plane_namespace, id);
        let services = self.snapshot();
        let sidecar = build_sidecar(&svc, &spec, &visibility, &self.ctx);
        let filter = build_envoy_filter(&svc, &spec, &visibility, &services, &self.ctx);

        self.converge_sidecar(id, namespace, &object, Some(sidecar)).await?;
        self.converge_filter(id, namespace, &object, filter).await?;
        svc.mark_reconciled(spec);
        Ok(())
    }

    /// Bring the egress gateway routing table in line with the mesh
    #[instrument(skip(self))]
    pub async fn reconcile_gateway(&self) -> Result<()> {
        let routes = build_gateway_routes(&self.snapshot(), &self.ctx);
        let desired = Applied::from(routes.as_ref().map(|r| r.spec.clone()));
        if self.gateway.lock().as_ref() == Some(&desired) {
            return Ok(());
        }

        match routes {
            Some(routes) => self.api.apply_virtual_service(&routes).await?,
            None => {
                self.api
                    .delete_virtual_service(&self.ctx.control_plane_namespace, GATEWAY_ROUTES)
                    .await?
            }
        }
        *self.gateway.lock() = Some(desired);
        Ok(())
    }

    fn snapshot(&self) -> Vec<(Arc<Service>, ServiceSpec)> {
        self.store
            .services()
            .into_iter()
            .map(|svc| {
                let spec = svc.spec();
                (svc, spec)
            })
            .collect()
    }

    async fn converge_sidecar(
        &self,
        id: &str,
        namespace: &str,
        name: &str,
        desired: Option<Sidecar>,
    ) -> Result<()> {
        let next = Applied::from(desired.as_ref().map(|s| s.spec.clone()));
        if self.is_current(self.sidecars.get(id).as_deref(), &next) {
            return Ok(());
        }
        match desired {
            Some(sidecar) => self.api.apply_sidecar(&sidecar).await?,
            None => self.api.delete_sidecar(namespace, name).await?,
        }
        self.sidecars.insert(id.to_string(), next);
        Ok(())
    }

    async fn converge_filter(
        &self,
        id: &str,
        namespace: &str,
        name: &str,
        desired: Option<EnvoyFilter>,
    ) -> Result<()> {
        let next = Applied::from(desired.as_ref().map(|f| f.spec.clone()));
        if self.is_current(self.filters.get(id).as_deref(), &next) {
            return Ok(());
        }
        match desired {
            Some(filter) => self.api.apply_envoy_filter(&filter).await?,
            None => self.api.delete_envoy_filter(namespace, name).await?,
        }
        self.filters.insert(id.to_string(), next);
        Ok(())
    }
}
