// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mocked Kubernetes API and in-memory collaborators.

use crate::error::{LazyError, Result};
use crate::kubernetes::ConfigApi;
use crate::lazy::Recompute;
use crate::types::{EnvoyFilter, Sidecar, VirtualService};
use async_trait::async_trait;
use http::{Request, Response};
use kube::client::Body;
use kube::{Client, Resource, ResourceExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A mock HTTP service that returns predefined responses based on method and path,
/// and records every request it receives.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Requests received so far as `(method, path)`
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock();

        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Fall back to the longest registered prefix
        responses
            .iter()
            .filter(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .max_by_key(|((_, p), _)| p.len())
            .map(|(_, resp)| resp.clone())
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        self.requests.lock().push((method.clone(), path.clone()));

        let (status, body) = self
            .find_response(&method, &path)
            .unwrap_or_else(|| (404, not_found_json("resource", &path)));

        Box::pin(async move {
            Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .map_err(tower::BoxError::from)
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// A configuration API write, with the `namespace/name` of its object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiCall {
    ApplySidecar(String),
    DeleteSidecar(String),
    ApplyEnvoyFilter(String),
    DeleteEnvoyFilter(String),
    ApplyVirtualService(String),
    DeleteVirtualService(String),
}

/// In-memory [`ConfigApi`] that keeps the latest object per key and records every call
#[derive(Default)]
pub struct RecordingConfigApi {
    calls: Mutex<Vec<ApiCall>>,
    sidecars: Mutex<BTreeMap<String, Sidecar>>,
    filters: Mutex<BTreeMap<String, EnvoyFilter>>,
    virtual_services: Mutex<BTreeMap<String, VirtualService>>,
    fail_next: AtomicBool,
}

fn object_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

impl RecordingConfigApi {
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    /// Make the next call fail with a server error
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn sidecar(&self, namespace: &str, name: &str) -> Option<Sidecar> {
        self.sidecars.lock().get(&format!("{}/{}", namespace, name)).cloned()
    }

    pub fn envoy_filter(&self, namespace: &str, name: &str) -> Option<EnvoyFilter> {
        self.filters.lock().get(&format!("{}/{}", namespace, name)).cloned()
    }

    pub fn virtual_service(&self, namespace: &str, name: &str) -> Option<VirtualService> {
        self.virtual_services.lock().get(&format!("{}/{}", namespace, name)).cloned()
    }

    fn record(&self, call: ApiCall) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LazyError::KubeError(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "injected failure".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl ConfigApi for RecordingConfigApi {
    async fn list_sidecars(&self) -> Result<Vec<Sidecar>> {
        Ok(self.sidecars.lock().values().cloned().collect())
    }

    async fn list_envoy_filters(&self) -> Result<Vec<EnvoyFilter>> {
        Ok(self.filters.lock().values().cloned().collect())
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>> {
        Ok(self.virtual_services.lock().values().cloned().collect())
    }

    async fn apply_sidecar(&self, sidecar: &Sidecar) -> Result<()> {
        let key = object_key(sidecar);
        self.record(ApiCall::ApplySidecar(key.clone()))?;
        self.sidecars.lock().insert(key, sidecar.clone());
        Ok(())
    }

    async fn delete_sidecar(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        self.record(ApiCall::DeleteSidecar(key.clone()))?;
        self.sidecars.lock().remove(&key);
        Ok(())
    }

    async fn apply_envoy_filter(&self, filter: &EnvoyFilter) -> Result<()> {
        let key = object_key(filter);
        self.record(ApiCall::ApplyEnvoyFilter(key.clone()))?;
        self.filters.lock().insert(key, filter.clone());
        Ok(())
    }

    async fn delete_envoy_filter(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        self.record(ApiCall::DeleteEnvoyFilter(key.clone()))?;
        self.filters.lock().remove(&key);
        Ok(())
    }

    async fn apply_virtual_service(&self, virtual_service: &VirtualService) -> Result<()> {
        let key = object_key(virtual_service);
        self.record(ApiCall::ApplyVirtualService(key.clone()))?;
        self.virtual_services.lock().insert(key, virtual_service.clone());
        Ok(())
    }

    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        self.record(ApiCall::DeleteVirtualService(key.clone()))?;
        self.virtual_services.lock().remove(&key);
        Ok(())
    }
}

/// [`Recompute`] sink that only records what was requested
#[derive(Default)]
pub struct RecordingRecompute {
    services: Mutex<Vec<String>>,
    all: AtomicUsize,
}

impl RecordingRecompute {
    pub fn services(&self) -> Vec<String> {
        self.services.lock().clone()
    }

    /// Number of full recomputes requested
    pub fn all_count(&self) -> usize {
        self.all.load(Ordering::SeqCst)
    }
}

impl Recompute for RecordingRecompute {
    fn service(&self, id: &str) {
        self.services.lock().push(id.to_string());
    }

    fn all(&self) {
        self.all.fetch_add(1, Ordering::SeqCst);
    }
}
