// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reads and writes of the objects derived from the aggregated state.

use crate::constants::{labels, OPERATOR_NAME};
use crate::error::Result;
use crate::types::{EnvoyFilter, Sidecar, VirtualService};
use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, PostParams},
    core::NamespaceResourceScope,
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info, instrument};

/// Idempotent writes against the configuration API.
///
/// `apply_*` creates the object when absent and replaces it when its spec differs;
/// `delete_*` succeeds when the object is already gone. `list_*` return only objects
/// carrying the ownership label, across all namespaces.
#[async_trait]
pub trait ConfigApi: Send + Sync + 'static {
    async fn list_sidecars(&self) -> Result<Vec<Sidecar>>;
    async fn list_envoy_filters(&self) -> Result<Vec<EnvoyFilter>>;
    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>>;
    async fn apply_sidecar(&self, sidecar: &Sidecar) -> Result<()>;
    async fn delete_sidecar(&self, namespace: &str, name: &str) -> Result<()>;
    async fn apply_envoy_filter(&self, filter: &EnvoyFilter) -> Result<()>;
    async fn delete_envoy_filter(&self, namespace: &str, name: &str) -> Result<()>;
    async fn apply_virtual_service(&self, virtual_service: &VirtualService) -> Result<()>;
    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Labels carried by every object this controller writes
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        labels::MANAGED_BY.to_string(),
        labels::MANAGED_BY_VALUE.to_string(),
    )])
}

/// Check if an object was written by this controller
pub fn is_managed(meta: &ObjectMeta) -> bool {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(labels::MANAGED_BY))
        .is_some_and(|v| v == labels::MANAGED_BY_VALUE)
}

/// [`ConfigApi`] backed by the home cluster's API server
#[derive(Clone)]
pub struct KubeConfigApi {
    client: Client,
}

impl KubeConfigApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self, obj, same_spec), fields(kind = %K::kind(&()), object = %obj.name_any()))]
    async fn upsert<K>(&self, obj: &K, same_spec: fn(&K, &K) -> bool) -> Result<()>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned
            + Send
            + Sync,
    {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        match api.get(&name).await {
            Ok(current) => {
                if same_spec(&current, obj) && is_managed(current.meta()) {
                    debug!("{}/{} is up to date", namespace, name);
                    return Ok(());
                }
                let mut next = obj.clone();
                next.meta_mut().resource_version = current.resource_version();
                api.replace(&name, &post_params(), &next).await?;
                info!("Updated {} {}/{}", K::kind(&()), namespace, name);
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                api.create(&post_params(), obj).await?;
                info!("Created {} {}/{}", K::kind(&()), namespace, name);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn list_managed<K>(&self) -> Result<Vec<K>>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{}={}", labels::MANAGED_BY, labels::MANAGED_BY_VALUE));
        let objects = api.list(&params).await?.items;
        debug!("Found {} managed {} objects", objects.len(), K::kind(&()));
        Ok(objects)
    }

    async fn remove<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Send
            + Sync,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted {} {}/{}", K::kind(&()), namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!("{} {}/{} already absent", K::kind(&()), namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ConfigApi for KubeConfigApi {
    async fn list_sidecars(&self) -> Result<Vec<Sidecar>> {
        self.list_managed().await
    }

    async fn list_envoy_filters(&self) -> Result<Vec<EnvoyFilter>> {
        self.list_managed().await
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>> {
        self.list_managed().await
    }

    async fn apply_sidecar(&self, sidecar: &Sidecar) -> Result<()> {
        self.upsert(sidecar, |a, b| a.spec == b.spec).await
    }

    async fn delete_sidecar(&self, namespace: &str, name: &str) -> Result<()> {
        self.remove::<Sidecar>(namespace, name).await
    }

    async fn apply_envoy_filter(&self, filter: &EnvoyFilter) -> Result<()> {
        self.upsert(filter, |a, b| a.spec == b.spec).await
    }

    async fn delete_envoy_filter(&self, namespace: &str, name: &str) -> Result<()> {
        self.remove::<EnvoyFilter>(namespace, name).await
    }

    async fn apply_virtual_service(&self, virtual_service: &VirtualService) -> Result<()> {
        self.upsert(virtual_service, |a, b| a.spec == b.spec).await
    }

    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.remove::<VirtualService>(namespace, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{not_found_json, MockService};
    use crate::types::{sidecar::EgressListener, SidecarSpec};

    const SIDECARS: &str = "/apis/networking.istio.io/v1alpha3/namespaces/ns1/sidecars";

    fn make_sidecar(hosts: &[&str]) -> Sidecar {
        let mut sidecar = Sidecar::new(
            "lazyscope-orders",
            SidecarSpec {
                workload_selector: None,
                egress: vec![EgressListener {
                    hosts: hosts.iter().map(|h| h.to_string()).collect(),
                }],
            },
        );
        sidecar.metadata.namespace = Some("ns1".to_string());
        sidecar.metadata.labels = Some(managed_labels());
        sidecar
    }

    fn sidecar_json(sidecar: &Sidecar, resource_version: &str) -> String {
        let mut value = serde_json::to_value(sidecar).unwrap();
        value["metadata"]["resourceVersion"] = serde_json::json!(resource_version);
        value.to_string()
    }

    #[tokio::test]
    async fn test_apply_creates_when_absent() {
        let sidecar = make_sidecar(&["istio-system/*"]);
        let mock = MockService::new().on_post(SIDECARS, 201, &sidecar_json(&sidecar, "1"));
        let api = KubeConfigApi::new(mock.clone().into_client());

        api.apply_sidecar(&sidecar).await.unwrap();

        assert_eq!(
            mock.requests(),
            vec![
                ("GET".to_string(), format!("{}/lazyscope-orders", SIDECARS)),
                ("POST".to_string(), SIDECARS.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_skips_identical_spec() {
        let sidecar = make_sidecar(&["istio-system/*"]);
        let path = format!("{}/lazyscope-orders", SIDECARS);
        let mock = MockService::new().on_get(&path, 200, &sidecar_json(&sidecar, "7"));
        let api = KubeConfigApi::new(mock.clone().into_client());

        api.apply_sidecar(&sidecar).await.unwrap();

        assert_eq!(mock.requests(), vec![("GET".to_string(), path)]);
    }

    #[tokio::test]
    async fn test_apply_replaces_drifted_spec() {
        let current = make_sidecar(&["istio-system/*"]);
        let desired = make_sidecar(&["istio-system/*", "ns2/billing.ns2.svc.cluster.local"]);
        let path = format!("{}/lazyscope-orders", SIDECARS);
        let mock = MockService::new()
            .on_get(&path, 200, &sidecar_json(&current, "7"))
            .on_put(&path, 200, &sidecar_json(&desired, "8"));
        let api = KubeConfigApi::new(mock.clone().into_client());

        api.apply_sidecar(&desired).await.unwrap();

        assert_eq!(
            mock.requests(),
            vec![("GET".to_string(), path.clone()), ("PUT".to_string(), path)]
        );
    }

    #[tokio::test]
    async fn test_delete_tolerates_not_found() {
        let path = format!("{}/lazyscope-orders", SIDECARS);
        let mock = MockService::new().on_delete(&path, 404, &not_found_json("sidecars", "lazyscope-orders"));
        let api = KubeConfigApi::new(mock.clone().into_client());

        api.delete_sidecar("ns1", "lazyscope-orders").await.unwrap();

        assert_eq!(mock.requests(), vec![("DELETE".to_string(), path)]);
    }

    #[tokio::test]
    async fn test_apply_surfaces_server_errors() {
        let sidecar = make_sidecar(&["istio-system/*"]);
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": "etcd is unavailable",
            "reason": "InternalError",
            "code": 500
        })
        .to_string();
        let mock = MockService::new().on_get(&format!("{}/lazyscope-orders", SIDECARS), 500, &body);
        let api = KubeConfigApi::new(mock.into_client());

        assert!(api.apply_sidecar(&sidecar).await.is_err());
    }

    #[tokio::test]
    async fn test_list_returns_managed_objects() {
        let sidecar = make_sidecar(&["istio-system/*"]);
        let list = serde_json::json!({
            "apiVersion": "networking.istio.io/v1alpha3",
            "kind": "SidecarList",
            "metadata": {"resourceVersion": "12"},
            "items": [serde_json::from_str::<serde_json::Value>(&sidecar_json(&sidecar, "7")).unwrap()]
        })
        .to_string();
        let path = "/apis/networking.istio.io/v1alpha3/sidecars";
        let mock = MockService::new().on_get(path, 200, &list);
        let api = KubeConfigApi::new(mock.clone().into_client());

        let sidecars = api.list_sidecars().await.unwrap();

        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars[0].spec, sidecar.spec);
        assert_eq!(mock.requests(), vec![("GET".to_string(), path.to_string())]);
    }

    #[test]
    fn test_is_managed() {
        let mut meta = ObjectMeta::default();
        assert!(!is_managed(&meta));
        meta.labels = Some(managed_labels());
        assert!(is_managed(&meta));
    }
}
