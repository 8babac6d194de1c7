// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Builders for the Istio objects written for lazy-loaded services.

use super::visibility::Visibility;
use crate::constants::objects::{DESTINATION_HEADER, EGRESS_GATEWAY, EGRESS_GATEWAY_PORT, GATEWAY_ROUTES, NAME_PREFIX};
use crate::kubernetes::config_api::managed_labels;
use crate::model::{Service, ServiceSpec};
use crate::types::envoy_filter::{ConfigPatch, FilterChainMatch, FilterMatch, ListenerMatch, PatchMatch, PatchOperation};
use crate::types::sidecar::EgressListener;
use crate::types::virtual_service::{
    Destination, HttpMatchRequest, HttpRoute, PortSelector, RouteDestination, StringMatch,
};
use crate::types::{
    EnvoyFilter, EnvoyFilterSpec, Sidecar, SidecarSpec, VirtualService, VirtualServiceSpec, WorkloadSelector,
};
use kube::api::ObjectMeta;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
const HTTP_CONNECTION_MANAGER_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

/// Settings shared by every object builder
#[derive(Clone, Debug)]
pub struct ObjectContext {
    pub control_plane_namespace: String,
    pub cluster_domain: String,
}

impl ObjectContext {
    fn gateway_host(&self) -> String {
        format!("{}.{}.svc.{}", EGRESS_GATEWAY, self.control_plane_namespace, self.cluster_domain)
    }

    fn gateway_cluster(&self) -> String {
        format!("outbound|{}||{}", EGRESS_GATEWAY_PORT, self.gateway_host())
    }
}

/// Name of the per-service Sidecar and EnvoyFilter
pub fn object_name(service: &str) -> String {
    format!("{}{}", NAME_PREFIX, service)
}

fn metadata(name: String, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(managed_labels()),
        ..Default::default()
    }
}

fn workload_selector(spec: &ServiceSpec) -> Option<WorkloadSelector> {
    Some(WorkloadSelector {
        labels: spec.selector.clone(),
    })
}

/// Egress scope: the control plane namespace wildcard followed by the sorted visible hosts
pub fn build_sidecar(svc: &Service, spec: &ServiceSpec, visibility: &Visibility, ctx: &ObjectContext) -> Sidecar {
    let hosts = std::iter::once(format!("{}/*", ctx.control_plane_namespace))
        .chain(visibility.hosts.iter().cloned())
        .collect();

    Sidecar {
        metadata: metadata(object_name(&svc.name), &svc.namespace),
        spec: SidecarSpec {
            workload_selector: workload_selector(spec),
            egress: vec![EgressListener { hosts }],
        },
    }
}

/// Redirect of every hidden HTTP service to the egress gateway, one patch per port.
///
/// `None` when no port has a hidden service.
pub fn build_envoy_filter(
    svc: &Service,
    spec: &ServiceSpec,
    visibility: &Visibility,
    services: &[(Arc<Service>, ServiceSpec)],
    ctx: &ObjectContext,
) -> Option<EnvoyFilter> {
    let mut hidden: BTreeMap<u16, Vec<&Service>> = BTreeMap::new();
    for (other, other_spec) in services {
        if other.namespace == ctx.control_plane_namespace || visibility.is_visible(&other.id) {
            continue;
        }
        for port in &other_spec.http_ports {
            hidden.entry(*port).or_default().push(other.as_ref());
        }
    }
    if hidden.is_empty() {
        return None;
    }

    let config_patches = hidden
        .into_iter()
        .map(|(port, targets)| {
            let virtual_hosts: Vec<serde_json::Value> = targets
                .into_iter()
                .map(|target| virtual_host(target, port, &svc.namespace, ctx))
                .collect();
            ConfigPatch {
                apply_to: "NETWORK_FILTER".to_string(),
                match_: Some(PatchMatch {
                    context: Some("SIDECAR_OUTBOUND".to_string()),
                    listener: Some(ListenerMatch {
                        port_number: Some(u32::from(port)),
                        filter_chain: Some(FilterChainMatch {
                            filter: Some(FilterMatch {
                                name: HTTP_CONNECTION_MANAGER.to_string(),
                            }),
                        }),
                    }),
                }),
                patch: Some(PatchOperation {
                    operation: "MERGE".to_string(),
                    value: Some(json!({
                        "typed_config": {
                            "@type": HTTP_CONNECTION_MANAGER_TYPE,
                            "route_config": {
                                "name": port.to_string(),
                                "virtual_hosts": virtual_hosts,
                            }
                        }
                    })),
                }),
            }
        })
        .collect();

    Some(EnvoyFilter {
        metadata: metadata(object_name(&svc.name), &svc.namespace),
        spec: EnvoyFilterSpec {
            workload_selector: workload_selector(spec),
            config_patches,
        },
    })
}

fn virtual_host(target: &Service, port: u16, source_namespace: &str, ctx: &ObjectContext) -> serde_json::Value {
    let destination = format!("{}:{}", target.id, port);
    let short = format!("{}.{}", target.name, target.namespace);

    let mut names = vec![target.id.clone(), short];
    if target.namespace == source_namespace {
        names.push(target.name.clone());
    }
    let domains: Vec<String> = names
        .into_iter()
        .flat_map(|name| [format!("{}:{}", name, port), name])
        .collect();

    json!({
        "name": destination,
        "domains": domains,
        "routes": [{
            "match": { "prefix": "/" },
            "route": { "cluster": ctx.gateway_cluster() },
            "request_headers_to_add": [{
                "header": { "key": DESTINATION_HEADER, "value": destination }
            }]
        }]
    })
}

/// Egress gateway routing table: one header-matched route per service HTTP port.
///
/// Routes are sorted by host, then by port descending. `None` when there are no routes.
pub fn build_gateway_routes(services: &[(Arc<Service>, ServiceSpec)], ctx: &ObjectContext) -> Option<VirtualService> {
    let mut targets: Vec<(&str, u16)> = services
        .iter()
        .filter(|(svc, _)| svc.namespace != ctx.control_plane_namespace)
        .flat_map(|(svc, spec)| spec.http_ports.iter().map(move |port| (svc.id.as_str(), *port)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if targets.is_empty() {
        return None;
    }
    targets.sort_by(|(a_host, a_port), (b_host, b_port)| a_host.cmp(b_host).then(b_port.cmp(a_port)));

    let http = targets
        .into_iter()
        .map(|(host, port)| {
            let destination = format!("{}:{}", host, port);
            HttpRoute {
                name: Some(destination.clone()),
                matches: vec![HttpMatchRequest {
                    headers: BTreeMap::from([(
                        DESTINATION_HEADER.to_string(),
                        StringMatch {
                            exact: Some(destination),
                            prefix: None,
                        },
                    )]),
                }],
                route: vec![RouteDestination {
                    destination: Destination {
                        host: host.to_string(),
                        subset: None,
                        port: Some(PortSelector {
                            number: u32::from(port),
                        }),
                    },
                }],
            }
        })
        .collect();

    Some(VirtualService {
        metadata: metadata(GATEWAY_ROUTES.to_string(), &ctx.control_plane_namespace),
        spec: VirtualServiceSpec {
            hosts: vec!["*".to_string()],
            gateways: vec![EGRESS_GATEWAY.to_string()],
            http,
            tcp: Vec::new(),
        },
    })
}
