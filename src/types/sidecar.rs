// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::WorkloadSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "networking.istio.io", version = "v1alpha3", kind = "Sidecar")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<WorkloadSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressListener>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressListener {
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl SidecarSpec {
    /// All egress hosts across listeners
    pub fn egress_hosts(&self) -> impl Iterator<Item = &str> {
        self.egress.iter().flat_map(|e| e.hosts.iter().map(String::as_str))
    }
}
