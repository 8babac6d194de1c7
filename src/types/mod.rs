// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Istio networking resources read and written by the controller.

pub mod envoy_filter;
pub mod service_entry;
pub mod sidecar;
pub mod virtual_service;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use envoy_filter::{EnvoyFilter, EnvoyFilterSpec};
pub use service_entry::{ServiceEntry, ServiceEntrySpec};
pub use sidecar::{Sidecar, SidecarSpec};
pub use virtual_service::{VirtualService, VirtualServiceSpec};

/// Selects the proxies a Sidecar or EnvoyFilter applies to
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct WorkloadSelector {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}
