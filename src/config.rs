// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Name under which the home cluster is registered
    pub cluster_name: String,
    /// Namespace the mesh control plane runs in
    pub control_plane_namespace: String,
    /// Cluster-local DNS domain, as in `name.ns.svc.<domain>`
    pub cluster_domain: String,
    /// ConfigMap in the control-plane namespace holding the mesh config
    pub mesh_configmap: String,
    pub workers: Workers,
}

/// Worker pool sizes per resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workers {
    pub namespaces: usize,
    pub services: usize,
    pub endpoints: usize,
    /// VirtualService, Sidecar, ServiceEntry and secret controllers
    pub config: usize,
    pub lazy_services: usize,
}

impl Default for Workers {
    fn default() -> Self {
        Self {
            namespaces: 2,
            services: 4,
            endpoints: 4,
            config: 2,
            lazy_services: 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "Kubernetes".to_string(),
            control_plane_namespace: "istio-system".to_string(),
            cluster_domain: "cluster.local".to_string(),
            mesh_configmap: "istio".to_string(),
            workers: Workers::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let text = |key: &str, default: String| lookup(key).filter(|v| !v.is_empty()).unwrap_or(default);
        let count = |key: &str, default: usize| -> Result<usize> {
            match lookup(key).filter(|v| !v.is_empty()) {
                None => Ok(default),
                Some(v) => v
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .with_context(|| format!("{} must be a positive integer, got {:?}", key, v)),
            }
        };

        let workers = Workers {
            namespaces: count("NAMESPACE_WORKERS", defaults.workers.namespaces)?,
            services: count("SERVICE_WORKERS", defaults.workers.services)?,
            endpoints: count("ENDPOINTS_WORKERS", defaults.workers.endpoints)?,
            config: count("CONFIG_WORKERS", defaults.workers.config)?,
            lazy_services: count("LAZY_SERVICE_WORKERS", defaults.workers.lazy_services)?,
        };

        Ok(Config {
            cluster_name: text("CLUSTER_NAME", defaults.cluster_name),
            control_plane_namespace: text("ISTIO_NAMESPACE", defaults.control_plane_namespace),
            cluster_domain: text("CLUSTER_DOMAIN", defaults.cluster_domain),
            mesh_configmap: text("MESH_CONFIGMAP", defaults.mesh_configmap),
            workers,
        })
    }
}
