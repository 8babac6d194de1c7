// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LazyError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to parse kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("Invalid cluster credential: {0}")]
    Credential(String),

    #[error("Cluster {0} is already registered")]
    DuplicateCluster(String),

    #[error("Cluster {0} is not registered")]
    ClusterNotFound(String),

    #[error("Namespace {0} is not known yet")]
    NamespaceNotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Invalid mesh config: {0}")]
    MeshConfig(String),
}

pub type Result<T> = std::result::Result<T, LazyError>;
