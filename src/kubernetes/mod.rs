// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for remote client creation, label selection and configuration writes.

pub mod client;
pub mod config_api;
pub mod selector;

pub use client::{create_client_from_kubeconfig, credential_from_secret};
pub use config_api::{ConfigApi, KubeConfigApi};
pub use selector::{matches_any, MeshConfig};
