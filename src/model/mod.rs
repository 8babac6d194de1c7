// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Aggregated cross-cluster state: entities, merge rules and the concurrent state store.

pub mod merge;
pub mod namespace;
pub mod service;
pub mod store;

pub use namespace::{LazyStatus, Namespace, NamespaceChange, NamespaceSnapshot};
pub use service::{Service, ServiceSnapshot, ServiceSpec};
pub use store::StateStore;
