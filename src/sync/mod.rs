// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster membership and the top-level component graph.

pub mod clusters;
pub mod manager;

pub use clusters::ClusterRegistry;
pub use manager::{Manager, SyncEvent, SyncManagerHandle};
