// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Lazy loading: visibility computation, learning from access logs and object reconciliation.

pub mod access_log;
pub mod objects;
pub mod reconciler;
pub mod recompute;
pub mod visibility;

pub use access_log::AccessLog;
pub use reconciler::Reconciler;
pub use recompute::{LazyQueues, Recompute, GATEWAY_KEY};
pub use visibility::{compute, Visibility};
