// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Controller plumbing: watch-driven resource controllers, plus the work queue and worker pools
//! used for keys that have no watch behind them.

pub mod queue;
pub mod resource;
pub mod worker;

pub use queue::WorkQueue;
pub use resource::{key_for, split_key, ControllerHandle, ResourceController, ResourceHandler};
pub use worker::run_workers;
