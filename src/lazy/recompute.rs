// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::controllers::WorkQueue;
use crate::model::StateStore;
use std::sync::Arc;

/// Key of the single gateway routing table in its queue
pub const GATEWAY_KEY: &str = "gateway";

/// Sink for visibility recomputation requests.
///
/// Implementations only enqueue; the work happens on the lazy-service worker pool.
pub trait Recompute: Send + Sync + 'static {
    /// Recompute one service
    fn service(&self, id: &str);

    /// Recompute every known service and the gateway routing table
    fn all(&self);
}

/// Queues feeding the lazy-service and gateway worker pools
#[derive(Clone)]
pub struct LazyQueues {
    store: Arc<StateStore>,
    services: WorkQueue,
    gateway: WorkQueue,
}

impl LazyQueues {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            services: WorkQueue::new(),
            gateway: WorkQueue::new(),
        }
    }

    pub fn services(&self) -> &WorkQueue {
        &self.services
    }

    pub fn gateway(&self) -> &WorkQueue {
        &self.gateway
    }

    pub fn shutdown(&self) {
        self.services.shutdown();
        self.gateway.shutdown();
    }
}

impl Recompute for LazyQueues {
    fn service(&self, id: &str) {
        self.services.add(id);
    }

    fn all(&self) {
        for id in self.store.service_ids() {
            self.services.add(id);
        }
        self.gateway.add(GATEWAY_KEY);
    }
}
