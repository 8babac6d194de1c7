// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Learning of service dependencies from egress gateway access logs.

use super::recompute::Recompute;
use crate::error::Result;
use crate::model::StateStore;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Entry point for the access-log transport
#[derive(Clone)]
pub struct AccessLog {
    store: Arc<StateStore>,
    recompute: Arc<dyn Recompute>,
}

impl AccessLog {
    pub fn new(store: Arc<StateStore>, recompute: Arc<dyn Recompute>) -> Self {
        Self { store, recompute }
    }

    /// Record that the pod at `source_ip` called `destination`.
    ///
    /// `destination_id` may be empty, in which case `destination_ip` is resolved instead.
    /// Records whose source is unknown or not lazy-loaded, or whose destination cannot be
    /// resolved, are dropped. Learned destinations are never forgotten.
    pub fn handle_access(&self, source_ip: &str, destination_id: &str, destination_ip: &str) -> Result<()> {
        let Some(source_id) = self.store.resolve_ip(source_ip) else {
            trace!("Dropping access from unknown source {}", source_ip);
            return Ok(());
        };
        let Some(source) = self.store.service(&source_id) else {
            trace!("Dropping access from {}: service not known", source_id);
            return Ok(());
        };
        if !source.spec().lazy_enabled {
            trace!("Dropping access from {}: lazy loading disabled", source_id);
            return Ok(());
        }

        let destination = if destination_id.is_empty() {
            match self.store.resolve_ip(destination_ip) {
                Some(id) => id,
                None => {
                    debug!("Dropping access from {} to unknown destination {}", source_id, destination_ip);
                    return Ok(());
                }
            }
        } else {
            destination_id.to_string()
        };

        if source.add_egress(&destination) {
            info!("Learned {} -> {}", source_id, destination);
            self.recompute.service(&source_id);
        }
        Ok(())
    }
}
