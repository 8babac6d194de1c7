// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Worker pools draining a [`WorkQueue`].

use super::queue::WorkQueue;
use crate::error::Result;
use futures::future::join_all;
use std::future::Future;
use tracing::{debug, warn};

/// Run `workers` tasks that process keys from `queue` until it is shut down.
///
/// A failed key is re-added with backoff; a successful one has its backoff cleared.
pub async fn run_workers<F, Fut>(name: &str, queue: WorkQueue, workers: usize, process: F)
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let handles = (0..workers.max(1)).map(|id| {
        let queue = queue.clone();
        let process = process.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            while let Some(key) = queue.get().await {
                match process(key.clone()).await {
                    Ok(()) => queue.forget(&key),
                    Err(e) => {
                        warn!("{} worker {}: failed to process {}: {}", name, id, key, e);
                        queue.add_rate_limited(&key);
                    }
                }
                queue.done(&key);
            }
            debug!("{} worker {} stopped", name, id);
        })
    });

    for result in join_all(handles).await {
        if let Err(e) = result {
            warn!("{} worker panicked: {}", name, e);
        }
    }
}
