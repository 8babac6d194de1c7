// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch-driven controller for one resource kind, built on [`kube::runtime::Controller`].
//!
//! Watch events are applied to a reflector cache first; only then are the affected objects
//! handed to the controller as triggers. The controller reconciles from the cache, so a key
//! whose object is gone surfaces as `ObjectNotFound` and is routed to
//! [`ResourceHandler::delete`]. Nothing is triggered before the initial list is complete.

use super::queue::backoff;
use crate::error::{LazyError, Result};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{stream, Stream, StreamExt};
use kube::runtime::controller::{self, Action, Config as ControllerConfig, Controller};
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{
    reflector::{self, store::Writer, ObjectRef, Store},
    watcher::{self, Config as WatcherConfig, Event},
    WatchStreamExt,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callbacks invoked by a [`ResourceController`] for the keys of its resource kind.
#[async_trait]
pub trait ResourceHandler<K>: Send + Sync + 'static {
    /// Whether an update from `old` to `new` is worth processing
    fn needs_update(&self, _old: &K, _new: &K) -> bool {
        true
    }

    async fn sync(&self, key: &str, obj: Arc<K>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Object key: `namespace/name`, or `name` for cluster-scoped objects
pub fn key_for<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Split an object key into `(namespace, name)`
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((None, name)),
        [ns, name] if !ns.is_empty() && !name.is_empty() => Ok((Some(ns), name)),
        _ => Err(LazyError::InvalidKey(key.to_string())),
    }
}

fn key_for_ref<K: Resource>(oref: &ObjectRef<K>) -> String {
    match &oref.namespace {
        Some(ns) => format!("{}/{}", ns, oref.name),
        None => oref.name.clone(),
    }
}

/// Handle to ask a running controller to reconcile its whole cache again
#[derive(Clone)]
pub struct ControllerHandle {
    reload: UnboundedSender<()>,
}

impl ControllerHandle {
    pub fn requeue_all(&self) {
        if self.reload.unbounded_send(()).is_err() {
            debug!("Controller already stopped, requeue ignored");
        }
    }
}

/// Cached objects at the start of a relist and the keys seen since
struct Relist<K> {
    before: HashMap<String, Arc<K>>,
    seen: HashSet<String>,
    pending: Vec<K>,
}

impl<K> Default for Relist<K> {
    fn default() -> Self {
        Self {
            before: HashMap::new(),
            seen: HashSet::new(),
            pending: Vec::new(),
        }
    }
}

struct Context<H> {
    name: String,
    handler: Arc<H>,
    failures: Mutex<HashMap<String, u32>>,
}

pub struct ResourceController<K, H>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    name: String,
    api: Api<K>,
    watcher_config: WatcherConfig,
    handler: Arc<H>,
    workers: usize,
    store: Store<K>,
    writer: Writer<K>,
    reload_tx: UnboundedSender<()>,
    reload_rx: UnboundedReceiver<()>,
}

impl<K, H> ResourceController<K, H>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Debug + Hash + Eq + Clone + Default + Unpin + Send + Sync,
    H: ResourceHandler<K>,
{
    pub fn new(
        name: impl Into<String>,
        api: Api<K>,
        watcher_config: WatcherConfig,
        handler: Arc<H>,
        workers: usize,
    ) -> Self {
        let (store, writer) = reflector::store();
        let (reload_tx, reload_rx) = mpsc::unbounded();
        Self {
            name: name.into(),
            api,
            watcher_config,
            handler,
            workers,
            store,
            writer,
            reload_tx,
            reload_rx,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            reload: self.reload_tx.clone(),
        }
    }

    /// Watch and reconcile until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let events = watcher::watcher(self.api.clone(), self.watcher_config.clone()).default_backoff();
        self.run_events(events, cancel).await
    }

    async fn run_events<S>(self, events: S, cancel: CancellationToken)
    where
        S: Stream<Item = std::result::Result<Event<K>, watcher::Error>> + Send + 'static,
    {
        let Self {
            name,
            handler,
            workers,
            store,
            writer,
            reload_rx,
            ..
        } = self;

        let ctx = Arc::new(Context {
            name: name.clone(),
            handler: handler.clone(),
            failures: Mutex::new(HashMap::new()),
        });
        let concurrency = u16::try_from(workers.max(1)).unwrap_or(u16::MAX);
        info!("Starting {} controller with {} workers", name, concurrency);

        Controller::for_stream(cached_triggers(events, store.clone(), writer, handler), store)
            .with_config(ControllerConfig::default().concurrency(concurrency))
            .reconcile_all_on(reload_rx)
            .graceful_shutdown_on(async move { cancel.cancelled().await })
            .run(reconcile::<K, H>, error_policy::<K, H>, ctx.clone())
            .for_each(|res| {
                let ctx = ctx.clone();
                async move {
                    match res {
                        Ok((oref, _)) => debug!("{}: synced {}", ctx.name, oref),
                        Err(controller::Error::ObjectNotFound(oref)) => {
                            let key = key_for_ref(&oref);
                            ctx.failures.lock().remove(&key);
                            if let Err(e) = ctx.handler.delete(&key).await {
                                warn!("{}: failed to delete {}: {}", ctx.name, key, e);
                            }
                        }
                        // Already reported by the error policy
                        Err(controller::Error::ReconcilerFailed(..)) => {}
                        Err(e) => warn!("{} controller error: {}", ctx.name, e),
                    }
                }
            })
            .await;

        debug!("{} stopped", name);
    }
}

async fn reconcile<K, H>(obj: Arc<K>, ctx: Arc<Context<H>>) -> Result<Action>
where
    K: Resource,
    H: ResourceHandler<K>,
{
    let key = key_for(obj.as_ref());
    ctx.handler.sync(&key, obj).await?;
    ctx.failures.lock().remove(&key);
    Ok(Action::await_change())
}

fn error_policy<K, H>(obj: Arc<K>, error: &LazyError, ctx: Arc<Context<H>>) -> Action
where
    K: Resource,
    H: ResourceHandler<K>,
{
    let key = key_for(obj.as_ref());
    let failures = {
        let mut failures = ctx.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    };
    let delay = backoff(failures);
    warn!("{}: failed to sync {}, retrying in {:?}: {}", ctx.name, key, delay, error);
    Action::requeue(delay)
}

/// Apply watch events to the cache and yield the objects that need reconciling
fn cached_triggers<K, H, S>(
    events: S,
    store: Store<K>,
    mut writer: Writer<K>,
    handler: Arc<H>,
) -> impl Stream<Item = std::result::Result<K, watcher::Error>> + Send + 'static
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Hash + Eq + Clone + Default + Send + Sync,
    H: ResourceHandler<K>,
    S: Stream<Item = std::result::Result<Event<K>, watcher::Error>> + Send + 'static,
{
    let mut relist = None;
    events.flat_map(move |event| {
        let triggers: Vec<_> = match event {
            Ok(event) => apply_event(&store, &mut writer, handler.as_ref(), &mut relist, event)
                .into_iter()
                .map(Ok)
                .collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(triggers)
    })
}

/// Update the cache with one watch event, then return the objects it affects
fn apply_event<K, H>(
    store: &Store<K>,
    writer: &mut Writer<K>,
    handler: &H,
    relist: &mut Option<Relist<K>>,
    event: Event<K>,
) -> Vec<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone + Default,
    H: ResourceHandler<K>,
{
    // The writer buffers a relist until InitDone, so the store still holds the old objects here
    let changed = match &event {
        Event::Apply(obj) | Event::InitApply(obj) => store
            .get(&ObjectRef::from_obj(obj))
            .map_or(true, |old| handler.needs_update(old.as_ref(), obj)),
        _ => false,
    };
    if let Event::Init = event {
        *relist = Some(Relist {
            before: store
                .state()
                .into_iter()
                .map(|o| (key_for(o.as_ref()), o))
                .collect(),
            ..Default::default()
        });
    }

    writer.apply_watcher_event(&event);

    match event {
        Event::Init => Vec::new(),
        Event::InitApply(obj) => {
            let relist = relist.get_or_insert_with(Relist::default);
            relist.seen.insert(key_for(&obj));
            if changed {
                relist.pending.push(obj);
            }
            Vec::new()
        }
        Event::InitDone => match relist.take() {
            Some(Relist {
                before,
                seen,
                mut pending,
            }) => {
                let vanished = before
                    .into_iter()
                    .filter(|(key, _)| !seen.contains(key))
                    .map(|(_, obj)| obj.as_ref().clone());
                pending.extend(vanished);
                pending
            }
            None => Vec::new(),
        },
        Event::Apply(obj) if changed => vec![obj],
        Event::Apply(_) => Vec::new(),
        Event::Delete(obj) => vec![obj],
    }
}
