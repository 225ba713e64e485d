// Copyright 2024 The Distcache Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt::Debug;
use core::hash::Hash;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use distcache_error::{Code, Error, ResultExt, make_err};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{Level, event};

/// A resource that must be shut down before it is dropped.
#[async_trait]
pub trait PooledResource: Send + Sync + 'static {
    async fn shutdown(&self) -> Result<(), Error>;
}

/// Builds and starts the resource for a key.
pub type ResourceFactory<K, R> =
    Box<dyn Fn(K) -> BoxFuture<'static, Result<Arc<R>, Error>> + Send + Sync>;

struct PoolSlot<R: ?Sized> {
    cell: OnceCell<Arc<R>>,
    shutdown_claimed: AtomicBool,
}

impl<R: ?Sized> PoolSlot<R> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            shutdown_claimed: AtomicBool::new(false),
        }
    }

    /// Returns the constructed resource to the first caller that asks to
    /// shut it down, and `None` to everyone after.
    fn claim_shutdown(&self) -> Option<Arc<R>> {
        let resource = self.cell.get()?;
        if self.shutdown_claimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(resource.clone())
    }
}

struct PoolEntry<R: ?Sized> {
    /// Shared with every caller currently using the entry. A strong count
    /// of one means nobody is using it.
    slot: Arc<PoolSlot<R>>,
    last_used: u64,
}

struct PoolState<K, R: ?Sized> {
    entries: HashMap<K, PoolEntry<R>>,
    /// Incremented on every use, orders entries by recency.
    generation: u64,
    disposed: bool,
}

impl<K: Clone + Eq + Hash, R: ?Sized> PoolState<K, R> {
    /// Removes idle entries, least recently used first, until at most
    /// `max_resources` remain. Returns the constructed resources that were
    /// removed so they can be shut down outside the lock.
    fn evict_excess(&mut self, max_resources: usize) -> Vec<Arc<R>> {
        let mut evicted = Vec::new();
        while self.entries.len() > max_resources {
            let candidate = self
                .entries
                .iter()
                .filter(|(_, entry)| Arc::strong_count(&entry.slot) == 1)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            let Some(key) = candidate else {
                break;
            };
            if let Some(resource) = self
                .entries
                .remove(&key)
                .and_then(|entry| entry.slot.claim_shutdown())
            {
                evicted.push(resource);
            }
        }
        evicted
    }
}

async fn shutdown_evicted<R: PooledResource + ?Sized>(evicted: Vec<Arc<R>>) {
    for resource in evicted {
        event!(Level::INFO, "Shutting down evicted pooled resource");
        if let Err(err) = resource.shutdown().await {
            event!(
                Level::WARN,
                ?err,
                "Failed to shut down evicted pooled resource"
            );
        }
    }
}

/// Lazily constructs one resource per key and hands it to callers.
///
/// Construction for a key happens at most once at a time: concurrent
/// callers for the same key wait on the in-flight construction. A failed
/// or abandoned construction leaves the key empty so the next caller tries
/// again, and never affects other keys. Every constructed resource is shut
/// down exactly once, either on eviction or on dispose.
pub struct KeyedResourcePool<K, R: ?Sized> {
    factory: ResourceFactory<K, R>,
    max_resources: usize,
    state: Mutex<PoolState<K, R>>,
}

impl<K, R> KeyedResourcePool<K, R>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    R: PooledResource + ?Sized,
{
    pub fn new(max_resources: usize, factory: ResourceFactory<K, R>) -> Self {
        Self {
            factory,
            max_resources: max_resources.max(1),
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                generation: 0,
                disposed: false,
            }),
        }
    }

    /// Number of keys currently tracked, constructed or not.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Runs `callback` with the resource for `key`, constructing it first if
    /// needed.
    pub async fn use_resource<T, F, Fut>(&self, key: &K, callback: F) -> Result<T, Error>
    where
        F: FnOnce(Arc<R>) -> Fut + Send,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        self.use_resource_or_abort(key, core::future::pending(), callback)
            .await
    }

    /// Same as [`Self::use_resource`], but stops waiting for the resource
    /// and returns the error from `abort` if it resolves first. Abandoning
    /// an in-flight construction leaves the key empty for the next caller.
    /// `abort` is not observed once `callback` runs.
    pub async fn use_resource_or_abort<T, A, F, Fut>(
        &self,
        key: &K,
        abort: A,
        callback: F,
    ) -> Result<T, Error>
    where
        A: Future<Output = Error> + Send,
        F: FnOnce(Arc<R>) -> Fut + Send,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        let (slot, evicted) = {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(make_err!(
                    Code::FailedPrecondition,
                    "KeyedResourcePool was disposed while requesting {key:?}"
                ));
            }
            state.generation += 1;
            let generation = state.generation;
            let slot = match state.entries.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    occupied.get_mut().last_used = generation;
                    occupied.get().slot.clone()
                }
                Entry::Vacant(vacant) => vacant
                    .insert(PoolEntry {
                        slot: Arc::new(PoolSlot::new()),
                        last_used: generation,
                    })
                    .slot
                    .clone(),
            };
            let evicted = state.evict_excess(self.max_resources);
            (slot, evicted)
        };
        // Evicted resources are unreachable from the pool now, so their
        // shutdown must not depend on this caller staying alive.
        if !evicted.is_empty() {
            tokio::spawn(shutdown_evicted(evicted));
        }

        let construction = slot.cell.get_or_try_init(|| {
            event!(Level::DEBUG, ?key, "Constructing pooled resource");
            (self.factory)(key.clone())
        });
        let resource = tokio::select! {
            biased;
            err = abort => return Err(err),
            result = construction => result
                .err_tip(|| format!("While constructing pooled resource for {key:?}"))?
                .clone(),
        };

        // The pool may have been disposed while the resource was built, in
        // which case dispose never saw it.
        let disposed = self.state.lock().disposed;
        if disposed {
            let err = make_err!(
                Code::FailedPrecondition,
                "KeyedResourcePool was disposed while constructing {key:?}"
            );
            let Some(resource) = slot.claim_shutdown() else {
                return Err(err);
            };
            return Err(match resource.shutdown().await {
                Ok(()) => err,
                Err(shutdown_err) => err.merge(shutdown_err),
            });
        }

        callback(resource).await
    }

    /// Shuts down every constructed resource. Later uses fail.
    pub async fn dispose(&self) -> Result<(), Error> {
        let resources: Vec<Arc<R>> = {
            let mut state = self.state.lock();
            state.disposed = true;
            state
                .entries
                .drain()
                .filter_map(|(_, entry)| entry.slot.claim_shutdown())
                .collect()
        };
        event!(
            Level::INFO,
            count = resources.len(),
            "Disposing pooled resources"
        );
        let mut result: Result<(), Error> = Ok(());
        for resource in resources {
            result = result.merge(resource.shutdown().await);
        }
        result
    }
}

impl<K, R: ?Sized> Debug for KeyedResourcePool<K, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KeyedResourcePool")
            .field("max_resources", &self.max_resources)
            .field("entries", &state.entries.len())
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}
