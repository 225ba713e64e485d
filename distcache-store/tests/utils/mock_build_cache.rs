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

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use distcache_config::publishing::BuildCacheSpec;
use distcache_error::{Code, Error, make_err};
use distcache_store::remote_cache::{
    AccessToken, AddOrGetResult, BuildCacheSession, BuildCacheSessionFactory, ContentStream,
};
use distcache_util::common::ContentHash;
use distcache_util::fingerprint::{ContentHashListWithDeterminism, StrongFingerprint};
use distcache_util::resource_pool::PooledResource;
use futures::TryStreamExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RemoteCall {
    Pin(Vec<ContentHash>),
    PutStream(ContentHash),
    AddOrGet(StrongFingerprint),
}

/// In memory stand in for a remote build cache shared by every session.
#[derive(Debug)]
pub(crate) struct MockBuildCache {
    content: Mutex<HashMap<ContentHash, Bytes>>,
    hash_lists: Mutex<HashMap<StrongFingerprint, ContentHashListWithDeterminism>>,
    calls: Mutex<Vec<RemoteCall>>,
    fail_puts: AtomicBool,
    block_submissions: AtomicBool,
    submission_permits: Semaphore,
    submission_started: Notify,
    shutdowns: AtomicUsize,
}

impl MockBuildCache {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            content: Mutex::new(HashMap::new()),
            hash_lists: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_puts: AtomicBool::new(false),
            block_submissions: AtomicBool::new(false),
            submission_permits: Semaphore::new(0),
            submission_started: Notify::new(),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub(crate) fn insert_content(&self, data: &'static [u8]) -> ContentHash {
        let hash = ContentHash::compute(data);
        self.content.lock().insert(hash, Bytes::from_static(data));
        hash
    }

    pub(crate) fn content(&self, hash: &ContentHash) -> Option<Bytes> {
        self.content.lock().get(hash).cloned()
    }

    pub(crate) fn hash_list(
        &self,
        fingerprint: &StrongFingerprint,
    ) -> Option<ContentHashListWithDeterminism> {
        self.hash_lists.lock().get(fingerprint).cloned()
    }

    pub(crate) fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn submissions(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RemoteCall::AddOrGet(_)))
            .count()
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }

    pub(crate) fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::Release);
    }

    /// Makes every submission wait for `release_submissions`.
    pub(crate) fn block_submissions(&self) {
        self.block_submissions.store(true, Ordering::Release);
    }

    pub(crate) fn release_submissions(&self, count: usize) {
        self.submission_permits.add_permits(count);
    }

    pub(crate) async fn wait_for_submission(&self) {
        self.submission_started.notified().await;
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }
}

#[derive(Debug)]
pub(crate) struct MockBuildCacheSession {
    backend: Arc<MockBuildCache>,
}

#[async_trait]
impl PooledResource for MockBuildCacheSession {
    async fn shutdown(&self) -> Result<(), Error> {
        self.backend.shutdowns.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[async_trait]
impl BuildCacheSession for MockBuildCacheSession {
    async fn pin(
        &self,
        hashes: &[ContentHash],
        results: &mut [Option<u64>],
    ) -> Result<(), Error> {
        self.backend.record(RemoteCall::Pin(hashes.to_vec()));
        let content = self.backend.content.lock();
        for (hash, result) in hashes.iter().zip(results.iter_mut()) {
            *result = content.get(hash).map(|data| data.len() as u64);
        }
        Ok(())
    }

    async fn put_stream(&self, hash: ContentHash, stream: ContentStream) -> Result<(), Error> {
        self.backend.record(RemoteCall::PutStream(hash));
        if self.backend.fail_puts.load(Ordering::Acquire) {
            return Err(make_err!(Code::Unavailable, "Remote refused {hash}"));
        }
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        let data = Bytes::from(chunks.concat());
        if ContentHash::compute(&data) != hash {
            return Err(make_err!(Code::DataLoss, "Uploaded data does not match {hash}"));
        }
        self.backend.content.lock().insert(hash, data);
        Ok(())
    }

    async fn add_or_get_content_hash_list(
        &self,
        fingerprint: &StrongFingerprint,
        hash_list: &ContentHashListWithDeterminism,
    ) -> Result<AddOrGetResult, Error> {
        self.backend
            .record(RemoteCall::AddOrGet(fingerprint.clone()));
        self.backend.submission_started.notify_one();
        if self.backend.block_submissions.load(Ordering::Acquire) {
            self.backend
                .submission_permits
                .acquire()
                .await
                .map_err(|e| make_err!(Code::Internal, "{e}"))?
                .forget();
        }
        Ok(match self.backend.hash_lists.lock().entry(fingerprint.clone()) {
            Entry::Occupied(existing) => AddOrGetResult::AlreadyExisted(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(hash_list.clone());
                AddOrGetResult::Added
            }
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockSessionFactory {
    backend: Arc<MockBuildCache>,
    rejected_tokens: Mutex<HashSet<String>>,
    constructions: AtomicUsize,
    /// Session construction never completes while set.
    stall_sessions: AtomicBool,
}

impl MockSessionFactory {
    pub(crate) fn new(backend: Arc<MockBuildCache>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            rejected_tokens: Mutex::new(HashSet::new()),
            constructions: AtomicUsize::new(0),
            stall_sessions: AtomicBool::new(false),
        })
    }

    pub(crate) fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().insert(token.to_string());
    }

    pub(crate) fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Acquire)
    }

    pub(crate) fn stall_sessions(&self, stall: bool) {
        self.stall_sessions.store(stall, Ordering::Release);
    }
}

#[async_trait]
impl BuildCacheSessionFactory for MockSessionFactory {
    async fn create_session(
        &self,
        spec: &BuildCacheSpec,
        token: &AccessToken,
    ) -> Result<Arc<dyn BuildCacheSession>, Error> {
        self.constructions.fetch_add(1, Ordering::AcqRel);
        if self.stall_sessions.load(Ordering::Acquire) {
            futures::future::pending::<()>().await;
        }
        if self.rejected_tokens.lock().contains(token.secret()) {
            return Err(make_err!(
                Code::Unauthenticated,
                "Token rejected by {}",
                spec.endpoint
            ));
        }
        Ok(Arc::new(MockBuildCacheSession {
            backend: self.backend.clone(),
        }))
    }
}
