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
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use distcache_error::{Code, Error, make_err};
use distcache_store::local_content::{LocalContentSource, ReadOnlyContentSession};
use distcache_store::remote_cache::ContentStream;
use distcache_util::common::ContentHash;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct LocalState {
    content: Mutex<HashMap<ContentHash, Bytes>>,
    stall_streams: AtomicBool,
    stream_opened: Notify,
    sessions_opened: AtomicUsize,
    sessions_started: AtomicUsize,
    sessions_shut_down: AtomicUsize,
}

/// In memory local content with counters for session lifecycle calls.
#[derive(Debug, Default)]
pub(crate) struct MockLocalContent {
    state: Arc<LocalState>,
}

impl MockLocalContent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert_content(&self, data: &'static [u8]) -> ContentHash {
        let hash = ContentHash::compute(data);
        self.state
            .content
            .lock()
            .insert(hash, Bytes::from_static(data));
        hash
    }

    /// Makes `open_stream` hang forever once called.
    pub(crate) fn stall_streams(&self) {
        self.state.stall_streams.store(true, Ordering::Release);
    }

    pub(crate) async fn wait_for_stream_opened(&self) {
        self.state.stream_opened.notified().await;
    }

    pub(crate) fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::Acquire)
    }

    pub(crate) fn sessions_started(&self) -> usize {
        self.state.sessions_started.load(Ordering::Acquire)
    }

    pub(crate) fn sessions_shut_down(&self) -> usize {
        self.state.sessions_shut_down.load(Ordering::Acquire)
    }
}

impl LocalContentSource for MockLocalContent {
    fn create_read_only_session(
        &self,
        _name: &str,
    ) -> Result<Box<dyn ReadOnlyContentSession>, Error> {
        self.state.sessions_opened.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockReadOnlySession {
            state: self.state.clone(),
        }))
    }
}

struct MockReadOnlySession {
    state: Arc<LocalState>,
}

#[async_trait]
impl ReadOnlyContentSession for MockReadOnlySession {
    async fn startup(&self) -> Result<(), Error> {
        self.state.sessions_started.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn pin(
        &self,
        hashes: &[ContentHash],
        results: &mut [Option<u64>],
    ) -> Result<(), Error> {
        let content = self.state.content.lock();
        for (hash, result) in hashes.iter().zip(results.iter_mut()) {
            *result = content.get(hash).map(|data| data.len() as u64);
        }
        Ok(())
    }

    async fn open_stream(&self, hash: ContentHash) -> Result<ContentStream, Error> {
        self.state.stream_opened.notify_one();
        if self.state.stall_streams.load(Ordering::Acquire) {
            futures::future::pending::<()>().await;
        }
        let data = self
            .state
            .content
            .lock()
            .get(&hash)
            .cloned()
            .ok_or_else(|| make_err!(Code::NotFound, "{hash} not in local content"))?;
        let mid = data.len() / 2;
        let chunks: Vec<Result<Bytes, Error>> = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.state.sessions_shut_down.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
