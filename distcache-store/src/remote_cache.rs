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

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use distcache_config::publishing::BuildCacheSpec;
use distcache_error::Error;
use distcache_util::common::ContentHash;
use distcache_util::fingerprint::{ContentHashListWithDeterminism, StrongFingerprint};
use distcache_util::resource_pool::PooledResource;
use futures::stream::BoxStream;

/// Chunks of one blob, read front to back.
pub type ContentStream = BoxStream<'static, Result<Bytes, Error>>;

/// Credential presented to the remote build cache.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Outcome of submitting a fingerprint to hash list mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOrGetResult {
    Added,
    /// The remote already had a mapping for the fingerprint; it is returned
    /// unchanged.
    AlreadyExisted(ContentHashListWithDeterminism),
}

/// A started connection to a remote build cache for one credential.
#[async_trait]
pub trait BuildCacheSession: PooledResource + fmt::Debug {
    /// Pins every hash in `hashes`. `results[i]` is set to the size of
    /// `hashes[i]` when it is present remotely and left `None` otherwise.
    async fn pin(&self, hashes: &[ContentHash], results: &mut [Option<u64>])
    -> Result<(), Error>;

    /// Uploads one blob.
    async fn put_stream(&self, hash: ContentHash, stream: ContentStream) -> Result<(), Error>;

    async fn add_or_get_content_hash_list(
        &self,
        fingerprint: &StrongFingerprint,
        hash_list: &ContentHashListWithDeterminism,
    ) -> Result<AddOrGetResult, Error>;
}

/// Builds and starts remote build cache sessions.
#[async_trait]
pub trait BuildCacheSessionFactory: Send + Sync + 'static {
    async fn create_session(
        &self,
        spec: &BuildCacheSpec,
        token: &AccessToken,
    ) -> Result<Arc<dyn BuildCacheSession>, Error>;
}
