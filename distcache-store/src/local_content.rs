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

use async_trait::async_trait;
use distcache_error::Error;
use distcache_util::common::ContentHash;

use crate::remote_cache::ContentStream;

/// Short lived, read only view of the content held on this machine.
///
/// Callers must call `shutdown` once done, whether or not the work
/// succeeded.
#[async_trait]
pub trait ReadOnlyContentSession: Send + Sync {
    async fn startup(&self) -> Result<(), Error>;

    /// Same contract as `BuildCacheSession::pin`, against local content.
    async fn pin(&self, hashes: &[ContentHash], results: &mut [Option<u64>])
    -> Result<(), Error>;

    async fn open_stream(&self, hash: ContentHash) -> Result<ContentStream, Error>;

    async fn shutdown(&self) -> Result<(), Error>;
}

pub trait LocalContentSource: Send + Sync + 'static {
    fn create_read_only_session(
        &self,
        name: &str,
    ) -> Result<Box<dyn ReadOnlyContentSession>, Error>;
}
