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

use serde::{Deserialize, Serialize};

use crate::serde_utils::{
    convert_numeric_with_shellexpand, convert_optional_string_with_shellexpand,
    convert_string_with_shellexpand,
};

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 16;
pub const DEFAULT_MAX_POOLED_SESSIONS: usize = 64;
pub const DEFAULT_REQUEST_TIMEOUT_S: u64 = 60;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 8;

const fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

const fn default_max_pooled_sessions() -> usize {
    DEFAULT_MAX_POOLED_SESSIONS
}

const fn default_request_timeout_s() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_S
}

const fn default_max_concurrent_streams() -> usize {
    DEFAULT_MAX_CONCURRENT_STREAMS
}

/// Settings of the build cache publishing store itself.
///
/// **Example JSON Config:**
/// ```json
/// {
///   "concurrency_limit": 32,
///   "max_pooled_sessions": "${MAX_POOLED_SESSIONS:-64}"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublishingStoreSpec {
    /// Maximum number of publish operations that may run at the same
    /// time. Additional callers wait for a slot to free up.
    ///
    /// Default: 16
    #[serde(
        default = "default_concurrency_limit",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub concurrency_limit: usize,

    /// Maximum number of remote cache sessions kept alive at once. When
    /// exceeded the least recently used idle session is shut down.
    ///
    /// Default: 64
    #[serde(
        default = "default_max_pooled_sessions",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub max_pooled_sessions: usize,
}

impl Default for PublishingStoreSpec {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_pooled_sessions: DEFAULT_MAX_POOLED_SESSIONS,
        }
    }
}

/// Where the metadata and content of a build should be published to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PublishingSpec {
    /// A remote build cache service.
    ///
    /// **Example JSON Config:**
    /// ```json
    /// "build_cache": {
    ///   "endpoint": "https://cache.example.com",
    ///   "cache_namespace": "main",
    ///   "request_timeout_s": 30
    /// }
    /// ```
    BuildCache(BuildCacheSpec),

    /// A blob container.
    ///
    /// **Example JSON Config:**
    /// ```json
    /// "azure_blob": {
    ///   "account_name": "buildartifacts",
    ///   "container_name": "cache"
    /// }
    /// ```
    AzureBlob(AzureBlobPublishingSpec),
}

impl PublishingSpec {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BuildCache(_) => "build_cache",
            Self::AzureBlob(_) => "azure_blob",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct BuildCacheSpec {
    /// Address of the build cache service.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub endpoint: String,

    /// Namespace of the cache inside the service. Sessions for different
    /// namespaces are never shared.
    #[serde(default, deserialize_with = "convert_string_with_shellexpand")]
    pub cache_namespace: String,

    /// Timeout applied by the service client to every request.
    ///
    /// Default: 60
    #[serde(
        default = "default_request_timeout_s",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub request_timeout_s: u64,

    /// Maximum number of content streams the client uploads in parallel.
    ///
    /// Default: 8
    #[serde(
        default = "default_max_concurrent_streams",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub max_concurrent_streams: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct AzureBlobPublishingSpec {
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub account_name: String,

    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub container_name: String,

    /// Optional prefix prepended to every blob name.
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub key_prefix: Option<String>,
}
