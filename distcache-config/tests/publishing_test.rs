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

use distcache_config::load_config;
use distcache_config::publishing::{
    AzureBlobPublishingSpec, BuildCacheSpec, DEFAULT_CONCURRENCY_LIMIT,
    DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_POOLED_SESSIONS, DEFAULT_REQUEST_TIMEOUT_S,
    PublishingSpec, PublishingStoreSpec,
};
use distcache_error::Code;
use pretty_assertions::assert_eq;

#[test]
fn empty_store_spec_uses_defaults() {
    let spec: PublishingStoreSpec = load_config("{}").unwrap();
    assert_eq!(spec, PublishingStoreSpec::default());
    assert_eq!(spec.concurrency_limit, DEFAULT_CONCURRENCY_LIMIT);
    assert_eq!(spec.max_pooled_sessions, DEFAULT_MAX_POOLED_SESSIONS);
}

#[test]
fn store_spec_accepts_numbers_and_expanded_strings() {
    let spec: PublishingStoreSpec = load_config(
        r#"{
            // Comments are fine in json5.
            concurrency_limit: 4,
            max_pooled_sessions: "${DISTCACHE_TEST_UNSET_POOL_SIZE:-12}",
        }"#,
    )
    .unwrap();
    assert_eq!(
        spec,
        PublishingStoreSpec {
            concurrency_limit: 4,
            max_pooled_sessions: 12,
        }
    );
}

#[test]
fn store_spec_rejects_unknown_fields() {
    let err = load_config::<PublishingStoreSpec>(r#"{ concurency_limit: 4 }"#).unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);
}

#[test]
fn build_cache_spec_parses_with_defaults() {
    let spec: PublishingSpec = load_config(
        r#"{
            build_cache: {
                endpoint: "https://cache.example.com",
            }
        }"#,
    )
    .unwrap();
    assert_eq!(
        spec,
        PublishingSpec::BuildCache(BuildCacheSpec {
            endpoint: "https://cache.example.com".to_string(),
            cache_namespace: String::new(),
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
        })
    );
    assert_eq!(spec.kind(), "build_cache");
}

#[test]
fn azure_blob_spec_parses() {
    let spec: PublishingSpec = load_config(
        r#"{
            azure_blob: {
                account_name: "artifacts",
                container_name: "${DISTCACHE_TEST_UNSET_CONTAINER:-cache}",
            }
        }"#,
    )
    .unwrap();
    assert_eq!(
        spec,
        PublishingSpec::AzureBlob(AzureBlobPublishingSpec {
            account_name: "artifacts".to_string(),
            container_name: "cache".to_string(),
            key_prefix: None,
        })
    );
    assert_eq!(spec.kind(), "azure_blob");
}
