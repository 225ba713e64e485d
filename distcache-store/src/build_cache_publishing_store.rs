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

use distcache_config::publishing::{BuildCacheSpec, PublishingSpec, PublishingStoreSpec};
use distcache_error::{Code, Error, ResultExt, make_err, make_input_err};
use distcache_util::common::{ContentHash, hashes_to_string};
use distcache_util::fingerprint::{ContentHashListWithDeterminism, StrongFingerprint};
use distcache_util::resource_pool::{KeyedResourcePool, ResourceFactory};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::local_content::{LocalContentSource, ReadOnlyContentSession};
use crate::publishing_gate::{GateStats, PublishingGate};
use crate::remote_cache::{
    AccessToken, AddOrGetResult, BuildCacheSession, BuildCacheSessionFactory,
};

const PUSH_SESSION_NAME: &str = "build-cache-publisher-push";

/// Remote sessions are pooled per configuration and credential.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SessionKey {
    spec: BuildCacheSpec,
    token: AccessToken,
}

type SessionPool = KeyedResourcePool<SessionKey, dyn BuildCacheSession>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishResult {
    /// The remote cache did not know the fingerprint before.
    Added,
    AlreadyExisted,
}

/// Publishes fingerprint to content hash list mappings to a remote build
/// cache without ever leaving the remote with metadata for content it does
/// not hold.
pub struct BuildCachePublishingStore {
    gate: PublishingGate,
    max_pooled_sessions: usize,
    session_factory: Arc<dyn BuildCacheSessionFactory>,
    local_content: Arc<dyn LocalContentSource>,
    session_pool: Mutex<Option<Arc<SessionPool>>>,
}

impl fmt::Debug for BuildCachePublishingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildCachePublishingStore")
            .field("gate", &self.gate)
            .field("max_pooled_sessions", &self.max_pooled_sessions)
            .field("session_pool", &self.session_pool)
            .finish_non_exhaustive()
    }
}

async fn run_cancellable<T>(
    cancel: &CancellationToken,
    action: &str,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(make_err!(Code::Cancelled, "Cancelled while {action}")),
        result = fut => result,
    }
}

impl BuildCachePublishingStore {
    pub fn new(
        spec: &PublishingStoreSpec,
        session_factory: Arc<dyn BuildCacheSessionFactory>,
        local_content: Arc<dyn LocalContentSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gate: PublishingGate::new(spec.concurrency_limit),
            max_pooled_sessions: spec.max_pooled_sessions,
            session_factory,
            local_content,
            session_pool: Mutex::new(None),
        })
    }

    /// Builds the session pool. Publishing is rejected until this ran.
    pub fn startup(&self) -> Result<(), Error> {
        let mut session_pool = self.session_pool.lock();
        if session_pool.is_some() {
            return Err(make_err!(
                Code::FailedPrecondition,
                "BuildCachePublishingStore was already started"
            ));
        }
        let session_factory = self.session_factory.clone();
        let factory: ResourceFactory<SessionKey, dyn BuildCacheSession> =
            Box::new(move |key: SessionKey| {
                let session_factory = session_factory.clone();
                async move {
                    event!(
                        Level::INFO,
                        endpoint = %key.spec.endpoint,
                        namespace = %key.spec.cache_namespace,
                        "Creating build cache session"
                    );
                    session_factory
                        .create_session(&key.spec, &key.token)
                        .await
                        .err_tip(|| {
                            format!("While creating build cache session for {}", key.spec.endpoint)
                        })
                }
                .boxed()
            });
        *session_pool = Some(Arc::new(KeyedResourcePool::new(
            self.max_pooled_sessions,
            factory,
        )));
        Ok(())
    }

    /// Shuts down every pooled remote session. Publishes that are still
    /// running keep their session until they finish.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let Some(session_pool) = self.session_pool.lock().take() else {
            event!(
                Level::DEBUG,
                "BuildCachePublishingStore shut down without being started"
            );
            return Ok(());
        };
        session_pool
            .dispose()
            .await
            .err_tip(|| "While shutting down BuildCachePublishingStore")
    }

    pub fn is_started(&self) -> bool {
        self.session_pool.lock().is_some()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// Binds `spec` and `token` into a session. Only build cache
    /// configurations are accepted.
    pub fn create_session(
        self: &Arc<Self>,
        spec: &PublishingSpec,
        token: AccessToken,
    ) -> Result<PublishingSession, Error> {
        let PublishingSpec::BuildCache(build_cache_spec) = spec else {
            return Err(make_input_err!(
                "BuildCachePublishingStore requires a build_cache config, got {}",
                spec.kind()
            ));
        };
        Ok(PublishingSession {
            store: self.clone(),
            spec: build_cache_spec.clone(),
            token,
        })
    }

    /// Makes sure the remote holds every hash in `hash_list`, pushing what
    /// it lacks from local content, then submits the mapping.
    pub async fn publish_content_hash_list(
        &self,
        fingerprint: &StrongFingerprint,
        hash_list: &ContentHashListWithDeterminism,
        spec: &BuildCacheSpec,
        token: &AccessToken,
        cancel: &CancellationToken,
    ) -> Result<PublishResult, Error> {
        self.inner_publish(fingerprint, hash_list, spec, token, cancel)
            .await
            .err_tip(|| format!("While publishing {fingerprint} => {hash_list}"))
    }

    async fn inner_publish(
        &self,
        fingerprint: &StrongFingerprint,
        hash_list: &ContentHashListWithDeterminism,
        spec: &BuildCacheSpec,
        token: &AccessToken,
        cancel: &CancellationToken,
    ) -> Result<PublishResult, Error> {
        let session_pool = self.session_pool.lock().clone().ok_or_else(|| {
            make_err!(
                Code::FailedPrecondition,
                "BuildCachePublishingStore has not been started"
            )
        })?;

        let _permit =
            run_cancellable(cancel, "waiting for the publishing gate", self.gate.acquire()).await?;

        let session_key = SessionKey {
            spec: spec.clone(),
            token: token.clone(),
        };
        let construction_cancelled = async {
            cancel.cancelled().await;
            make_err!(
                Code::Cancelled,
                "Cancelled while creating the build cache session"
            )
        };
        session_pool
            .use_resource_or_abort(
                &session_key,
                construction_cancelled,
                move |session| async move {
                    self.publish_with_session(session.as_ref(), fingerprint, hash_list, cancel)
                        .await
                },
            )
            .await
    }

    async fn publish_with_session(
        &self,
        session: &dyn BuildCacheSession,
        fingerprint: &StrongFingerprint,
        hash_list: &ContentHashListWithDeterminism,
        cancel: &CancellationToken,
    ) -> Result<PublishResult, Error> {
        let hashes = hash_list.hashes();
        let mut pin_results = vec![None; hashes.len()];
        run_cancellable(
            cancel,
            "pinning content remotely",
            session.pin(hashes, &mut pin_results),
        )
        .await
        .err_tip(|| "While pinning content in the remote build cache")?;

        let missing_from_remote: Vec<ContentHash> = hashes
            .iter()
            .zip(&pin_results)
            .filter(|(_, pinned)| pinned.is_none())
            .map(|(hash, _)| *hash)
            .collect();
        if !missing_from_remote.is_empty() {
            event!(
                Level::INFO,
                count = missing_from_remote.len(),
                hashes = %hashes_to_string(&missing_from_remote),
                "Pushing content missing from the remote build cache"
            );
            self.push_to_remote(&missing_from_remote, session, cancel)
                .await?;
        }

        let result = run_cancellable(
            cancel,
            "submitting the content hash list",
            session.add_or_get_content_hash_list(fingerprint, hash_list),
        )
        .await
        .err_tip(|| "While submitting the content hash list")?;
        match result {
            AddOrGetResult::Added => Ok(PublishResult::Added),
            AddOrGetResult::AlreadyExisted(existing) => {
                event!(
                    Level::DEBUG,
                    %fingerprint,
                    %existing,
                    "Remote build cache already had a content hash list"
                );
                Ok(PublishResult::AlreadyExisted)
            }
        }
    }

    /// Copies `hashes` from local content to `remote`. The local session is
    /// shut down on every path out of here.
    async fn push_to_remote(
        &self,
        hashes: &[ContentHash],
        remote: &dyn BuildCacheSession,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let local = self
            .local_content
            .create_read_only_session(PUSH_SESSION_NAME)
            .err_tip(|| "While opening local content session")?;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(make_err!(
                Code::Cancelled,
                "Cancelled while pushing content to the remote build cache"
            )),
            result = Self::copy_content(local.as_ref(), hashes, remote) => result,
        };
        let shutdown_result = local
            .shutdown()
            .await
            .err_tip(|| "While shutting down local content session");
        result.merge(shutdown_result)
    }

    async fn copy_content(
        local: &dyn ReadOnlyContentSession,
        hashes: &[ContentHash],
        remote: &dyn BuildCacheSession,
    ) -> Result<(), Error> {
        local
            .startup()
            .await
            .err_tip(|| "While starting local content session")?;

        let mut local_results = vec![None; hashes.len()];
        local
            .pin(hashes, &mut local_results)
            .await
            .err_tip(|| "While pinning local content")?;
        let missing_locally: Vec<&ContentHash> = hashes
            .iter()
            .zip(&local_results)
            .filter(|(_, pinned)| pinned.is_none())
            .map(|(hash, _)| hash)
            .collect();
        if !missing_locally.is_empty() {
            let missing = hashes_to_string(missing_locally);
            event!(
                Level::WARN,
                %missing,
                "Content referenced by a content hash list is missing locally"
            );
            return Err(make_err!(
                Code::NotFound,
                "Content is missing from the local store: {missing}"
            ));
        }

        for hash in hashes {
            let stream = local
                .open_stream(*hash)
                .await
                .err_tip(|| format!("While opening local content {hash}"))?;
            remote
                .put_stream(*hash, stream)
                .await
                .err_tip(|| format!("While pushing {hash} to the remote build cache"))?;
            event!(Level::DEBUG, %hash, "Pushed content to the remote build cache");
        }
        Ok(())
    }
}

/// A store bound to one build cache configuration and credential.
#[derive(Clone, Debug)]
pub struct PublishingSession {
    store: Arc<BuildCachePublishingStore>,
    spec: BuildCacheSpec,
    token: AccessToken,
}

impl PublishingSession {
    pub const fn spec(&self) -> &BuildCacheSpec {
        &self.spec
    }

    pub async fn publish_content_hash_list(
        &self,
        fingerprint: &StrongFingerprint,
        hash_list: &ContentHashListWithDeterminism,
        cancel: &CancellationToken,
    ) -> Result<PublishResult, Error> {
        self.store
            .publish_content_hash_list(fingerprint, hash_list, &self.spec, &self.token, cancel)
            .await
    }
}
