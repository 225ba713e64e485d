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

//! Metadata records published to a build cache: the key of a cached build
//! step and the list of content it produced.

use core::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{ContentHash, hashes_to_string};
use crate::unix_time::UnixTime;

/// Opaque hash of the inputs of a build step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Bytes);

impl Fingerprint {
    pub const fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Narrows a weak fingerprint down to one concrete build output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    pub content_hash: ContentHash,
    pub output: Option<Bytes>,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output {
            Some(output) => write!(f, "{}:{}", self.content_hash, hex::encode(output)),
            None => write!(f, "{}", self.content_hash),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongFingerprint {
    pub weak_fingerprint: Fingerprint,
    pub selector: Selector,
}

impl StrongFingerprint {
    pub const fn new(weak_fingerprint: Fingerprint, selector: Selector) -> Self {
        Self {
            weak_fingerprint,
            selector,
        }
    }
}

impl fmt::Display for StrongFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StrongFingerprint=[Weak={}, Selector={}]",
            self.weak_fingerprint, self.selector
        )
    }
}

/// Ordered list of the content that makes up one cached build output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHashList {
    hashes: Vec<ContentHash>,
    payload: Option<Bytes>,
}

impl ContentHashList {
    pub const fn new(hashes: Vec<ContentHash>) -> Self {
        Self {
            hashes,
            payload: None,
        }
    }

    pub const fn with_payload(hashes: Vec<ContentHash>, payload: Bytes) -> Self {
        Self {
            hashes,
            payload: Some(payload),
        }
    }

    pub fn hashes(&self) -> &[ContentHash] {
        &self.hashes
    }

    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }
}

impl fmt::Display for ContentHashList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ContentHashList=[Count={}, Hashes={}]",
            self.hashes.len(),
            hashes_to_string(&self.hashes)
        )
    }
}

/// Who vouches for the determinism of a hash list and until when.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheDeterminism {
    pub guid: Uuid,
    pub expiration_utc: UnixTime,
}

impl CacheDeterminism {
    /// No determinism guarantee at all.
    pub const NONE: Self = Self {
        guid: Uuid::nil(),
        expiration_utc: UnixTime::ZERO,
    };

    pub const fn via_cache(guid: Uuid, expiration_utc: UnixTime) -> Self {
        Self {
            guid,
            expiration_utc,
        }
    }

    /// A fresh guid standing for one cache instance.
    pub fn new_cache_guid() -> Uuid {
        Uuid::new_v4()
    }

    pub const fn is_deterministic(&self) -> bool {
        !self.guid.is_nil()
    }

    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        !self.expiration_utc.is_zero() && self.expiration_utc <= now
    }
}

impl fmt::Display for CacheDeterminism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_deterministic() {
            write!(f, "{}@{}", self.guid, self.expiration_utc)
        } else {
            f.write_str("None")
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHashListWithDeterminism {
    pub content_hash_list: Option<ContentHashList>,
    pub determinism: CacheDeterminism,
}

impl ContentHashListWithDeterminism {
    pub const fn new(
        content_hash_list: Option<ContentHashList>,
        determinism: CacheDeterminism,
    ) -> Self {
        Self {
            content_hash_list,
            determinism,
        }
    }

    /// Every content hash referenced by the list, empty when there is none.
    pub fn hashes(&self) -> &[ContentHash] {
        self.content_hash_list
            .as_ref()
            .map_or(&[][..], ContentHashList::hashes)
    }
}

impl fmt::Display for ContentHashListWithDeterminism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content_hash_list {
            Some(list) => write!(f, "{list}, Determinism={}", self.determinism),
            None => write!(f, "ContentHashList=[null], Determinism={}", self.determinism),
        }
    }
}
