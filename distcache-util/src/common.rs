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

use distcache_error::{Error, ResultExt, make_input_err};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const CONTENT_HASH_LEN: usize = 32;

/// Content addressed identifier of a blob.
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContentHash([u8; CONTENT_HASH_LEN]);

impl ContentHash {
    pub const fn new(packed_hash: [u8; CONTENT_HASH_LEN]) -> Self {
        Self(packed_hash)
    }

    pub fn try_from_hex(hash: &str) -> Result<Self, Error> {
        let mut packed_hash = [0u8; CONTENT_HASH_LEN];
        hex::decode_to_slice(hash, &mut packed_hash)
            .err_tip(|| format!("Invalid sha256 hash: {hash}"))?;
        Ok(Self(packed_hash))
    }

    /// Hash of `data` as computed by the content stores.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub const fn as_bytes(&self) -> &[u8; CONTENT_HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentHash").field(&self.to_hex()).finish()
    }
}

/// Custom serializer for `ContentHash` because the default Serializer
/// would try to encode the data as a byte array, but we use hex.
impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ContentHashVisitor;
        impl Visitor<'_> for ContentHashVisitor {
            type Value = ContentHash;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex encoded sha256 hash")
            }

            fn visit_str<E>(self, hash: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ContentHash::try_from_hex(hash).map_err(|e| E::custom(e.message_string()))
            }
        }
        deserializer.deserialize_str(ContentHashVisitor)
    }
}

/// Formats a list of hashes the way error messages and logs print them.
pub fn hashes_to_string<'a>(hashes: impl IntoIterator<Item = &'a ContentHash>) -> String {
    let hashes: Vec<String> = hashes.into_iter().map(ContentHash::to_hex).collect();
    format!("[{}]", hashes.join(", "))
}

impl TryFrom<&str> for ContentHash {
    type Error = Error;

    fn try_from(hash: &str) -> Result<Self, Self::Error> {
        if hash.len() != CONTENT_HASH_LEN * 2 {
            return Err(make_input_err!(
                "Expected a {} character hash, got {}",
                CONTENT_HASH_LEN * 2,
                hash.len()
            ));
        }
        Self::try_from_hex(hash)
    }
}
