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
use core::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};
use distcache_error::{Error, error_if};
use serde::{Deserialize, Serialize};

use crate::compact_encoding::{get_compact_i64, put_compact_i64};

/// Seconds since the unix epoch.
///
/// The zero value doubles as the "unset" sentinel, so a real timestamp of
/// exactly the epoch can not be represented.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnixTime(i64);

impl UnixTime {
    pub const ZERO: Self = Self(0);

    /// Size of the fixed width encoding.
    pub const ENCODED_LEN: usize = size_of::<i64>();

    pub const fn from_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    pub const fn as_seconds(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self(i64::try_from(since.as_secs()).unwrap_or(i64::MAX)),
            Err(before) => Self(-i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX)),
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        let offset = Duration::from_secs(self.0.unsigned_abs());
        if self.0 >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        }
    }

    /// Number of seconds `self` is after `base`. Negative when `self` is
    /// earlier.
    pub const fn delta_from(self, base: Self) -> i64 {
        self.0.wrapping_sub(base.0)
    }

    pub const fn add_seconds(self, seconds: i64) -> Self {
        Self(self.0.wrapping_add(seconds))
    }

    pub fn put_fixed(self, buf: &mut impl BufMut) {
        buf.put_i64(self.0);
    }

    pub fn get_fixed(buf: &mut impl Buf) -> Result<Self, Error> {
        error_if!(
            buf.remaining() < Self::ENCODED_LEN,
            "Expected {} bytes for a timestamp, only {} remain",
            Self::ENCODED_LEN,
            buf.remaining()
        );
        Ok(Self(buf.get_i64()))
    }

    /// Writes `self` as a compact delta relative to `base`.
    pub fn put_delta(self, base: Self, buf: &mut impl BufMut) {
        put_compact_i64(buf, self.delta_from(base));
    }

    pub fn get_delta(base: Self, buf: &mut impl Buf) -> Result<Self, Error> {
        Ok(base.add_seconds(get_compact_i64(buf)?))
    }
}

impl From<SystemTime> for UnixTime {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
