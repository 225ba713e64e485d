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
use std::sync::{Arc, LazyLock};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use distcache_error::{Error, ResultExt, error_if, make_input_err};

use crate::compact_encoding::{get_compact_i64, put_compact_i64};
use crate::machine_id::{MachineId, MachineIdCollection};
use crate::machine_id_set::MachineIdSet;
use crate::unix_time::UnixTime;

/// Content size used when the size of the content is not known.
pub const UNKNOWN_SIZE: i64 = -1;

/// Length of the big endian size prefix of a key-value store value.
pub const REDIS_SIZE_PREFIX_LEN: usize = size_of::<i64>();

static MISSING: LazyLock<Arc<ContentLocationEntry>> = LazyLock::new(|| {
    Arc::new(ContentLocationEntry {
        locations: MachineIdSet::EMPTY,
        content_size: UNKNOWN_SIZE,
        last_access_time_utc: UnixTime::ZERO,
        creation_time_utc: UnixTime::ZERO,
    })
});

/// Where one piece of content lives in the fleet, how big it is and when it
/// was created and last used.
///
/// Entries are immutable and shared behind an `Arc`. Operations that would
/// change an entry return a new `Arc`, or the same one when nothing changed,
/// so readers never need a lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentLocationEntry {
    locations: MachineIdSet,
    content_size: i64,
    last_access_time_utc: UnixTime,
    creation_time_utc: UnixTime,
}

impl ContentLocationEntry {
    /// The shared entry that stands for "no entry".
    pub fn missing() -> Arc<Self> {
        MISSING.clone()
    }

    /// Creates a validated entry. `creation_time_utc` falls back to
    /// `last_access_time_utc` when not tracked.
    pub fn create(
        locations: MachineIdSet,
        content_size: i64,
        last_access_time_utc: UnixTime,
        creation_time_utc: Option<UnixTime>,
    ) -> Result<Arc<Self>, Error> {
        error_if!(
            content_size < UNKNOWN_SIZE,
            "Content size must be {UNKNOWN_SIZE} or positive, got {content_size}"
        );
        Ok(Arc::new(Self {
            locations,
            content_size,
            last_access_time_utc,
            creation_time_utc: creation_time_utc.unwrap_or(last_access_time_utc),
        }))
    }

    pub const fn locations(&self) -> &MachineIdSet {
        &self.locations
    }

    pub const fn content_size(&self) -> i64 {
        self.content_size
    }

    pub const fn last_access_time_utc(&self) -> UnixTime {
        self.last_access_time_utc
    }

    pub const fn creation_time_utc(&self) -> UnixTime {
        self.creation_time_utc
    }

    /// Structural check for "no entry"; does not rely on the entry being the
    /// shared `missing()` instance.
    pub fn is_missing(&self) -> bool {
        self.last_access_time_utc.is_zero() && self.locations.is_empty()
    }

    /// Adds or removes `machines`. Returns `self` unchanged when the location
    /// count stays the same, `last_access_time_utc` does not move the access
    /// time forward and `size` matches the current size.
    #[must_use]
    pub fn set_machine_existence(
        self: &Arc<Self>,
        machines: &MachineIdCollection,
        exists: bool,
        last_access_time_utc: Option<UnixTime>,
        size: Option<i64>,
    ) -> Arc<Self> {
        let locations = self.locations.set_existence(machines, exists);
        let access_advances =
            last_access_time_utc.is_some_and(|time| time > self.last_access_time_utc);
        let size_changes = size.is_some_and(|size| size != self.content_size);
        if locations.count() == self.locations.count() && !access_advances && !size_changes {
            return self.clone();
        }
        Arc::new(Self {
            locations,
            content_size: size.unwrap_or(self.content_size),
            last_access_time_utc: last_access_time_utc
                .map_or(self.last_access_time_utc, |time| {
                    time.max(self.last_access_time_utc)
                }),
            creation_time_utc: self.creation_time_utc,
        })
    }

    /// Moves the access time forward to `time` if it is later.
    #[must_use]
    pub fn touch(self: &Arc<Self>, time: UnixTime) -> Arc<Self> {
        if time <= self.last_access_time_utc {
            return self.clone();
        }
        Arc::new(Self {
            last_access_time_utc: time,
            ..(**self).clone()
        })
    }

    /// Combines two views of the same content.
    ///
    /// A missing operand yields the other one unchanged. Otherwise the
    /// locations are unioned, the access time is the later one and the
    /// creation time the earlier one. The size is always taken from `self`:
    /// both sides are expected to agree, and callers reconciling concurrent
    /// updates depend on the first operand winning.
    #[must_use]
    pub fn merge(self: &Arc<Self>, other: &Arc<Self>) -> Arc<Self> {
        if self.is_missing() {
            return other.clone();
        }
        if other.is_missing() {
            return self.clone();
        }
        Arc::new(Self {
            locations: self.locations.merge(&other.locations),
            content_size: self.content_size,
            last_access_time_utc: self.last_access_time_utc.max(other.last_access_time_utc),
            creation_time_utc: self.creation_time_utc.min(other.creation_time_utc),
        })
    }

    /// `merge` that also accepts absent operands.
    pub fn merge_optional(
        left: Option<&Arc<Self>>,
        right: Option<&Arc<Self>>,
    ) -> Option<Arc<Self>> {
        match (left, right) {
            (Some(left), Some(right)) => Some(left.merge(right)),
            (Some(entry), None) | (None, Some(entry)) => Some(entry.clone()),
            (None, None) => None,
        }
    }

    /// Writes the stream encoding: compact size, machine set, fixed width
    /// creation time, then the access time as a compact delta from the
    /// creation time.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        put_compact_i64(buf, self.content_size);
        self.locations.serialize(buf);
        self.creation_time_utc.put_fixed(buf);
        self.last_access_time_utc
            .put_delta(self.creation_time_utc, buf);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }

    /// Reads the stream encoding. An unknown size together with an unset
    /// access time decodes to the shared `missing()` entry.
    pub fn deserialize(buf: &mut impl Buf) -> Result<Arc<Self>, Error> {
        let content_size =
            get_compact_i64(buf).err_tip(|| "While reading ContentLocationEntry size")?;
        let locations = MachineIdSet::deserialize(buf)
            .err_tip(|| "While reading ContentLocationEntry locations")?;
        let creation_time_utc = UnixTime::get_fixed(buf)
            .err_tip(|| "While reading ContentLocationEntry creation time")?;
        let last_access_time_utc = UnixTime::get_delta(creation_time_utc, buf)
            .err_tip(|| "While reading ContentLocationEntry access time")?;

        if content_size == UNKNOWN_SIZE && last_access_time_utc.is_zero() {
            return Ok(Self::missing());
        }
        Ok(Arc::new(Self {
            locations,
            content_size,
            last_access_time_utc,
            creation_time_utc,
        }))
    }

    /// Parses a key-value store value: an 8 byte big endian size followed by
    /// the machine bitmap. Returns `None` when the value is too short.
    ///
    /// With `handle_missing_size` the stored size is biased by one, so a
    /// zeroed prefix reads back as `UNKNOWN_SIZE`.
    pub fn try_create_from_redis_value(
        value: &[u8],
        handle_missing_size: bool,
    ) -> Option<Arc<Self>> {
        let content_size = extract_size_from_redis_value(value, handle_missing_size)?;
        let locations =
            MachineIdSet::from_bitmap(Bytes::copy_from_slice(&value[REDIS_SIZE_PREFIX_LEN..]));
        Some(Arc::new(Self {
            locations,
            content_size,
            last_access_time_utc: UnixTime::ZERO,
            creation_time_utc: UnixTime::ZERO,
        }))
    }

    /// Same as `try_create_from_redis_value`, but a short value is an error.
    pub fn create_from_redis_value(
        value: &[u8],
        handle_missing_size: bool,
    ) -> Result<Arc<Self>, Error> {
        Self::try_create_from_redis_value(value, handle_missing_size).ok_or_else(|| {
            make_input_err!(
                "Key-value store entry must be at least {REDIS_SIZE_PREFIX_LEN} bytes, got {}",
                value.len()
            )
        })
    }

    /// Inverse of `try_create_from_redis_value`.
    pub fn to_redis_value(&self, handle_missing_size: bool) -> Bytes {
        let bitmap = self.locations.bitmap();
        let mut buf = BytesMut::with_capacity(REDIS_SIZE_PREFIX_LEN + bitmap.len());
        put_redis_size(&mut buf, self.content_size, handle_missing_size);
        buf.put_slice(bitmap);
        buf.freeze()
    }
}

impl fmt::Display for ContentLocationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entry=[Size={}, Locations={}, Created={}, LastAccess={}]",
            self.content_size,
            self.locations,
            self.creation_time_utc,
            self.last_access_time_utc
        )
    }
}

fn put_redis_size(buf: &mut impl BufMut, size: i64, handle_missing_size: bool) {
    if handle_missing_size {
        buf.put_i64(size.wrapping_add(1));
    } else {
        buf.put_i64(size);
    }
}

/// Reads the size prefix of a key-value store value, `None` when the value
/// is shorter than the prefix.
pub fn extract_size_from_redis_value(value: &[u8], handle_missing_size: bool) -> Option<i64> {
    let mut prefix = value.get(..REDIS_SIZE_PREFIX_LEN)?;
    let stored = prefix.get_i64();
    Some(if handle_missing_size {
        stored.wrapping_sub(1)
    } else {
        stored
    })
}

/// Builds the minimal key-value store value recording a single machine.
pub fn convert_size_and_machine_id_to_redis_value(
    size: i64,
    machine: MachineId,
    handle_missing_size: bool,
) -> Bytes {
    let locations = MachineIdSet::from_machines(&[machine]);
    let bitmap = locations.bitmap();
    let mut buf = BytesMut::with_capacity(REDIS_SIZE_PREFIX_LEN + bitmap.len());
    put_redis_size(&mut buf, size, handle_missing_size);
    buf.put_slice(bitmap);
    buf.freeze()
}
