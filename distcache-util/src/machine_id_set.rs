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

use bytes::{Buf, BufMut, Bytes, BytesMut};
use distcache_error::{Error, ResultExt, error_if, make_input_err};

use crate::compact_encoding::{get_compact_u64, put_compact_u64};
use crate::machine_id::{MachineId, MachineIdCollection};

/// Leading byte of the stream encoding of a bitmap backed set.
pub const BIT_SET_FORMAT_MARKER: u8 = 0;

/// Immutable set of machines stored as a bitmap. Machine `i` is bit `i`
/// counted from the most significant bit of the first byte, which matches
/// the bit addressing key-value stores use for `SETBIT`/`GETBIT`.
///
/// Every operation that changes membership returns a new set.
#[derive(Clone, Default)]
pub struct MachineIdSet {
    bits: Bytes,
}

const fn byte_and_mask(machine: MachineId) -> (usize, u8) {
    let index = machine.index();
    (index / 8, 0x80 >> (index % 8))
}

impl MachineIdSet {
    pub const EMPTY: Self = Self { bits: Bytes::new() };

    /// Wraps a raw bitmap, for example the tail of a key-value store value.
    pub const fn from_bitmap(bits: Bytes) -> Self {
        Self { bits }
    }

    pub fn from_machines<'a>(machines: impl IntoIterator<Item = &'a MachineId>) -> Self {
        let machines: MachineIdCollection = machines.into_iter().copied().collect();
        Self::EMPTY.set_existence(&machines, true)
    }

    /// The raw bitmap, including any trailing zero bytes.
    pub fn bitmap(&self) -> &[u8] {
        &self.bits
    }

    pub fn contains(&self, machine: MachineId) -> bool {
        let (byte, mask) = byte_and_mask(machine);
        self.bits.get(byte).is_some_and(|value| value & mask != 0)
    }

    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .map(|value| value.count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|value| *value == 0)
    }

    /// Returns a copy of this set with every machine in `machines` added
    /// when `exists` is true or removed otherwise.
    #[must_use]
    pub fn set_existence(&self, machines: &MachineIdCollection, exists: bool) -> Self {
        if machines.is_empty() {
            return self.clone();
        }
        let mut data = BytesMut::from(&self.bits[..]);
        if exists {
            if let Some(max_index) = machines.max_index() {
                let needed = max_index / 8 + 1;
                if data.len() < needed {
                    data.resize(needed, 0);
                }
            }
        }
        for machine in machines {
            let (byte, mask) = byte_and_mask(*machine);
            // Removing a machine beyond the end of the bitmap is a no-op.
            let Some(value) = data.get_mut(byte) else {
                continue;
            };
            if exists {
                *value |= mask;
            } else {
                *value &= !mask;
            }
        }
        Self { bits: data.freeze() }
    }

    /// Union of both sets. The shorter bitmap is treated as if it were
    /// padded with zero bytes.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.bits.is_empty() {
            return self.clone();
        }
        if self.bits.is_empty() {
            return other.clone();
        }
        let (longer, shorter) = if self.bits.len() >= other.bits.len() {
            (&self.bits, &other.bits)
        } else {
            (&other.bits, &self.bits)
        };
        let mut data = BytesMut::from(&longer[..]);
        for (value, extra) in data.iter_mut().zip(shorter.iter()) {
            *value |= extra;
        }
        Self { bits: data.freeze() }
    }

    /// Member machines in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .flat_map(|(byte, value)| {
                (0..8u32)
                    .filter(move |bit| value & (0x80 >> bit) != 0)
                    .map(move |bit| MachineId::new(byte as u32 * 8 + bit))
            })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(BIT_SET_FORMAT_MARKER);
        put_compact_u64(buf, self.bits.len() as u64);
        buf.put_slice(&self.bits);
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self, Error> {
        error_if!(!buf.has_remaining(), "Expected machine set format marker");
        let marker = buf.get_u8();
        if marker != BIT_SET_FORMAT_MARKER {
            return Err(make_input_err!(
                "Unknown machine set format marker: {marker}"
            ));
        }
        let len = usize::try_from(get_compact_u64(buf)?)
            .err_tip(|| "Machine set length does not fit in memory")?;
        error_if!(
            buf.remaining() < len,
            "Machine set declares {len} bytes but only {} remain",
            buf.remaining()
        );
        Ok(Self {
            bits: buf.copy_to_bytes(len),
        })
    }

    /// Bitmap with trailing zero bytes removed, so equal memberships compare
    /// equal regardless of how the bitmap grew.
    fn significant_bits(&self) -> &[u8] {
        let len = self
            .bits
            .iter()
            .rposition(|value| *value != 0)
            .map_or(0, |last| last + 1);
        &self.bits[..len]
    }
}

impl PartialEq for MachineIdSet {
    fn eq(&self, other: &Self) -> bool {
        self.significant_bits() == other.significant_bits()
    }
}

impl Eq for MachineIdSet {}

impl fmt::Debug for MachineIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(MachineId::index)).finish()
    }
}

impl fmt::Display for MachineIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
