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

use bytes::Bytes;
use distcache_error::{Code, Error};
use distcache_util::machine_id::{MachineId, MachineIdCollection};
use distcache_util::machine_id_set::{BIT_SET_FORMAT_MARKER, MachineIdSet};
use pretty_assertions::assert_eq;

fn machines(ids: &[u32]) -> MachineIdCollection {
    ids.iter().copied().map(MachineId::new).collect()
}

#[test]
fn empty_set_has_no_members() {
    let set = MachineIdSet::EMPTY;
    assert_eq!(set.count(), 0);
    assert!(set.is_empty());
    assert!(set.bitmap().is_empty());
    assert!(!set.contains(MachineId::new(0)));
    assert_eq!(set, MachineIdSet::default());
}

#[test]
fn bit_zero_is_most_significant_bit_of_first_byte() {
    let set = MachineIdSet::from_machines(&[MachineId::new(0), MachineId::new(9)]);
    assert_eq!(set.bitmap(), &[0b1000_0000, 0b0100_0000]);
    assert!(set.contains(MachineId::new(0)));
    assert!(set.contains(MachineId::new(9)));
    assert!(!set.contains(MachineId::new(1)));
    assert!(!set.contains(MachineId::new(64)));
}

#[test]
fn set_existence_returns_new_set_and_keeps_receiver() {
    let original = MachineIdSet::from_machines(&[MachineId::new(1), MachineId::new(3)]);

    let added = original.set_existence(&machines(&[5, 20]), true);
    let removed = added.set_existence(&machines(&[1, 100]), false);

    assert_eq!(original.count(), 2);
    assert_eq!(added.count(), 4);
    assert_eq!(
        removed.iter().collect::<Vec<_>>(),
        vec![MachineId::new(3), MachineId::new(5), MachineId::new(20)]
    );
    // Removing a machine beyond the bitmap does not grow it.
    assert_eq!(removed.bitmap().len(), added.bitmap().len());
}

#[test]
fn zero_count_sets_compare_equal() {
    let grown_then_cleared = MachineIdSet::EMPTY
        .set_existence(&machines(&[40]), true)
        .set_existence(&machines(&[40]), false);
    assert_eq!(grown_then_cleared.count(), 0);
    assert!(!grown_then_cleared.bitmap().is_empty());
    assert_eq!(grown_then_cleared, MachineIdSet::EMPTY);
}

#[test]
fn merge_zero_extends_shorter_operand() {
    let short = MachineIdSet::from_machines(&[MachineId::new(2)]);
    let long = MachineIdSet::from_machines(&[MachineId::new(2), MachineId::new(30)]);
    let other = MachineIdSet::from_machines(&[MachineId::new(7)]);

    let merged = short.merge(&long).merge(&other);
    assert_eq!(
        merged.iter().collect::<Vec<_>>(),
        vec![MachineId::new(2), MachineId::new(7), MachineId::new(30)]
    );
    assert_eq!(short.merge(&long), long.merge(&short));
    assert_eq!(short.merge(&MachineIdSet::EMPTY), short);
    assert_eq!(MachineIdSet::EMPTY.merge(&long), long);
}

#[test]
fn serialize_round_trip() -> Result<(), Error> {
    let set = MachineIdSet::from_machines(&[MachineId::new(0), MachineId::new(17)]);
    let mut buf = Vec::new();
    set.serialize(&mut buf);
    assert_eq!(buf, vec![BIT_SET_FORMAT_MARKER, 3, 0x80, 0x00, 0x40]);

    let decoded = MachineIdSet::deserialize(&mut &buf[..])?;
    assert_eq!(decoded.bitmap(), set.bitmap());
    Ok(())
}

#[test]
fn deserialize_rejects_unknown_marker_and_truncation() {
    let unknown_marker = [7u8, 0];
    let err = MachineIdSet::deserialize(&mut &unknown_marker[..]).unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);

    let truncated = [BIT_SET_FORMAT_MARKER, 4, 0xff];
    let err = MachineIdSet::deserialize(&mut &truncated[..]).unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);

    let empty: [u8; 0] = [];
    assert!(MachineIdSet::deserialize(&mut &empty[..]).is_err());
}

#[test]
fn from_bitmap_reads_key_value_layout() {
    let set = MachineIdSet::from_bitmap(Bytes::from_static(&[0b0010_0001]));
    assert_eq!(
        set.iter().collect::<Vec<_>>(),
        vec![MachineId::new(2), MachineId::new(7)]
    );
    assert_eq!(format!("{set:?}"), "{2, 7}");
}
