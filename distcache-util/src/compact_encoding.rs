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

//! Variable length integer encoding shared by the binary formats in this
//! crate. Signed values are zigzag mapped first so small negative numbers
//! stay small on the wire.

use bytes::{Buf, BufMut};
use distcache_error::{Error, ResultExt};
use prost::encoding::{decode_varint, encode_varint};

const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn put_compact_u64(buf: &mut impl BufMut, value: u64) {
    encode_varint(value, buf);
}

pub fn get_compact_u64(buf: &mut impl Buf) -> Result<u64, Error> {
    decode_varint(buf).err_tip(|| "While decoding compact unsigned integer")
}

pub fn put_compact_i64(buf: &mut impl BufMut, value: i64) {
    encode_varint(zigzag_encode(value), buf);
}

pub fn get_compact_i64(buf: &mut impl Buf) -> Result<i64, Error> {
    decode_varint(buf)
        .map(zigzag_decode)
        .err_tip(|| "While decoding compact signed integer")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn zigzag_keeps_small_values_small() {
        for (value, expected_len) in [(0i64, 1usize), (-1, 1), (63, 1), (-64, 1), (64, 2)] {
            let mut buf = Vec::new();
            put_compact_i64(&mut buf, value);
            assert_eq!(buf.len(), expected_len, "value {value}");
            assert_eq!(get_compact_i64(&mut &buf[..]).unwrap(), value);
        }
    }

    #[test]
    fn extremes_survive() {
        for value in [i64::MIN, i64::MAX] {
            let mut buf = Vec::new();
            put_compact_i64(&mut buf, value);
            assert_eq!(get_compact_i64(&mut &buf[..]).unwrap(), value);
        }
    }

    #[test]
    fn truncated_input_is_an_error() {
        let buf = [0x80u8];
        assert!(get_compact_u64(&mut &buf[..]).is_err());
    }
}
