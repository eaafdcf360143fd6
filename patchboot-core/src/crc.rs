// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CRC-32/MPEG-2 over package and partition contents.
//!
//! Every integrity check in the update core uses the same parameters:
//! polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no input or output
//! reflection, no final XOR. With these parameters the checksum chains:
//! `crc32(b, crc32(a, seed)) == crc32(ab, seed)`, which is what lets the
//! streaming helpers hash a partition in 1 KiB chunks.

use crc::{Crc, CRC_32_MPEG_2};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Initial seed for a fresh checksum.
pub const CRC_INIT: u32 = 0xFFFF_FFFF;

/// Checksum `data`, continuing from `seed`.
///
/// Pass [`CRC_INIT`] to start a new checksum; pass a previous result to
/// extend one across multiple buffers.
pub fn crc32(data: &[u8], seed: u32) -> u32 {
    let mut digest = CRC32.digest_with_initial(seed);
    digest.update(data);
    digest.finalize()
}
