// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update package header and patch descriptors.
//!
//! The header travels at the front of every package and is mirrored into
//! the `update` region once verified, because the download copy in
//! `backup` is destroyed when the old firmware is snapshotted. All fields
//! are little-endian words; `header_hash` covers the header content after
//! its own first eight bytes.

use heapless::Vec;

use crate::crc::{crc32, CRC_INIT};
use crate::partition::{Partition, PartitionError};
use crate::record::ERASED_WORD;

/// In-RAM header buffer size; packages with a larger header are rejected.
pub const HEADER_BUF_SIZE: usize = 1024;

/// Fixed part of the header: eight defined words plus eight reserved.
pub const HEADER_FIXED_SIZE: usize = 64;

/// Encoded size of one patch descriptor.
pub const DESCRIPTOR_SIZE: usize = 32;

/// Most descriptors a maximal header can carry.
pub const MAX_DESCRIPTORS: usize = (HEADER_BUF_SIZE - HEADER_FIXED_SIZE) / DESCRIPTOR_SIZE;

/// Offset of the header mirror within the `update` region.
pub const HEADER_MIRROR_OFFSET: u32 = 1024;

/// How a descriptor's payload turns into the new image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// Payload is the complete new image; no decoder involved.
    FullImage,
    /// Payload is a patch against an all-zero source.
    FullPatch,
    /// Payload is a patch against a specific prior runapp.
    DiffPatch,
}

impl PatchKind {
    pub const fn describe(self) -> &'static str {
        match self {
            PatchKind::FullImage => "full update image",
            PatchKind::FullPatch => "full update patch",
            PatchKind::DiffPatch => "diff update patch",
        }
    }
}

/// One (old image → new image) upgrade path within a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchDescriptor {
    /// `0xFFFFFFFF` full image, `0x00000000` full patch, anything else a
    /// diff patch.
    pub patch_type: u32,
    /// Payload offset relative to end-of-header.
    pub patch_addr: u32,
    pub patch_size: u32,
    pub patch_hash: u32,
    /// Expected size/CRC of the current runapp; the sentinels mean
    /// "matches any".
    pub old_size: u32,
    pub old_hash: u32,
    /// Size/CRC of the image this descriptor produces.
    pub new_size: u32,
    pub new_hash: u32,
}

impl PatchDescriptor {
    pub fn kind(&self) -> PatchKind {
        match self.patch_type {
            ERASED_WORD => PatchKind::FullImage,
            0x0000_0000 => PatchKind::FullPatch,
            _ => PatchKind::DiffPatch,
        }
    }

    /// Whether this descriptor applies regardless of what runapp holds.
    pub fn matches_any_old(&self) -> bool {
        self.old_size == 0x0000_0000 || self.old_size == ERASED_WORD
    }
}

/// Reasons a header fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// `header_size` exceeds the 1 KiB header buffer.
    TooLarge { size: u32 },
    /// `header_size` is smaller than the fixed part, or the descriptor
    /// table does not fit in it.
    Truncated,
    /// Recomputed header CRC does not match `header_hash`.
    BadCrc { expect: u32, actual: u32 },
    Partition(PartitionError),
}

impl From<PartitionError> for HeaderError {
    fn from(err: PartitionError) -> Self {
        HeaderError::Partition(err)
    }
}

impl core::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HeaderError::TooLarge { size } => write!(f, "header size {} exceeds buffer", size),
            HeaderError::Truncated => write!(f, "header truncated"),
            HeaderError::BadCrc { expect, actual } => {
                write!(f, "header hash {:#010x}, expected {:#010x}", actual, expect)
            }
            HeaderError::Partition(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HeaderError {}

/// Decoded package header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    pub header_size: u32,
    pub header_hash: u32,
    /// Size and CRC of the package body (everything after the header).
    pub remain_size: u32,
    pub remain_hash: u32,
    /// Opaque identifiers for tooling; the core does not check them.
    pub header_code: u32,
    pub device_code: u32,
    /// Total bytes of patch payloads, as declared by the packer.
    pub patch_area_size: u32,
    pub descriptors: Vec<PatchDescriptor, MAX_DESCRIPTORS>,
}

fn word_at(bytes: &[u8], at: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(w)
}

impl PackageHeader {
    /// Start a header for a package carrying `descriptors`, with the size
    /// and hash fields zeroed. Packaging tools fill in `remain_*` and the
    /// identifier words, then [`encode_into`](Self::encode_into) seals
    /// `header_size`/`header_hash`. `None` if too many descriptors.
    pub fn from_descriptors(descriptors: &[PatchDescriptor]) -> Option<Self> {
        if descriptors.len() > MAX_DESCRIPTORS {
            return None;
        }
        let mut table = Vec::new();
        for descriptor in descriptors {
            let _ = table.push(*descriptor);
        }
        Some(PackageHeader {
            header_size: 0,
            header_hash: 0,
            remain_size: 0,
            remain_hash: 0,
            header_code: 0,
            device_code: 0,
            patch_area_size: 0,
            descriptors: table,
        })
    }

    /// Parse and integrity-check an encoded header.
    ///
    /// `bytes` must hold at least `header_size` bytes (the caller reads the
    /// first eight bytes to learn that much).
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < 8 {
            return Err(HeaderError::Truncated);
        }
        let header_size = word_at(bytes, 0x00);
        if header_size as usize > HEADER_BUF_SIZE {
            return Err(HeaderError::TooLarge { size: header_size });
        }
        if (header_size as usize) < HEADER_FIXED_SIZE || bytes.len() < header_size as usize {
            return Err(HeaderError::Truncated);
        }

        let header_hash = word_at(bytes, 0x04);
        let actual = crc32(&bytes[8..header_size as usize], CRC_INIT);
        if actual != header_hash {
            return Err(HeaderError::BadCrc {
                expect: header_hash,
                actual,
            });
        }

        let patch_count = word_at(bytes, 0x1C);
        if patch_count as usize > MAX_DESCRIPTORS {
            return Err(HeaderError::Truncated);
        }
        let table_end = HEADER_FIXED_SIZE as u32 + patch_count * DESCRIPTOR_SIZE as u32;
        if table_end > header_size {
            return Err(HeaderError::Truncated);
        }

        let mut descriptors = Vec::new();
        for i in 0..patch_count as usize {
            let at = HEADER_FIXED_SIZE + i * DESCRIPTOR_SIZE;
            // capacity proven by the MAX_DESCRIPTORS check above
            let _ = descriptors.push(PatchDescriptor {
                patch_type: word_at(bytes, at),
                patch_addr: word_at(bytes, at + 0x04),
                patch_size: word_at(bytes, at + 0x08),
                patch_hash: word_at(bytes, at + 0x0C),
                old_size: word_at(bytes, at + 0x10),
                old_hash: word_at(bytes, at + 0x14),
                new_size: word_at(bytes, at + 0x18),
                new_hash: word_at(bytes, at + 0x1C),
            });
        }

        Ok(PackageHeader {
            header_size,
            header_hash,
            remain_size: word_at(bytes, 0x08),
            remain_hash: word_at(bytes, 0x0C),
            header_code: word_at(bytes, 0x10),
            device_code: word_at(bytes, 0x14),
            patch_area_size: word_at(bytes, 0x18),
            descriptors,
        })
    }

    /// Size this header occupies once encoded.
    pub fn encoded_size(&self) -> usize {
        HEADER_FIXED_SIZE + self.descriptors.len() * DESCRIPTOR_SIZE
    }

    /// Encode into `buf`, recomputing `header_size` and `header_hash`.
    /// Returns the encoded length. Used by packaging tools and tests.
    pub fn encode_into(&self, buf: &mut [u8; HEADER_BUF_SIZE]) -> usize {
        let size = self.encoded_size();
        buf[..size].fill(0);

        let mut put = |at: usize, word: u32| {
            buf[at..at + 4].copy_from_slice(&word.to_le_bytes());
        };
        put(0x00, size as u32);
        put(0x08, self.remain_size);
        put(0x0C, self.remain_hash);
        put(0x10, self.header_code);
        put(0x14, self.device_code);
        put(0x18, self.patch_area_size);
        put(0x1C, self.descriptors.len() as u32);
        for (i, d) in self.descriptors.iter().enumerate() {
            let at = HEADER_FIXED_SIZE + i * DESCRIPTOR_SIZE;
            put(at, d.patch_type);
            put(at + 0x04, d.patch_addr);
            put(at + 0x08, d.patch_size);
            put(at + 0x0C, d.patch_hash);
            put(at + 0x10, d.old_size);
            put(at + 0x14, d.old_hash);
            put(at + 0x18, d.new_size);
            put(at + 0x1C, d.new_hash);
        }

        let hash = crc32(&buf[8..size], CRC_INIT);
        buf[0x04..0x08].copy_from_slice(&hash.to_le_bytes());
        size
    }
}

/// Load and validate a header from `part` at `offset`, leaving the raw
/// encoded bytes in `buf[..header_size]` for callers that re-persist it.
pub fn load_header<P: Partition + ?Sized>(
    part: &P,
    offset: u32,
    buf: &mut [u8; HEADER_BUF_SIZE],
) -> Result<PackageHeader, HeaderError> {
    part.read_at(offset, &mut buf[..8])?;
    let header_size = word_at(buf, 0);
    if header_size as usize > HEADER_BUF_SIZE {
        return Err(HeaderError::TooLarge { size: header_size });
    }
    if (header_size as usize) < HEADER_FIXED_SIZE {
        return Err(HeaderError::Truncated);
    }
    part.read_at(offset, &mut buf[..header_size as usize])?;
    PackageHeader::parse(&buf[..header_size as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PackageHeader {
        let mut descriptors = Vec::new();
        descriptors
            .push(PatchDescriptor {
                patch_type: ERASED_WORD,
                patch_addr: 0,
                patch_size: 0x2000,
                patch_hash: 0x1111_1111,
                old_size: 0,
                old_hash: 0,
                new_size: 0x2000,
                new_hash: 0x2222_2222,
            })
            .unwrap();
        PackageHeader {
            header_size: 0,
            header_hash: 0,
            remain_size: 0x2000,
            remain_hash: 0x3333_3333,
            header_code: 0xCAFE_0001,
            device_code: 0xCAFE_0002,
            patch_area_size: 0x2000,
            descriptors,
        }
    }

    #[test]
    fn test_encode_parse_round_trip() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_BUF_SIZE];
        let size = header.encode_into(&mut buf);
        assert_eq!(size, 96);

        let parsed = PackageHeader::parse(&buf[..size]).unwrap();
        assert_eq!(parsed.header_size, 96);
        assert_eq!(parsed.remain_size, header.remain_size);
        assert_eq!(parsed.remain_hash, header.remain_hash);
        assert_eq!(parsed.descriptors, header.descriptors);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&2048u32.to_le_bytes());
        assert_eq!(
            PackageHeader::parse(&bytes),
            Err(HeaderError::TooLarge { size: 2048 })
        );
    }

    #[test]
    fn test_corrupted_header_hash_rejected() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_BUF_SIZE];
        let size = header.encode_into(&mut buf);
        buf[0x10] ^= 0x01; // flip a bit inside the hashed range

        assert!(matches!(
            PackageHeader::parse(&buf[..size]),
            Err(HeaderError::BadCrc { .. })
        ));
    }

    #[test]
    fn test_descriptor_table_must_fit_in_header() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_BUF_SIZE];
        let size = header.encode_into(&mut buf);

        // Claim more descriptors than the header can hold, reseal the CRC.
        buf[0x1C..0x20].copy_from_slice(&9u32.to_le_bytes());
        let hash = crate::crc::crc32(&buf[8..size], crate::crc::CRC_INIT);
        buf[0x04..0x08].copy_from_slice(&hash.to_le_bytes());

        assert_eq!(
            PackageHeader::parse(&buf[..size]),
            Err(HeaderError::Truncated)
        );
    }

    #[test]
    fn test_patch_kind_classification() {
        let mut d = PatchDescriptor::default();
        d.patch_type = ERASED_WORD;
        assert_eq!(d.kind(), PatchKind::FullImage);
        d.patch_type = 0;
        assert_eq!(d.kind(), PatchKind::FullPatch);
        d.patch_type = 1;
        assert_eq!(d.kind(), PatchKind::DiffPatch);
        d.patch_type = 0x1234;
        assert_eq!(d.kind(), PatchKind::DiffPatch);
    }

    #[test]
    fn test_old_image_sentinels_match_any() {
        let mut d = PatchDescriptor::default();
        d.old_size = 0;
        assert!(d.matches_any_old());
        d.old_size = ERASED_WORD;
        assert!(d.matches_any_old());
        d.old_size = 0x1000;
        assert!(!d.matches_any_old());
    }
}
