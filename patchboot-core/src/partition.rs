// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Partition I/O facade.
//!
//! The update core never addresses flash directly. It sees four named
//! regions, each behind the [`Partition`] trait, and moves data between
//! them with the chunked streaming helpers in this module. The physical
//! layout (sector sizes, base addresses, driver quirks) is entirely the
//! implementor's problem.

use core::fmt;

use crate::crc::{crc32, CRC_INIT};
use crate::trace::Trace;

/// Size of the shared streaming buffer used by [`hash_region`] and
/// [`copy_region`].
pub const COPY_BUF_SIZE: usize = 1024;

/// Failure reported by a partition backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    /// The requested range does not fit in the partition.
    OutOfBounds,
    /// The underlying device reported a failure.
    Device,
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::OutOfBounds => write!(f, "access out of partition bounds"),
            PartitionError::Device => write!(f, "partition device error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PartitionError {}

/// Erase/read/write access to one flash region.
///
/// `write_at` may assume NOR semantics: writing can only clear bits, and
/// the region reads back as all `0xFF` after `erase_all`.
pub trait Partition {
    /// Region capacity in bytes.
    fn size(&self) -> u32;

    /// Erase the whole region to `0xFF`.
    fn erase_all(&mut self) -> Result<(), PartitionError>;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u32, buf: &mut [u8]) -> Result<(), PartitionError>;

    /// Write `data` starting at `offset`.
    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), PartitionError>;
}

/// The four logical regions the update core coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Active firmware image.
    Runapp,
    /// Inbound download, later the snapshot of the previous runapp.
    Backup,
    /// Decoded candidate image.
    Decode,
    /// Control record and header mirror.
    Update,
}

impl Region {
    pub const fn name(self) -> &'static str {
        match self {
            Region::Runapp => "runapp",
            Region::Backup => "backup",
            Region::Decode => "decode",
            Region::Update => "update",
        }
    }
}

/// The four regions, resolved and owned as one unit.
pub struct Regions<P> {
    pub runapp: P,
    pub backup: P,
    pub decode: P,
    pub update: P,
}

impl<P: Partition> Regions<P> {
    pub fn get(&self, region: Region) -> &P {
        match region {
            Region::Runapp => &self.runapp,
            Region::Backup => &self.backup,
            Region::Decode => &self.decode,
            Region::Update => &self.update,
        }
    }

    pub fn get_mut(&mut self, region: Region) -> &mut P {
        match region {
            Region::Runapp => &mut self.runapp,
            Region::Backup => &mut self.backup,
            Region::Decode => &mut self.decode,
            Region::Update => &mut self.update,
        }
    }
}

/// Tracks the 5%-granular progress steps so each is emitted once, and 100%
/// only at completion.
pub(crate) struct ProgressSteps {
    last: Option<u8>,
}

impl ProgressSteps {
    pub(crate) fn new() -> Self {
        ProgressSteps { last: None }
    }

    pub(crate) fn report(&mut self, done: u32, total: u32, trace: &mut dyn Trace) {
        if total == 0 {
            return;
        }
        let percent = ((done as u64 * 100) / total as u64) as u8;
        let step = percent - percent % 5;
        if step < 100 && self.last != Some(step) {
            trace.progress(step);
            self.last = Some(step);
        }
    }
}

/// Checksum `len` bytes of `part` starting at `offset`, streaming through
/// the shared 1 KiB buffer and reporting progress to `trace`.
pub fn hash_region<P: Partition + ?Sized>(
    part: &P,
    offset: u32,
    len: u32,
    buf: &mut [u8; COPY_BUF_SIZE],
    trace: &mut dyn Trace,
) -> Result<u32, PartitionError> {
    let mut crc = CRC_INIT;
    let mut done = 0u32;
    let mut steps = ProgressSteps::new();

    while done < len {
        steps.report(done, len, trace);
        let chunk = (len - done).min(COPY_BUF_SIZE as u32) as usize;
        part.read_at(offset + done, &mut buf[..chunk])?;
        crc = crc32(&buf[..chunk], crc);
        done += chunk as u32;
    }
    trace.progress(100);

    Ok(crc)
}

/// Copy `len` bytes from `src[src_offset..]` to `dst[dst_offset..]` through
/// the shared 1 KiB buffer, reporting progress to `trace`.
///
/// The destination range is assumed erased.
pub fn copy_region<S: Partition + ?Sized, D: Partition + ?Sized>(
    src: &S,
    src_offset: u32,
    dst: &mut D,
    dst_offset: u32,
    len: u32,
    buf: &mut [u8; COPY_BUF_SIZE],
    trace: &mut dyn Trace,
) -> Result<(), PartitionError> {
    let mut done = 0u32;
    let mut steps = ProgressSteps::new();

    while done < len {
        steps.report(done, len, trace);
        let chunk = (len - done).min(COPY_BUF_SIZE as u32) as usize;
        src.read_at(src_offset + done, &mut buf[..chunk])?;
        dst.write_at(dst_offset + done, &buf[..chunk])?;
        done += chunk as u32;
    }
    trace.progress(100);

    Ok(())
}
