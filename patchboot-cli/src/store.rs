// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! File-backed partitions for the simulated device.
//!
//! Each region lives in its own file under the state directory. Writes
//! keep NOR semantics (bits only clear) so the simulated device behaves
//! like the flash the update core is designed for.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use patchboot_core::partition::{Partition, PartitionError, Region, Regions};

/// One region persisted as a file.
pub struct FilePartition {
    path: PathBuf,
    size: u32,
}

impl FilePartition {
    /// Create the backing file, erased.
    pub fn create(path: &Path, size: u32) -> Result<Self> {
        fs::write(path, vec![0xFFu8; size as usize])
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(FilePartition {
            path: path.to_path_buf(),
            size,
        })
    }

    /// Open an existing backing file; its length is the region size.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)
            .with_context(|| format!("No partition file {} (run `init` first)", path.display()))?;
        Ok(FilePartition {
            path: path.to_path_buf(),
            size: meta.len() as u32,
        })
    }
}

impl Partition for FilePartition {
    fn size(&self) -> u32 {
        self.size
    }

    fn erase_all(&mut self) -> Result<(), PartitionError> {
        fs::write(&self.path, vec![0xFFu8; self.size as usize])
            .map_err(|_| PartitionError::Device)
    }

    fn read_at(&self, offset: u32, buf: &mut [u8]) -> Result<(), PartitionError> {
        if offset as usize + buf.len() > self.size as usize {
            return Err(PartitionError::OutOfBounds);
        }
        let mut file = fs::File::open(&self.path).map_err(|_| PartitionError::Device)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| PartitionError::Device)?;
        file.read_exact(buf).map_err(|_| PartitionError::Device)
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), PartitionError> {
        if offset as usize + data.len() > self.size as usize {
            return Err(PartitionError::OutOfBounds);
        }
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|_| PartitionError::Device)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| PartitionError::Device)?;
        let mut current = vec![0u8; data.len()];
        file.read_exact(&mut current)
            .map_err(|_| PartitionError::Device)?;
        for (cell, byte) in current.iter_mut().zip(data) {
            *cell &= byte;
        }
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| PartitionError::Device)?;
        file.write_all(&current).map_err(|_| PartitionError::Device)
    }
}

fn region_path(dir: &Path, region: Region) -> PathBuf {
    dir.join(format!("{}.bin", region.name()))
}

/// Create all four partition files for a new simulated device.
pub fn create_regions(
    dir: &Path,
    runapp_size: u32,
    backup_size: u32,
    decode_size: u32,
    update_size: u32,
) -> Result<Regions<FilePartition>> {
    if update_size < patchboot_core::UPDATE_ZONE_SIZE as u32 {
        bail!(
            "update partition must be at least {} bytes",
            patchboot_core::UPDATE_ZONE_SIZE
        );
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(Regions {
        runapp: FilePartition::create(&region_path(dir, Region::Runapp), runapp_size)?,
        backup: FilePartition::create(&region_path(dir, Region::Backup), backup_size)?,
        decode: FilePartition::create(&region_path(dir, Region::Decode), decode_size)?,
        update: FilePartition::create(&region_path(dir, Region::Update), update_size)?,
    })
}

/// Open the four partition files of an existing simulated device.
pub fn open_regions(dir: &Path) -> Result<Regions<FilePartition>> {
    Ok(Regions {
        runapp: FilePartition::open(&region_path(dir, Region::Runapp))?,
        backup: FilePartition::open(&region_path(dir, Region::Backup))?,
        decode: FilePartition::open(&region_path(dir, Region::Decode))?,
        update: FilePartition::open(&region_path(dir, Region::Update))?,
    })
}
