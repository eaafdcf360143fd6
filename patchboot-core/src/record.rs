// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The durable control record and the update step ladder.
//!
//! The record lives at offset 0 of the `update` region as seven
//! little-endian words. It is the single mutable source of truth for where
//! an update stands: a reboot at any point resumes from `update_step`.
//!
//! The step codes are chosen so that every forward transition is a strict
//! bit-subset of its predecessor. On NOR flash, clearing bits needs no
//! erase cycle, so normal progress rewrites the record in place. Only the
//! backward jumps (the operator's undo/redo commands) pay for an
//! erase-and-rewrite, and those stage the whole update zone (record plus
//! mirrored header) so the mirror survives.

use crate::partition::{Partition, PartitionError};

/// Size of the persisted control record in bytes.
pub const CONTROL_RECORD_SIZE: usize = 28;

/// Bytes of the `update` region staged in RAM by an erasing record write:
/// the control record, the gap, and the mirrored header.
pub const UPDATE_ZONE_SIZE: usize = 2048;

/// Value of an erased flash word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Update phases, in ladder order.
///
/// Each code is a strict bit-subset of every predecessor on its forward
/// path, which is what makes erase-free forward progress possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Verify,
    Decode,
    Backup,
    Docopy,
    Revert,
    Recopy,
    Rocopy,
    Finish,
}

impl Step {
    /// Persisted step code.
    pub const fn code(self) -> u32 {
        match self {
            Step::Verify => 0x7FFF_FFFF,
            Step::Decode => 0x0000_FFFF,
            Step::Backup => 0x0000_0FFF,
            Step::Docopy => 0x0000_00FF,
            Step::Revert => 0x0000_000F,
            Step::Recopy => 0x0000_0007,
            Step::Rocopy => 0x0000_0003,
            Step::Finish => 0x0000_0000,
        }
    }

    /// Decode a persisted step code.
    ///
    /// Both the erased word and zero mean "no update in progress" and map
    /// to [`Step::Finish`]. Anything else unknown is `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x7FFF_FFFF => Some(Step::Verify),
            0x0000_FFFF => Some(Step::Decode),
            0x0000_0FFF => Some(Step::Backup),
            0x0000_00FF => Some(Step::Docopy),
            0x0000_000F => Some(Step::Revert),
            0x0000_0007 => Some(Step::Recopy),
            0x0000_0003 => Some(Step::Rocopy),
            0x0000_0000 | ERASED_WORD => Some(Step::Finish),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Step::Verify => "verify",
            Step::Decode => "decode",
            Step::Backup => "backup",
            Step::Docopy => "docopy",
            Step::Revert => "revert",
            Step::Recopy => "recopy",
            Step::Rocopy => "rocopy",
            Step::Finish => "finish",
        }
    }

    /// Whether this step can be written over `code` without an erase,
    /// i.e. the transition only clears bits.
    pub const fn reachable_in_place(self, code: u32) -> bool {
        self.code() & code == self.code()
    }
}

/// In-RAM image of the persisted control record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    pub update_step: u32,
    pub update_stay: u32,
    pub patch_index: u32,
    pub backup_size: u32,
    pub backup_hash: u32,
    pub decode_size: u32,
    pub decode_hash: u32,
}

impl ControlRecord {
    /// Record as read from freshly erased flash.
    pub const fn erased() -> Self {
        ControlRecord {
            update_step: ERASED_WORD,
            update_stay: ERASED_WORD,
            patch_index: ERASED_WORD,
            backup_size: ERASED_WORD,
            backup_hash: ERASED_WORD,
            decode_size: ERASED_WORD,
            decode_hash: ERASED_WORD,
        }
    }

    /// Current step, if the persisted code is well-formed.
    pub fn step(&self) -> Option<Step> {
        Step::from_code(self.update_step)
    }

    pub fn to_bytes(&self) -> [u8; CONTROL_RECORD_SIZE] {
        let mut bytes = [0u8; CONTROL_RECORD_SIZE];
        let words = [
            self.update_step,
            self.update_stay,
            self.patch_index,
            self.backup_size,
            self.backup_hash,
            self.decode_size,
            self.decode_hash,
        ];
        for (i, word) in words.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8; CONTROL_RECORD_SIZE]) -> Self {
        let word = |i: usize| {
            let mut w = [0u8; 4];
            w.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_le_bytes(w)
        };
        ControlRecord {
            update_step: word(0),
            update_stay: word(1),
            patch_index: word(2),
            backup_size: word(3),
            backup_hash: word(4),
            decode_size: word(5),
            decode_hash: word(6),
        }
    }
}

/// Read the control record from the `update` region.
pub fn read_record<P: Partition + ?Sized>(update: &P) -> Result<ControlRecord, PartitionError> {
    let mut bytes = [0u8; CONTROL_RECORD_SIZE];
    update.read_at(0, &mut bytes)?;
    Ok(ControlRecord::from_bytes(&bytes))
}

/// Write the control record in place (non-erasing).
///
/// Only valid when every changed word is a bit-subset of what is already
/// persisted; all forward step transitions and all writes into erased
/// fields satisfy this.
pub fn write_record<P: Partition + ?Sized>(
    update: &mut P,
    record: &ControlRecord,
) -> Result<(), PartitionError> {
    update.write_at(0, &record.to_bytes())
}

/// Advance `update_step` with a non-erasing write.
pub fn advance_step<P: Partition + ?Sized>(
    update: &mut P,
    step: Step,
) -> Result<(), PartitionError> {
    let mut record = read_record(update)?;
    record.update_step = step.code();
    write_record(update, &record)
}

/// Set `update_step` to a value that may need bits set: stage the whole
/// update zone, erase the region, write the zone back.
pub fn rewind_step<P: Partition + ?Sized>(
    update: &mut P,
    step: Step,
    zone: &mut [u8; UPDATE_ZONE_SIZE],
) -> Result<(), PartitionError> {
    update.read_at(0, zone)?;
    zone[..4].copy_from_slice(&step.code().to_le_bytes());
    update.erase_all()?;
    update.write_at(0, zone)
}

/// Persist the selected patch descriptor index.
pub fn set_patch_index<P: Partition + ?Sized>(
    update: &mut P,
    index: u32,
) -> Result<(), PartitionError> {
    let mut record = read_record(update)?;
    record.patch_index = index;
    write_record(update, &record)
}

/// Persist the snapshot of the prior runapp.
pub fn set_backup_info<P: Partition + ?Sized>(
    update: &mut P,
    size: u32,
    hash: u32,
) -> Result<(), PartitionError> {
    let mut record = read_record(update)?;
    record.backup_size = size;
    record.backup_hash = hash;
    write_record(update, &record)
}

/// Persist the snapshot of the decoded candidate image.
pub fn set_decode_info<P: Partition + ?Sized>(
    update: &mut P,
    size: u32,
    hash: u32,
) -> Result<(), PartitionError> {
    let mut record = read_record(update)?;
    record.decode_size = size;
    record.decode_hash = hash;
    write_record(update, &record)
}

/// One-shot read of the stay flag: reports whether a "hold the loader"
/// request is pending and clears it if so. Clearing only needs bits
/// cleared, so the write is non-erasing.
pub fn take_stay<P: Partition + ?Sized>(update: &mut P) -> Result<bool, PartitionError> {
    let mut record = read_record(update)?;
    let stay = record.update_stay != 0 && record.update_stay != ERASED_WORD;
    if stay {
        record.update_stay = 0;
        write_record(update, &record)?;
    }
    Ok(stay)
}

/// Request that the next boot decision holds the device in the loader.
///
/// Setting a nonzero value over a previously cleared word needs bits set,
/// so this is an erasing write.
pub fn set_stay<P: Partition + ?Sized>(
    update: &mut P,
    zone: &mut [u8; UPDATE_ZONE_SIZE],
) -> Result<(), PartitionError> {
    update.read_at(0, zone)?;
    zone[4..8].copy_from_slice(&1u32.to_le_bytes());
    update.erase_all()?;
    update.write_at(0, zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let record = ControlRecord {
            update_step: Step::Decode.code(),
            update_stay: 0,
            patch_index: 2,
            backup_size: 0x2000,
            backup_hash: 0xAAAA_BBBB,
            decode_size: 0x1800,
            decode_hash: 0xCCCC_DDDD,
        };
        assert_eq!(ControlRecord::from_bytes(&record.to_bytes()), record);
    }

    #[test]
    fn test_erased_record_reads_as_finish() {
        let record = ControlRecord::erased();
        assert_eq!(record.step(), Some(Step::Finish));
    }

    #[test]
    fn test_zero_step_reads_as_finish() {
        assert_eq!(Step::from_code(0), Some(Step::Finish));
    }

    #[test]
    fn test_unknown_step_code_rejected() {
        assert_eq!(Step::from_code(0x0000_001F), None);
        assert_eq!(Step::from_code(0x8000_0000), None);
    }

    #[test]
    fn test_forward_ladder_is_erase_free() {
        // Every transition the state machine takes without an erase.
        let forward = [
            (ERASED_WORD, Step::Verify),
            (Step::Verify.code(), Step::Decode),
            (Step::Decode.code(), Step::Backup),
            (Step::Backup.code(), Step::Docopy),
            (Step::Docopy.code(), Step::Finish),
            (Step::Docopy.code(), Step::Revert),
            (Step::Verify.code(), Step::Finish),
            (Step::Decode.code(), Step::Finish),
            (Step::Revert.code(), Step::Finish),
            (Step::Recopy.code(), Step::Finish),
            (Step::Rocopy.code(), Step::Finish),
        ];
        for (from, to) in forward {
            assert!(
                to.reachable_in_place(from),
                "{:#010x} -> {} must not need an erase",
                from,
                to.name()
            );
        }
    }

    #[test]
    fn test_backward_jumps_need_an_erase() {
        assert!(!Step::Revert.reachable_in_place(Step::Finish.code()));
        assert!(!Step::Recopy.reachable_in_place(Step::Finish.code()));
        assert!(!Step::Rocopy.reachable_in_place(Step::Finish.code()));
    }
}
