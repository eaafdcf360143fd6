// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The crash-safe update state machine.
//!
//! Seven phases, driven one per [`UpdateEngine::poll`] call from the step
//! code persisted in the control record:
//!
//! | step     | source → sink     | purpose                              |
//! |----------|-------------------|--------------------------------------|
//! | `verify` | backup            | check the download, select a patch   |
//! | `decode` | backup → decode   | produce the candidate image          |
//! | `backup` | runapp → backup   | snapshot the current firmware        |
//! | `docopy` | decode → runapp   | install the candidate                |
//! | `revert` | backup → runapp   | roll back to the snapshot            |
//! | `recopy` | decode → runapp   | roll forward from the candidate      |
//! | `rocopy` | decode → runapp   | forced roll-forward, runapp-sized    |
//!
//! Every persistent step advance happens *after* the work it records has
//! been CRC-verified, so the persisted step always under-approximates
//! progress and rerunning the current phase after power loss is safe.

use crate::download::{DownloadError, Frame, Receiver, RxEvent};
use crate::header::{
    load_header, HeaderError, PackageHeader, PatchDescriptor, PatchKind, HEADER_BUF_SIZE,
    HEADER_MIRROR_OFFSET,
};
use crate::partition::{
    copy_region, hash_region, Partition, PartitionError, Regions, COPY_BUF_SIZE,
};
use crate::patch::{PatchDecoder, PatchError, PatchWindow, RegionSink, RegionSource, ZeroSource};
use crate::record::{self, ControlRecord, Step, ERASED_WORD, UPDATE_ZONE_SIZE};
use crate::trace::{t_debug, t_error, t_info, Trace};

/// Result of one [`UpdateEngine::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No update in progress, or the update was abandoned.
    Idle,
    /// A phase completed; call `poll` again for the next one.
    Busy,
    /// The update (or rollback) reached its terminal success.
    Done,
}

/// Engine tunables. The defaults match a stock deployment.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Integrity-check attempts per phase before giving up.
    pub max_tries: u32,
    /// Patch-stream cache hint handed to the decoder, in bytes.
    pub patch_cache: usize,
    /// Decompression cache hint handed to the decoder, in bytes.
    pub decompress_cache: usize,
    /// If nonzero, the first runapp word ANDed with this must equal
    /// `msp_data` for the boot decision to pass.
    pub msp_mask: u32,
    pub msp_data: u32,
    /// If nonzero, the second runapp word ANDed with this must equal
    /// `app_data` for the boot decision to pass.
    pub app_mask: u32,
    pub app_data: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_tries: 2,
            patch_cache: 1024,
            decompress_cache: 1024,
            msp_mask: 0x0000_0000,
            msp_data: 0x2000_0000,
            app_mask: 0x0000_0000,
            app_data: 0x0000_0000,
        }
    }
}

/// Failure of the post-download package check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecheckError {
    Header(HeaderError),
    /// Package body CRC mismatch, retries exhausted.
    BodyHash,
    /// No patch descriptor matches the current runapp.
    NoDescriptor,
    Partition(PartitionError),
}

impl From<HeaderError> for PrecheckError {
    fn from(err: HeaderError) -> Self {
        PrecheckError::Header(err)
    }
}

impl From<PartitionError> for PrecheckError {
    fn from(err: PartitionError) -> Self {
        PrecheckError::Partition(err)
    }
}

impl core::fmt::Display for PrecheckError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PrecheckError::Header(err) => write!(f, "package header: {}", err),
            PrecheckError::BodyHash => write!(f, "package body hash mismatch"),
            PrecheckError::NoDescriptor => write!(f, "no patch matches the current firmware"),
            PrecheckError::Partition(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PrecheckError {}

/// The update core: four regions, a patch decoder, a trace sink, and the
/// fixed working buffers.
pub struct UpdateEngine<P: Partition, D: PatchDecoder, T: Trace> {
    regions: Regions<P>,
    decoder: D,
    trace: T,
    config: Config,
    receiver: Receiver,
    copy_buf: [u8; COPY_BUF_SIZE],
    head_buf: [u8; HEADER_BUF_SIZE],
    zone_buf: [u8; UPDATE_ZONE_SIZE],
}

impl<P: Partition, D: PatchDecoder, T: Trace> UpdateEngine<P, D, T> {
    /// Build an engine over resolved regions.
    ///
    /// The `update` region must be at least [`UPDATE_ZONE_SIZE`] bytes:
    /// control record, then the header mirror at [`HEADER_MIRROR_OFFSET`].
    pub fn new(regions: Regions<P>, decoder: D, trace: T, config: Config) -> Self {
        UpdateEngine {
            regions,
            decoder,
            trace,
            config,
            receiver: Receiver::new(),
            copy_buf: [0; COPY_BUF_SIZE],
            head_buf: [0; HEADER_BUF_SIZE],
            zone_buf: [0; UPDATE_ZONE_SIZE],
        }
    }

    pub fn regions(&self) -> &Regions<P> {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut Regions<P> {
        &mut self.regions
    }

    /// Current control record.
    pub fn record(&self) -> Result<ControlRecord, PartitionError> {
        record::read_record(&self.regions.update)
    }

    /// Drive the update: runs at most one phase and reports whether more
    /// work remains. Callers re-invoke until the status is not `Busy`.
    pub fn poll(&mut self) -> Status {
        let record = match record::read_record(&self.regions.update) {
            Ok(record) => record,
            Err(err) => {
                t_error!(self.trace, "control record read failed: {}", err);
                return Status::Idle;
            }
        };
        let Some(step) = record.step() else {
            t_error!(
                self.trace,
                "unknown update step {:#010x}, ignoring",
                record.update_step
            );
            return Status::Idle;
        };

        match step {
            Step::Finish => Status::Idle,
            Step::Verify => self.verify(),
            Step::Decode => self.decode(),
            Step::Backup => self.backup(),
            Step::Docopy => self.docopy(),
            Step::Revert => self.revert(),
            Step::Recopy => self.recopy(),
            Step::Rocopy => self.rocopy(),
        }
    }

    // --- Download path ---

    /// Feed one download frame to the receiver. On `Complete`, follow up
    /// with [`Self::finish_download`] to precheck and arm the update.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<RxEvent, DownloadError> {
        self.receiver.handle(&mut self.regions.backup, frame)
    }

    /// Precheck the downloaded package and, on success, erase `update` and
    /// arm the `verify` phase for the next `poll`.
    pub fn finish_download(&mut self) -> Result<(), PrecheckError> {
        t_info!(self.trace, "precheck package head:");
        let head = load_header(&self.regions.backup, 0, &mut self.head_buf)?;
        t_info!(self.trace, "ok");

        t_info!(self.trace, "precheck package body:");
        let mut tries = 0;
        loop {
            let crc = hash_region(
                &self.regions.backup,
                head.header_size,
                head.remain_size,
                &mut self.copy_buf,
                &mut self.trace,
            );
            if matches!(crc, Ok(crc) if crc == head.remain_hash) {
                t_info!(self.trace, "ok");
                break;
            }
            self.trace_body_mismatch(&head, &crc);
            tries += 1;
            if tries >= self.config.max_tries {
                return Err(PrecheckError::BodyHash);
            }
            t_info!(self.trace, "retry: {}", tries);
        }

        let mut tries = 0;
        loop {
            if self.scan_descriptors(&head).is_some() {
                t_info!(self.trace, "precheck done!");
                self.regions.update.erase_all()?;
                record::advance_step(&mut self.regions.update, Step::Verify)?;
                return Ok(());
            }
            tries += 1;
            if tries >= self.config.max_tries {
                return Err(PrecheckError::NoDescriptor);
            }
            t_info!(self.trace, "retry: {}", tries);
        }
    }

    // --- Operator commands ---

    /// `undo`: restore the snapshotted firmware on the next polls.
    pub fn request_revert(&mut self) -> Result<(), PartitionError> {
        record::rewind_step(&mut self.regions.update, Step::Revert, &mut self.zone_buf)
    }

    /// `redo`: reinstall the decoded candidate on the next polls.
    pub fn request_recopy(&mut self) -> Result<(), PartitionError> {
        record::rewind_step(&mut self.regions.update, Step::Recopy, &mut self.zone_buf)
    }

    /// `redo -f`: forced roll-forward that trusts nothing in the control
    /// record; copies a full runapp-sized image out of `decode`.
    pub fn request_forced_recopy(&mut self) -> Result<(), PartitionError> {
        record::rewind_step(&mut self.regions.update, Step::Rocopy, &mut self.zone_buf)
    }

    /// Hold the device in the loader across the next boot decision.
    pub fn hold_next_boot(&mut self) -> Result<(), PartitionError> {
        record::set_stay(&mut self.regions.update, &mut self.zone_buf)
    }

    // --- Boot decision ---

    /// Whether the runtime may jump to the application: runapp's first
    /// word is programmed, no update is in flight, and no stay request is
    /// pending (consumed here if it was).
    pub fn boot_ready(&mut self) -> Result<bool, PartitionError> {
        let mut word = [0u8; 4];
        self.regions.runapp.read_at(0, &mut word)?;
        let msp = u32::from_le_bytes(word);
        if msp == ERASED_WORD {
            return Ok(false);
        }

        let record = record::read_record(&self.regions.update)?;
        let step_clear = record.update_step == 0 || record.update_step == ERASED_WORD;
        let stay = record::take_stay(&mut self.regions.update)?;
        if !step_clear || stay {
            return Ok(false);
        }

        if self.config.msp_mask != 0 && msp & self.config.msp_mask != self.config.msp_data {
            t_error!(self.trace, "boot rejected: initial SP {:#010x} invalid", msp);
            return Ok(false);
        }
        if self.config.app_mask != 0 {
            self.regions.runapp.read_at(4, &mut word)?;
            let reset = u32::from_le_bytes(word);
            if reset & self.config.app_mask != self.config.app_data {
                t_error!(
                    self.trace,
                    "boot rejected: reset vector {:#010x} invalid",
                    reset
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    // --- Phases ---

    /// Integrity-check the downloaded package, pick a patch descriptor,
    /// and mirror the header into `update`.
    fn verify(&mut self) -> Status {
        let head = match load_header(&self.regions.backup, 0, &mut self.head_buf) {
            Ok(head) => head,
            Err(err) => {
                t_error!(self.trace, "download [packet:header] {}", err);
                return self.abort_to_finish();
            }
        };

        t_info!(self.trace, "update start:");
        t_info!(self.trace, "phase: verify");

        let mut tries = 0;
        loop {
            t_info!(self.trace, "verify [download/backup]");
            let crc = hash_region(
                &self.regions.backup,
                head.header_size,
                head.remain_size,
                &mut self.copy_buf,
                &mut self.trace,
            );
            if matches!(crc, Ok(crc) if crc == head.remain_hash) {
                t_info!(self.trace, "ok");
                break;
            }
            self.trace_body_mismatch(&head, &crc);
            tries += 1;
            if tries >= self.config.max_tries {
                return self.abort_to_finish();
            }
            t_info!(self.trace, "retry: {}", tries);
        }

        let mut tries = 0;
        loop {
            if let Some((index, descriptor)) = self.scan_descriptors(&head) {
                // The mirror becomes the authoritative header once backup
                // is repurposed; persist it before the step advances.
                let mirror = &self.head_buf[..head.header_size as usize];
                if let Err(err) = self.regions.update.write_at(HEADER_MIRROR_OFFSET, mirror) {
                    t_error!(self.trace, "header mirror write failed: {}", err);
                    return self.abort_to_finish();
                }
                if record::set_patch_index(&mut self.regions.update, index as u32).is_err()
                    || record::advance_step(&mut self.regions.update, Step::Decode).is_err()
                {
                    t_error!(self.trace, "control record write failed");
                    return self.abort_to_finish();
                }
                t_info!(
                    self.trace,
                    "verify done (this is a {})",
                    descriptor.kind().describe()
                );
                return Status::Busy;
            }
            tries += 1;
            if tries >= self.config.max_tries {
                t_error!(self.trace, "no patch matches the current firmware");
                return self.abort_to_finish();
            }
            t_info!(self.trace, "retry: {}", tries);
        }
    }

    /// Produce the candidate image in `decode` from the selected patch.
    fn decode(&mut self) -> Status {
        let Some(head) = self.load_mirror_header() else {
            return self.abort_to_finish();
        };
        let Some(descriptor) = self.selected_descriptor(&head) else {
            return self.abort_to_finish();
        };

        t_info!(self.trace, "phase: decode");

        let mut tries = 0;
        loop {
            t_info!(self.trace, "erases [decode/newapp]");
            let applied = self.regions.decode.erase_all().is_ok()
                && self.apply_patch(&head, &descriptor).is_ok();

            if applied {
                t_info!(self.trace, "verify [decode/newapp]");
                let crc = hash_region(
                    &self.regions.decode,
                    0,
                    descriptor.new_size,
                    &mut self.copy_buf,
                    &mut self.trace,
                );
                if matches!(crc, Ok(crc) if crc == descriptor.new_hash) {
                    t_info!(self.trace, "ok");
                    if record::set_decode_info(
                        &mut self.regions.update,
                        descriptor.new_size,
                        descriptor.new_hash,
                    )
                    .is_err()
                        || record::advance_step(&mut self.regions.update, Step::Backup).is_err()
                    {
                        t_error!(self.trace, "control record write failed");
                        return self.abort_to_finish();
                    }
                    t_info!(self.trace, "decode done");
                    return Status::Busy;
                }
                self.trace_image_mismatch("newapp", descriptor.new_size, descriptor.new_hash, &crc);
            } else {
                t_error!(self.trace, "patch application failed");
            }

            tries += 1;
            if tries >= self.config.max_tries {
                return self.abort_to_finish();
            }
            t_info!(self.trace, "retry: {}", tries);
        }
    }

    /// Snapshot the running firmware into `backup`.
    ///
    /// No retry loop here: the snapshot is re-verified by `revert` if it
    /// is ever needed, and a rerun of this phase redoes it from scratch.
    fn backup(&mut self) -> Status {
        if self.load_mirror_header().is_none() {
            return self.abort_to_finish();
        }

        t_info!(self.trace, "phase: backup");
        let size = self.regions.runapp.size();

        t_info!(self.trace, "erases [download/backup]");
        let copied = self.regions.backup.erase_all().is_ok()
            && copy_region(
                &self.regions.runapp,
                0,
                &mut self.regions.backup,
                0,
                size,
                &mut self.copy_buf,
                &mut self.trace,
            )
            .is_ok();
        if !copied {
            t_error!(self.trace, "snapshot copy failed");
            return self.abort_to_finish();
        }

        t_info!(self.trace, "hasher [current/runapp]");
        let crc = match hash_region(
            &self.regions.runapp,
            0,
            size,
            &mut self.copy_buf,
            &mut self.trace,
        ) {
            Ok(crc) => crc,
            Err(err) => {
                t_error!(self.trace, "snapshot hash failed: {}", err);
                return self.abort_to_finish();
            }
        };

        if record::set_backup_info(&mut self.regions.update, size, crc).is_err()
            || record::advance_step(&mut self.regions.update, Step::Docopy).is_err()
        {
            t_error!(self.trace, "control record write failed");
            return self.abort_to_finish();
        }
        t_info!(self.trace, "backup done");
        Status::Busy
    }

    /// Install the candidate image into `runapp`. Exhausted retries fall
    /// back to `revert`, since the snapshot exists by now.
    fn docopy(&mut self) -> Status {
        let Some(head) = self.load_mirror_header() else {
            return self.abort_to_finish();
        };
        let Some(descriptor) = self.selected_descriptor(&head) else {
            return self.abort_to_finish();
        };

        t_info!(self.trace, "phase: docopy");

        let mut tries = 0;
        loop {
            t_info!(self.trace, "erases [current/runapp]");
            let copied = self.regions.runapp.erase_all().is_ok()
                && copy_region(
                    &self.regions.decode,
                    0,
                    &mut self.regions.runapp,
                    0,
                    descriptor.new_size,
                    &mut self.copy_buf,
                    &mut self.trace,
                )
                .is_ok();

            if copied {
                t_info!(self.trace, "verify [current/runapp]");
                let crc = hash_region(
                    &self.regions.runapp,
                    0,
                    descriptor.new_size,
                    &mut self.copy_buf,
                    &mut self.trace,
                );
                if matches!(crc, Ok(crc) if crc == descriptor.new_hash) {
                    t_info!(self.trace, "ok");
                    if record::advance_step(&mut self.regions.update, Step::Finish).is_err() {
                        t_error!(self.trace, "control record write failed");
                        return self.abort_to_finish();
                    }
                    t_info!(self.trace, "docopy done");
                    t_info!(self.trace, "update success!");
                    return Status::Done;
                }
                self.trace_image_mismatch("runapp", descriptor.new_size, descriptor.new_hash, &crc);
            } else {
                t_error!(self.trace, "install copy failed");
            }

            tries += 1;
            if tries >= self.config.max_tries {
                t_info!(self.trace, "falling back to revert");
                if record::advance_step(&mut self.regions.update, Step::Revert).is_err() {
                    t_error!(self.trace, "control record write failed");
                    return self.abort_to_finish();
                }
                return Status::Busy;
            }
            t_info!(self.trace, "retry: {}", tries);
        }
    }

    /// Restore the snapshotted firmware from `backup`.
    fn revert(&mut self) -> Status {
        let record = match record::read_record(&self.regions.update) {
            Ok(record) => record,
            Err(err) => {
                t_error!(self.trace, "control record read failed: {}", err);
                return Status::Idle;
            }
        };

        t_info!(self.trace, "phase: revert (undo/rollback)");

        let mut tries = 0;
        loop {
            t_info!(self.trace, "verify [backup/oldapp]");
            if record.backup_size == 0x0000_0000 || record.backup_size == ERASED_WORD {
                t_error!(self.trace, "no usable snapshot recorded");
            } else {
                let crc = hash_region(
                    &self.regions.backup,
                    0,
                    record.backup_size,
                    &mut self.copy_buf,
                    &mut self.trace,
                );
                if matches!(crc, Ok(crc) if crc == record.backup_hash) {
                    t_info!(self.trace, "ok");
                    break;
                }
                self.trace_image_mismatch("backup", record.backup_size, record.backup_hash, &crc);
            }
            tries += 1;
            if tries >= self.config.max_tries {
                return self.abort_to_finish();
            }
            t_info!(self.trace, "retry: {}", tries);
        }

        self.restore_runapp(
            RestoreSource::Backup,
            record.backup_size,
            record.backup_hash,
            "revert",
        )
    }

    /// Reinstall the decoded candidate from `decode`, sizes from the
    /// control record.
    fn recopy(&mut self) -> Status {
        let record = match record::read_record(&self.regions.update) {
            Ok(record) => record,
            Err(err) => {
                t_error!(self.trace, "control record read failed: {}", err);
                return Status::Idle;
            }
        };

        t_info!(self.trace, "phase: recopy (redo/rollforward)");

        let mut tries = 0;
        loop {
            t_info!(self.trace, "verify [decode/newapp]");
            if record.decode_size == 0x0000_0000 || record.decode_size == ERASED_WORD {
                t_error!(self.trace, "no usable candidate recorded");
            } else {
                let crc = hash_region(
                    &self.regions.decode,
                    0,
                    record.decode_size,
                    &mut self.copy_buf,
                    &mut self.trace,
                );
                if matches!(crc, Ok(crc) if crc == record.decode_hash) {
                    t_info!(self.trace, "ok");
                    break;
                }
                self.trace_image_mismatch("decode", record.decode_size, record.decode_hash, &crc);
            }
            tries += 1;
            if tries >= self.config.max_tries {
                return self.abort_to_finish();
            }
            t_info!(self.trace, "retry: {}", tries);
        }

        self.restore_runapp(
            RestoreSource::Decode,
            record.decode_size,
            record.decode_hash,
            "recopy",
        )
    }

    /// Forced roll-forward: hash whatever `decode` holds over a full
    /// runapp-sized range and install exactly that. Recovery path for a
    /// control record that can no longer be trusted.
    fn rocopy(&mut self) -> Status {
        if self.load_mirror_header().is_none() {
            return self.abort_to_finish();
        }

        t_info!(self.trace, "phase: rocopy (redo/rollforward -f)");

        let size = self.regions.runapp.size();
        t_info!(self.trace, "hasher [decode/newapp]");
        let want = match hash_region(
            &self.regions.decode,
            0,
            size,
            &mut self.copy_buf,
            &mut self.trace,
        ) {
            Ok(crc) => crc,
            Err(err) => {
                t_error!(self.trace, "decode hash failed: {}", err);
                return self.abort_to_finish();
            }
        };

        self.restore_runapp(RestoreSource::Decode, size, want, "rocopy")
    }

    // --- Shared pieces ---

    /// Erase `runapp`, copy `len` bytes from `source`, and verify against
    /// `want`. Terminal half of revert/recopy/rocopy.
    fn restore_runapp(&mut self, source: RestoreSource, len: u32, want: u32, label: &str) -> Status {
        let mut tries = 0;
        loop {
            t_info!(self.trace, "erases [current/runapp]");
            let source_part = match source {
                RestoreSource::Backup => &self.regions.backup,
                RestoreSource::Decode => &self.regions.decode,
            };
            let copied = self.regions.runapp.erase_all().is_ok()
                && copy_region(
                    source_part,
                    0,
                    &mut self.regions.runapp,
                    0,
                    len,
                    &mut self.copy_buf,
                    &mut self.trace,
                )
                .is_ok();

            if copied {
                t_info!(self.trace, "verify [current/runapp]");
                let crc = hash_region(
                    &self.regions.runapp,
                    0,
                    len,
                    &mut self.copy_buf,
                    &mut self.trace,
                );
                if matches!(crc, Ok(crc) if crc == want) {
                    t_info!(self.trace, "ok");
                    if record::advance_step(&mut self.regions.update, Step::Finish).is_err() {
                        t_error!(self.trace, "control record write failed");
                        return self.abort_to_finish();
                    }
                    t_info!(self.trace, "{} done", label);
                    return Status::Done;
                }
                self.trace_image_mismatch("runapp", len, want, &crc);
            } else {
                t_error!(self.trace, "restore copy failed");
            }

            tries += 1;
            if tries >= self.config.max_tries {
                return self.abort_to_finish();
            }
            t_info!(self.trace, "retry: {}", tries);
        }
    }

    /// Run the decoder (or the plain copy for a full image) for one
    /// descriptor, `backup` → `decode`.
    fn apply_patch(
        &mut self,
        head: &PackageHeader,
        descriptor: &PatchDescriptor,
    ) -> Result<(), PatchError> {
        match descriptor.kind() {
            PatchKind::FullImage => {
                t_info!(self.trace, "unpack [decode/newapp] <- [download/image]");
                copy_region(
                    &self.regions.backup,
                    head.header_size,
                    &mut self.regions.decode,
                    0,
                    head.remain_size,
                    &mut self.copy_buf,
                    &mut self.trace,
                )
                .map_err(|_| PatchError::Input)
            }
            PatchKind::FullPatch => {
                t_info!(self.trace, "patch [decode/newapp] <- [download/full-patch]");
                let mut window = PatchWindow::new(
                    &self.regions.backup,
                    head.header_size.saturating_add(descriptor.patch_addr),
                    descriptor.patch_size,
                );
                let mut sink =
                    RegionSink::new(&mut self.regions.decode, descriptor.new_size, &mut self.trace);
                self.decoder.apply(
                    self.config.patch_cache,
                    self.config.decompress_cache,
                    &mut window,
                    &ZeroSource,
                    &mut sink,
                )
            }
            PatchKind::DiffPatch => {
                t_info!(self.trace, "patch [decode/newapp] <- [download/diff-patch]");
                let mut window = PatchWindow::new(
                    &self.regions.backup,
                    head.header_size.saturating_add(descriptor.patch_addr),
                    descriptor.patch_size,
                );
                let old = RegionSource::new(&self.regions.runapp);
                let mut sink =
                    RegionSink::new(&mut self.regions.decode, descriptor.new_size, &mut self.trace);
                self.decoder.apply(
                    self.config.patch_cache,
                    self.config.decompress_cache,
                    &mut window,
                    &old,
                    &mut sink,
                )
            }
        }
    }

    /// One pass over the descriptor table: the first entry whose old-image
    /// expectation matches the current runapp (or matches anything) wins.
    fn scan_descriptors(&mut self, head: &PackageHeader) -> Option<(usize, PatchDescriptor)> {
        let count = head.descriptors.len();
        for (index, descriptor) in head.descriptors.iter().enumerate() {
            t_info!(self.trace, "verify [current/runapp] {}/{}", index + 1, count);
            if descriptor.matches_any_old() {
                t_info!(self.trace, "ok (matches any)");
                return Some((index, *descriptor));
            }
            let crc = hash_region(
                &self.regions.runapp,
                0,
                descriptor.old_size,
                &mut self.copy_buf,
                &mut self.trace,
            );
            if matches!(crc, Ok(crc) if crc == descriptor.old_hash) {
                t_info!(self.trace, "ok");
                return Some((index, *descriptor));
            }
            t_info!(self.trace, "incorrect");
        }
        None
    }

    /// Load and re-validate the header from its mirror in `update`.
    fn load_mirror_header(&mut self) -> Option<PackageHeader> {
        match load_header(&self.regions.update, HEADER_MIRROR_OFFSET, &mut self.head_buf) {
            Ok(head) => Some(head),
            Err(err) => {
                t_error!(self.trace, "upctrl [packet:header] {}", err);
                None
            }
        }
    }

    /// The descriptor the verify phase selected, if the persisted index is
    /// still in range.
    fn selected_descriptor(&mut self, head: &PackageHeader) -> Option<PatchDescriptor> {
        let index = match record::read_record(&self.regions.update) {
            Ok(record) => record.patch_index as usize,
            Err(err) => {
                t_error!(self.trace, "control record read failed: {}", err);
                return None;
            }
        };
        let descriptor = head.descriptors.get(index).copied();
        if descriptor.is_none() {
            t_error!(self.trace, "patch index {} out of range", index);
        }
        descriptor
    }

    /// Abandon the update: persist `finish` and report idle. The pre-update
    /// firmware is still in place whenever this runs from verify/decode.
    fn abort_to_finish(&mut self) -> Status {
        if let Err(err) = record::advance_step(&mut self.regions.update, Step::Finish) {
            t_error!(self.trace, "failed to persist finish step: {}", err);
        }
        Status::Idle
    }

    fn trace_body_mismatch(&mut self, head: &PackageHeader, crc: &Result<u32, PartitionError>) {
        t_error!(self.trace, "error!");
        t_debug!(self.trace, "expect remain size = {:#010x}", head.remain_size);
        t_debug!(self.trace, "expect remain hash = {:#010x}", head.remain_hash);
        match crc {
            Ok(actual) => t_debug!(self.trace, "actual remain hash = {:#010x}", actual),
            Err(err) => t_debug!(self.trace, "read failed: {}", err),
        }
    }

    fn trace_image_mismatch(
        &mut self,
        what: &str,
        size: u32,
        hash: u32,
        crc: &Result<u32, PartitionError>,
    ) {
        t_error!(self.trace, "error!");
        t_debug!(self.trace, "expect {} size = {:#010x}", what, size);
        t_debug!(self.trace, "expect {} hash = {:#010x}", what, hash);
        match crc {
            Ok(actual) => t_debug!(self.trace, "actual {} hash = {:#010x}", what, actual),
            Err(err) => t_debug!(self.trace, "read failed: {}", err),
        }
    }
}

/// Restore sources for [`UpdateEngine::restore_runapp`].
#[derive(Clone, Copy)]
enum RestoreSource {
    Backup,
    Decode,
}
