// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for the simulated device.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_MPEG_2};
use indicatif::{ProgressBar, ProgressStyle};

use patchboot_core::download::{decode_frame, encode_frame, Frame, FRAME_OVERHEAD, MAX_CHUNK};
use patchboot_core::engine::{Config, Status, UpdateEngine};
use patchboot_core::header::{PackageHeader, PatchDescriptor, PatchKind, HEADER_BUF_SIZE};
use patchboot_core::partition::Partition;
use patchboot_core::patch::XorDecoder;
use patchboot_core::record::{self, ERASED_WORD};
use patchboot_core::trace::Trace;

use crate::store::{self, FilePartition};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

type Engine = UpdateEngine<FilePartition, XorDecoder, ConsoleTrace>;

/// Renders the engine trace on the terminal; long hashes and copies get an
/// indicatif bar.
pub struct ConsoleTrace {
    bar: Option<ProgressBar>,
    style: ProgressStyle,
}

impl ConsoleTrace {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("  [{bar:40.cyan/blue}] {pos}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ConsoleTrace { bar: None, style }
    }

    fn close_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Trace for ConsoleTrace {
    fn info(&mut self, args: fmt::Arguments<'_>) {
        self.close_bar();
        println!("{}", args);
    }

    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.close_bar();
        println!("    {}", args);
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.close_bar();
        eprintln!("{}", args);
    }

    fn progress(&mut self, percent: u8) {
        if percent >= 100 {
            self.close_bar();
            return;
        }
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(100);
            bar.set_style(self.style.clone());
            bar
        });
        bar.set_position(percent as u64);
    }
}

fn engine_for(dir: &Path) -> Result<Engine> {
    Ok(UpdateEngine::new(
        store::open_regions(dir)?,
        XorDecoder,
        ConsoleTrace::new(),
        Config::default(),
    ))
}

/// Create a fresh simulated device.
pub fn init(
    dir: &Path,
    runapp_size: u32,
    backup_size: u32,
    decode_size: u32,
    update_size: u32,
) -> Result<()> {
    store::create_regions(dir, runapp_size, backup_size, decode_size, update_size)?;
    println!("Device state in {}:", dir.display());
    println!("  runapp: {} bytes", runapp_size);
    println!("  backup: {} bytes", backup_size);
    println!("  decode: {} bytes", decode_size);
    println!("  update: {} bytes", update_size);
    Ok(())
}

/// Build an update package around one patch descriptor.
pub fn pack(
    new: &Path,
    output: &Path,
    full_image: bool,
    old: Option<&Path>,
    header_code: u32,
    device_code: u32,
) -> Result<()> {
    let new_image =
        fs::read(new).with_context(|| format!("Failed to read {}", new.display()))?;
    let new_size = new_image.len() as u32;
    let new_hash = CRC32.checksum(&new_image);

    let (kind, payload, old_size, old_hash) = if full_image {
        (
            PatchKind::FullImage,
            new_image.clone(),
            ERASED_WORD,
            ERASED_WORD,
        )
    } else if let Some(old) = old {
        let old_image =
            fs::read(old).with_context(|| format!("Failed to read {}", old.display()))?;
        // The device XORs against its runapp region, which reads 0xFF past
        // the end of the programmed image.
        let payload: Vec<u8> = new_image
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ old_image.get(i).copied().unwrap_or(0xFF))
            .collect();
        (
            PatchKind::DiffPatch,
            payload,
            old_image.len() as u32,
            CRC32.checksum(&old_image),
        )
    } else {
        // Full patch: diff against an all-zero source.
        (PatchKind::FullPatch, new_image.clone(), 0, 0)
    };

    let descriptor = PatchDescriptor {
        patch_type: match kind {
            PatchKind::FullImage => 0xFFFF_FFFF,
            PatchKind::FullPatch => 0x0000_0000,
            PatchKind::DiffPatch => 0x0000_0001,
        },
        patch_addr: 0,
        patch_size: payload.len() as u32,
        patch_hash: CRC32.checksum(&payload),
        old_size,
        old_hash,
        new_size,
        new_hash,
    };

    let mut header =
        PackageHeader::from_descriptors(&[descriptor]).context("Too many patch descriptors")?;
    header.remain_size = payload.len() as u32;
    header.remain_hash = CRC32.checksum(&payload);
    header.patch_area_size = payload.len() as u32;
    header.header_code = header_code;
    header.device_code = device_code;

    let mut buf = [0u8; HEADER_BUF_SIZE];
    let header_len = header.encode_into(&mut buf);

    let mut package = buf[..header_len].to_vec();
    package.extend_from_slice(&payload);
    fs::write(output, &package)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Package: {} ({} bytes, {})",
        output.display(),
        package.len(),
        kind.describe()
    );
    println!("  Header:  {} bytes, 1 descriptor", header_len);
    println!(
        "  Payload: {} bytes, CRC32 0x{:08x}",
        payload.len(),
        descriptor.patch_hash
    );
    println!("  Newapp:  {} bytes, CRC32 0x{:08x}", new_size, new_hash);
    Ok(())
}

/// Program a firmware image straight into runapp (factory programming).
pub fn flash(dir: &Path, file: &Path) -> Result<()> {
    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let mut regions = store::open_regions(dir)?;

    if image.len() as u32 > regions.runapp.size() {
        bail!(
            "Image is {} bytes but runapp holds {}",
            image.len(),
            regions.runapp.size()
        );
    }

    regions.runapp.erase_all()?;
    regions.runapp.write_at(0, &image)?;

    println!(
        "Flashed {} ({} bytes, CRC32 0x{:08x})",
        file.display(),
        image.len(),
        CRC32.checksum(&image)
    );
    Ok(())
}

/// Stream a package onto the device through the download framing, then
/// precheck it and arm the update.
pub fn download(dir: &Path, file: &Path) -> Result<()> {
    let package =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let mut engine = engine_for(dir)?;

    println!(
        "Transferring {} ({} bytes)",
        file.display(),
        package.len()
    );

    let pb = ProgressBar::new(package.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")?
            .progress_chars("#>-"),
    );

    let mut wire = vec![0u8; MAX_CHUNK + FRAME_OVERHEAD + 16];
    let mut send = |engine: &mut Engine, frame: &Frame| -> Result<()> {
        // Round-trip through the wire encoding, as a transport would.
        let n = encode_frame(frame, &mut wire)?;
        let (decoded, _) = decode_frame(&wire[..n])?;
        engine.handle_frame(&decoded)?;
        Ok(())
    };

    send(
        &mut engine,
        &Frame::Begin {
            total_size: package.len() as u32,
        },
    )?;
    let mut offset = 0u32;
    for chunk in package.chunks(MAX_CHUNK) {
        send(
            &mut engine,
            &Frame::Data {
                offset,
                bytes: chunk.to_vec(),
            },
        )?;
        offset += chunk.len() as u32;
        pb.set_position(offset as u64);
    }
    send(
        &mut engine,
        &Frame::End {
            total_size: package.len() as u32,
        },
    )?;
    pb.finish_and_clear();
    println!("Transfer complete");

    engine
        .finish_download()
        .context("Package precheck failed")?;
    println!();
    println!("Update armed. Use 'patchboot --dir {} run' to apply it.", dir.display());
    Ok(())
}

/// Drive the state machine until it reports idle or done.
pub fn run(dir: &Path) -> Result<()> {
    let mut engine = engine_for(dir)?;

    loop {
        match engine.poll() {
            Status::Busy => {}
            Status::Done => {
                println!();
                println!("Update finished.");
                return Ok(());
            }
            Status::Idle => {
                println!();
                println!("Nothing to do (or the update was abandoned; see trace above).");
                return Ok(());
            }
        }
    }
}

fn show_word(value: u32) -> String {
    if value == ERASED_WORD {
        "-- (erased)".to_string()
    } else {
        format!("0x{:08x}", value)
    }
}

/// Print the control record and partition summary.
pub fn status(dir: &Path) -> Result<()> {
    let regions = store::open_regions(dir)?;
    let record = record::read_record(&regions.update)?;

    let step = match record.step() {
        Some(step) => step.name(),
        None => "unknown",
    };

    println!("Device {}:", dir.display());
    println!("  Step:         {} ({})", step, show_word(record.update_step));
    println!("  Stay:         {}", show_word(record.update_stay));
    println!("  Patch index:  {}", show_word(record.patch_index));
    println!("  Backup:       {} bytes, hash {}",
        show_word(record.backup_size),
        show_word(record.backup_hash)
    );
    println!("  Decode:       {} bytes, hash {}",
        show_word(record.decode_size),
        show_word(record.decode_hash)
    );
    println!();
    println!("  runapp {} / backup {} / decode {} / update {} bytes",
        regions.runapp.size(),
        regions.backup.size(),
        regions.decode.size(),
        regions.update.size()
    );
    Ok(())
}

/// Arm a rollback to the snapshotted firmware.
pub fn undo(dir: &Path) -> Result<()> {
    let mut engine = engine_for(dir)?;
    engine.request_revert()?;
    println!("Revert armed. Use 'patchboot --dir {} run' to apply it.", dir.display());
    Ok(())
}

/// Arm a roll-forward to the decoded candidate.
pub fn redo(dir: &Path, force: bool) -> Result<()> {
    let mut engine = engine_for(dir)?;
    if force {
        engine.request_forced_recopy()?;
        println!("Forced roll-forward armed (control record not trusted).");
    } else {
        engine.request_recopy()?;
        println!("Roll-forward armed.");
    }
    println!("Use 'patchboot --dir {} run' to apply it.", dir.display());
    Ok(())
}

/// Hold the device in the loader across the next boot decision.
pub fn stay(dir: &Path) -> Result<()> {
    let mut engine = engine_for(dir)?;
    engine.hold_next_boot()?;
    println!("Next boot decision will hold the loader.");
    Ok(())
}

/// Evaluate (and consume) the boot decision.
pub fn boot(dir: &Path) -> Result<()> {
    let mut engine = engine_for(dir)?;
    if engine.boot_ready()? {
        println!("Boot decision: jump to application.");
    } else {
        println!("Boot decision: stay in the loader.");
    }
    Ok(())
}
