// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "patchboot")]
#[command(about = "Package builder and update simulator for the patchboot core")]
pub struct Cli {
    /// Device state directory holding the four partition files
    #[arg(short, long, default_value = ".patchboot")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create the partition files of a simulated device
    Init {
        /// Size of the active firmware partition
        #[arg(long, default_value = "262144")]
        runapp_size: u32,

        /// Size of the download/snapshot partition
        #[arg(long, default_value = "524288")]
        backup_size: u32,

        /// Size of the decode scratch partition
        #[arg(long, default_value = "262144")]
        decode_size: u32,

        /// Size of the control partition
        #[arg(long, default_value = "8192")]
        update_size: u32,
    },

    /// Build an update package from a firmware image
    Pack {
        /// New firmware image
        #[arg(value_name = "NEW")]
        new: PathBuf,

        /// Output package file
        #[arg(short, long, default_value = "update.pkg")]
        output: PathBuf,

        /// Ship the raw image instead of a patch
        #[arg(long)]
        full_image: bool,

        /// Old image to diff against (XOR reference patch format)
        #[arg(long, conflicts_with = "full_image")]
        old: Option<PathBuf>,

        /// Opaque package identifier stored in the header
        #[arg(long, default_value = "0")]
        header_code: u32,

        /// Opaque device identifier stored in the header
        #[arg(long, default_value = "0")]
        device_code: u32,
    },

    /// Program a firmware image straight into runapp
    Flash {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Transfer a package onto the device and arm the update
    Download {
        /// Package file produced by `pack`
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Drive the update state machine until it goes quiet
    Run,

    /// Show the control record and partition summary
    Status,

    /// Roll back to the snapshotted firmware
    Undo,

    /// Roll forward to the decoded candidate
    Redo {
        /// Trust only decode contents, not the control record
        #[arg(short, long)]
        force: bool,
    },

    /// Hold the device in the loader across the next boot decision
    Stay,

    /// Evaluate the boot decision
    Boot,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init {
            runapp_size,
            backup_size,
            decode_size,
            update_size,
        } => commands::init(&cli.dir, runapp_size, backup_size, decode_size, update_size),
        Commands::Pack {
            new,
            output,
            full_image,
            old,
            header_code,
            device_code,
        } => commands::pack(&new, &output, full_image, old.as_deref(), header_code, device_code),
        Commands::Flash { file } => commands::flash(&cli.dir, &file),
        Commands::Download { file } => commands::download(&cli.dir, &file),
        Commands::Run => commands::run(&cli.dir),
        Commands::Status => commands::status(&cli.dir),
        Commands::Undo => commands::undo(&cli.dir),
        Commands::Redo { force } => commands::redo(&cli.dir, force),
        Commands::Stay => commands::stay(&cli.dir),
        Commands::Boot => commands::boot(&cli.dir),
    }
}
