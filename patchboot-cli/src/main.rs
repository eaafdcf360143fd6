// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Package builder and update simulator for the patchboot core.
//!
//! Usage:
//!   patchboot --dir device init
//!   patchboot --dir device flash firmware-v1.bin
//!   patchboot pack firmware-v2.bin --old firmware-v1.bin -o v1-to-v2.pkg
//!   patchboot --dir device download v1-to-v2.pkg
//!   patchboot --dir device run
//!   patchboot --dir device undo

mod cli;
mod commands;
mod store;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
