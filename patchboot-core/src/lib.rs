// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Crash-safe firmware update core for patchboot.
//!
//! This crate is the update state machine of a single-image bootloader: it
//! verifies a downloaded package, decodes a full image or a (full or
//! differential) patch into a candidate, snapshots the running firmware,
//! installs the candidate, and rolls back or forward on failure, resuming
//! correctly from a persisted step code after power loss at any point.
//!
//! It supports both `no_std` (device) and `std` (host) environments:
//! - Default: `std` for host tools, tests and simulation
//! - `default-features = false`: `no_std` mode for embedded targets
//!
//! Hardware stays outside: flash access comes in through the
//! [`partition::Partition`] trait, the patch algorithm through
//! [`patch::PatchDecoder`], package bytes through the framed
//! [`download::Receiver`], and all diagnostics leave through
//! [`trace::Trace`].

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod crc;
pub mod download;
pub mod engine;
pub mod header;
pub mod partition;
pub mod patch;
pub mod record;
pub mod trace;

#[cfg(feature = "std")]
pub mod sim;

// Re-export the types most integrations touch
pub use engine::{Config, PrecheckError, Status, UpdateEngine};
pub use header::{PackageHeader, PatchDescriptor, PatchKind, HEADER_MIRROR_OFFSET};
pub use partition::{Partition, PartitionError, Region, Regions, COPY_BUF_SIZE};
pub use record::{ControlRecord, Step, CONTROL_RECORD_SIZE, UPDATE_ZONE_SIZE};
pub use trace::{NullTrace, Trace};
