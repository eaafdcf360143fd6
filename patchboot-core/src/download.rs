// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Framed package download into the `backup` region.
//!
//! Transports deliver the package as a sequence of postcard-encoded frames,
//! each length-prefixed and carrying its own CRC. The receiver erases
//! `backup` on `Begin` and appends strictly sequential `Data` chunks; after
//! `End` the caller runs the package precheck and arms the update.

use serde::{Deserialize, Serialize};

use crate::crc::{crc32, CRC_INIT};
use crate::partition::{Partition, PartitionError};

/// Largest payload a single `Data` frame may carry.
pub const MAX_CHUNK: usize = 1024;

/// Wire overhead per frame: u16 length prefix plus trailing CRC word.
pub const FRAME_OVERHEAD: usize = 2 + 4;

/// One download frame.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)] // no_std, no allocator for Box
pub enum Frame {
    /// Opens a transfer of `total_size` bytes; erases `backup`.
    Begin { total_size: u32 },
    /// Sequential chunk; `offset` must equal the receiver's cursor.
    #[cfg(not(feature = "std"))]
    Data {
        offset: u32,
        bytes: heapless::Vec<u8, MAX_CHUNK>,
    },
    #[cfg(feature = "std")]
    Data {
        offset: u32,
        bytes: alloc::vec::Vec<u8>,
    },
    /// Closes the transfer; `total_size` must match the bytes received.
    End { total_size: u32 },
}

/// Framing-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes for the declared frame.
    Truncated,
    /// Frame CRC mismatch.
    BadCrc { expect: u32, actual: u32 },
    /// Payload failed to (de)serialize.
    Codec,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "truncated frame"),
            FrameError::BadCrc { expect, actual } => {
                write!(f, "frame crc {:#010x}, expected {:#010x}", actual, expect)
            }
            FrameError::Codec => write!(f, "malformed frame payload"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

/// Encode `frame` into `buf` as `[len:u16le][payload][crc:u32le]`.
/// Returns the encoded length.
pub fn encode_frame(frame: &Frame, buf: &mut [u8]) -> Result<usize, FrameError> {
    if buf.len() < FRAME_OVERHEAD {
        return Err(FrameError::Truncated);
    }
    let end = buf.len() - 4;
    let n = postcard::to_slice(frame, &mut buf[2..end])
        .map_err(|_| FrameError::Codec)?
        .len();
    if n > u16::MAX as usize {
        return Err(FrameError::Codec);
    }
    buf[..2].copy_from_slice(&(n as u16).to_le_bytes());
    let crc = crc32(&buf[2..2 + n], CRC_INIT);
    buf[2 + n..2 + n + 4].copy_from_slice(&crc.to_le_bytes());
    Ok(FRAME_OVERHEAD + n)
}

/// Decode one frame from the front of `buf`. Returns the frame and how
/// many bytes it consumed.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::Truncated);
    }
    let n = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let total = FRAME_OVERHEAD + n;
    if buf.len() < total {
        return Err(FrameError::Truncated);
    }

    let payload = &buf[2..2 + n];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[2 + n..total]);
    let expect = u32::from_le_bytes(crc_bytes);
    let actual = crc32(payload, CRC_INIT);
    if actual != expect {
        return Err(FrameError::BadCrc { expect, actual });
    }

    let frame = postcard::from_bytes(payload).map_err(|_| FrameError::Codec)?;
    Ok((frame, total))
}

/// Receiver-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadError {
    /// Frame not valid in the current transfer state.
    BadState,
    /// `Data` frame out of order.
    NonSequential { expect: u32, got: u32 },
    /// Transfer would overrun `backup` or the declared total.
    Overflow,
    /// `End` total disagrees with the bytes received.
    LengthMismatch { expect: u32, got: u32 },
    Partition(PartitionError),
}

impl From<PartitionError> for DownloadError {
    fn from(err: PartitionError) -> Self {
        DownloadError::Partition(err)
    }
}

impl core::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DownloadError::BadState => write!(f, "frame not valid in this state"),
            DownloadError::NonSequential { expect, got } => {
                write!(f, "chunk at offset {}, expected {}", got, expect)
            }
            DownloadError::Overflow => write!(f, "transfer exceeds the backup region"),
            DownloadError::LengthMismatch { expect, got } => {
                write!(f, "transfer closed at {} of {} bytes", got, expect)
            }
            DownloadError::Partition(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DownloadError {}

/// What a successfully handled frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    Started { total: u32 },
    Chunk { cursor: u32 },
    Complete { total: u32 },
}

#[derive(Clone, Copy)]
enum RxState {
    Idle,
    Receiving { total: u32, cursor: u32 },
}

/// Applies download frames to the `backup` region.
pub struct Receiver {
    state: RxState,
}

impl Receiver {
    pub const fn new() -> Self {
        Receiver {
            state: RxState::Idle,
        }
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.state, RxState::Receiving { .. })
    }

    /// Drop an unfinished transfer.
    pub fn abort(&mut self) {
        self.state = RxState::Idle;
    }

    /// Apply one frame against `backup`.
    pub fn handle<P: Partition + ?Sized>(
        &mut self,
        backup: &mut P,
        frame: &Frame,
    ) -> Result<RxEvent, DownloadError> {
        match frame {
            Frame::Begin { total_size } => {
                if self.is_receiving() {
                    return Err(DownloadError::BadState);
                }
                if *total_size > backup.size() {
                    return Err(DownloadError::Overflow);
                }
                backup.erase_all()?;
                self.state = RxState::Receiving {
                    total: *total_size,
                    cursor: 0,
                };
                Ok(RxEvent::Started { total: *total_size })
            }
            Frame::Data { offset, bytes } => {
                let RxState::Receiving { total, cursor } = &mut self.state else {
                    return Err(DownloadError::BadState);
                };
                if *offset != *cursor {
                    return Err(DownloadError::NonSequential {
                        expect: *cursor,
                        got: *offset,
                    });
                }
                let len = bytes.len() as u32;
                if *cursor + len > *total {
                    return Err(DownloadError::Overflow);
                }
                backup.write_at(*cursor, bytes)?;
                *cursor += len;
                Ok(RxEvent::Chunk { cursor: *cursor })
            }
            Frame::End { total_size } => {
                let RxState::Receiving { cursor, .. } = self.state else {
                    return Err(DownloadError::BadState);
                };
                if *total_size != cursor {
                    return Err(DownloadError::LengthMismatch {
                        expect: *total_size,
                        got: cursor,
                    });
                }
                self.state = RxState::Idle;
                Ok(RxEvent::Complete { total: cursor })
            }
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Receiver::new()
    }
}
