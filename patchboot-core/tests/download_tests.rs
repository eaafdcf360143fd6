// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Integration tests for the framed download path and the package
//! precheck that arms an update.

use patchboot_core::crc::{crc32, CRC_INIT};
use patchboot_core::download::{
    decode_frame, encode_frame, DownloadError, Frame, FrameError, Receiver, RxEvent, MAX_CHUNK,
};
use patchboot_core::engine::{Config, PrecheckError, Status, UpdateEngine};
use patchboot_core::header::{HeaderError, PackageHeader, PatchDescriptor};
use patchboot_core::partition::Regions;
use patchboot_core::patch::XorDecoder;
use patchboot_core::record::{Step, ERASED_WORD};
use patchboot_core::sim::MemPartition;
use patchboot_core::trace::NullTrace;

type Engine = UpdateEngine<MemPartition, XorDecoder, NullTrace>;

fn make_engine(runapp_image: &[u8]) -> Engine {
    let regions = Regions {
        runapp: MemPartition::with_contents(8192, runapp_image),
        backup: MemPartition::new(16384),
        decode: MemPartition::new(8192),
        update: MemPartition::new(4096),
    };
    UpdateEngine::new(regions, XorDecoder, NullTrace, Config::default())
}

fn full_image_package(new: &[u8]) -> Vec<u8> {
    let descriptor = PatchDescriptor {
        patch_type: 0xFFFF_FFFF,
        patch_size: new.len() as u32,
        patch_hash: crc32(new, CRC_INIT),
        old_size: ERASED_WORD,
        old_hash: ERASED_WORD,
        new_size: new.len() as u32,
        new_hash: crc32(new, CRC_INIT),
        ..Default::default()
    };
    let mut header = PackageHeader::from_descriptors(&[descriptor]).unwrap();
    header.remain_size = new.len() as u32;
    header.remain_hash = crc32(new, CRC_INIT);
    header.patch_area_size = new.len() as u32;

    let mut buf = [0u8; 1024];
    let header_len = header.encode_into(&mut buf);
    let mut package = buf[..header_len].to_vec();
    package.extend_from_slice(new);
    package
}

fn new_image() -> Vec<u8> {
    (0..5000).map(|i| (i * 17 + 9) as u8).collect()
}

/// Push a package through the framing layer into the engine, byte-exact:
/// every frame is encoded and re-decoded on the way.
fn stream_package(engine: &mut Engine, package: &[u8]) {
    let mut wire = [0u8; MAX_CHUNK + 64];

    let mut send = |engine: &mut Engine, frame: &Frame| {
        let n = encode_frame(frame, &mut wire).unwrap();
        let (decoded, consumed) = decode_frame(&wire[..n]).unwrap();
        assert_eq!(consumed, n);
        engine.handle_frame(&decoded).unwrap();
    };

    send(
        engine,
        &Frame::Begin {
            total_size: package.len() as u32,
        },
    );
    let mut offset = 0u32;
    for chunk in package.chunks(MAX_CHUNK) {
        send(
            engine,
            &Frame::Data {
                offset,
                bytes: chunk.to_vec(),
            },
        );
        offset += chunk.len() as u32;
    }
    send(
        engine,
        &Frame::End {
            total_size: package.len() as u32,
        },
    );
}

// =============================================================================
// Framing layer
// =============================================================================

#[test]
fn test_frame_round_trip() {
    let frame = Frame::Data {
        offset: 0x1234,
        bytes: vec![1, 2, 3, 4, 5],
    };
    let mut wire = [0u8; 64];
    let n = encode_frame(&frame, &mut wire).unwrap();

    let (decoded, consumed) = decode_frame(&wire[..n]).unwrap();
    assert_eq!(consumed, n);
    match decoded {
        Frame::Data { offset, bytes } => {
            assert_eq!(offset, 0x1234);
            assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
        }
        other => panic!("wrong frame: {:?}", other),
    }
}

#[test]
fn test_corrupted_frame_rejected() {
    let frame = Frame::Begin { total_size: 4096 };
    let mut wire = [0u8; 64];
    let n = encode_frame(&frame, &mut wire).unwrap();

    wire[3] ^= 0x40;
    assert!(matches!(
        decode_frame(&wire[..n]),
        Err(FrameError::BadCrc { .. })
    ));
}

#[test]
fn test_truncated_frame_rejected() {
    let frame = Frame::End { total_size: 4096 };
    let mut wire = [0u8; 64];
    let n = encode_frame(&frame, &mut wire).unwrap();

    assert_eq!(decode_frame(&wire[..n - 1]), Err(FrameError::Truncated));
    assert_eq!(decode_frame(&wire[..1]), Err(FrameError::Truncated));
}

// =============================================================================
// Receiver
// =============================================================================

#[test]
fn test_receiver_happy_path() {
    let mut backup = MemPartition::new(4096);
    let mut rx = Receiver::new();

    assert_eq!(
        rx.handle(&mut backup, &Frame::Begin { total_size: 6 }),
        Ok(RxEvent::Started { total: 6 })
    );
    assert_eq!(
        rx.handle(
            &mut backup,
            &Frame::Data {
                offset: 0,
                bytes: vec![0xAA, 0xBB, 0xCC],
            }
        ),
        Ok(RxEvent::Chunk { cursor: 3 })
    );
    assert_eq!(
        rx.handle(
            &mut backup,
            &Frame::Data {
                offset: 3,
                bytes: vec![0xDD, 0xEE, 0xFF],
            }
        ),
        Ok(RxEvent::Chunk { cursor: 6 })
    );
    assert_eq!(
        rx.handle(&mut backup, &Frame::End { total_size: 6 }),
        Ok(RxEvent::Complete { total: 6 })
    );
    assert_eq!(&backup.contents()[..6], &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
}

#[test]
fn test_receiver_rejects_data_before_begin() {
    let mut backup = MemPartition::new(4096);
    let mut rx = Receiver::new();
    assert_eq!(
        rx.handle(
            &mut backup,
            &Frame::Data {
                offset: 0,
                bytes: vec![1],
            }
        ),
        Err(DownloadError::BadState)
    );
}

#[test]
fn test_receiver_rejects_non_sequential_offset() {
    let mut backup = MemPartition::new(4096);
    let mut rx = Receiver::new();
    rx.handle(&mut backup, &Frame::Begin { total_size: 8 })
        .unwrap();
    assert_eq!(
        rx.handle(
            &mut backup,
            &Frame::Data {
                offset: 4,
                bytes: vec![1, 2],
            }
        ),
        Err(DownloadError::NonSequential { expect: 0, got: 4 })
    );
}

#[test]
fn test_receiver_rejects_overrun() {
    let mut backup = MemPartition::new(4096);
    let mut rx = Receiver::new();
    rx.handle(&mut backup, &Frame::Begin { total_size: 4 })
        .unwrap();
    assert_eq!(
        rx.handle(
            &mut backup,
            &Frame::Data {
                offset: 0,
                bytes: vec![0; 8],
            }
        ),
        Err(DownloadError::Overflow)
    );
}

#[test]
fn test_receiver_rejects_short_transfer() {
    let mut backup = MemPartition::new(4096);
    let mut rx = Receiver::new();
    rx.handle(&mut backup, &Frame::Begin { total_size: 8 })
        .unwrap();
    rx.handle(
        &mut backup,
        &Frame::Data {
            offset: 0,
            bytes: vec![0; 4],
        },
    )
    .unwrap();
    assert_eq!(
        rx.handle(&mut backup, &Frame::End { total_size: 8 }),
        Err(DownloadError::LengthMismatch { expect: 8, got: 4 })
    );
}

#[test]
fn test_receiver_rejects_transfer_larger_than_backup() {
    let mut backup = MemPartition::new(1024);
    let mut rx = Receiver::new();
    assert_eq!(
        rx.handle(&mut backup, &Frame::Begin { total_size: 2048 }),
        Err(DownloadError::Overflow)
    );
}

// =============================================================================
// Precheck and arming
// =============================================================================

#[test]
fn test_download_precheck_arms_verify() {
    let old: Vec<u8> = (0..4096).map(|i| (i * 3) as u8).collect();
    let new = new_image();
    let package = full_image_package(&new);

    let mut engine = make_engine(&old);
    stream_package(&mut engine, &package);
    engine.finish_download().unwrap();

    let record = engine.record().unwrap();
    assert_eq!(record.step(), Some(Step::Verify));

    // and the armed update actually runs to success
    let mut status = engine.poll();
    while status == Status::Busy {
        status = engine.poll();
    }
    assert_eq!(status, Status::Done);
    let runapp = engine.regions().runapp.contents();
    assert_eq!(&runapp[..new.len()], &new[..]);
}

#[test]
fn test_precheck_rejects_corrupted_body() {
    let old: Vec<u8> = (0..4096).map(|i| (i * 3) as u8).collect();
    let mut package = full_image_package(&new_image());
    let last = package.len() - 1;
    package[last] ^= 0x01;

    let mut engine = make_engine(&old);
    stream_package(&mut engine, &package);
    assert_eq!(engine.finish_download(), Err(PrecheckError::BodyHash));

    // Not armed: the step is untouched.
    let record = engine.record().unwrap();
    assert_eq!(record.step(), Some(Step::Finish));
}

#[test]
fn test_precheck_rejects_unmatched_old_image() {
    let old: Vec<u8> = (0..4096).map(|i| (i * 3) as u8).collect();
    let new = new_image();

    // Descriptor demands a runapp this device never ran.
    let descriptor = PatchDescriptor {
        patch_type: 0x0000_0001,
        patch_size: new.len() as u32,
        patch_hash: crc32(&new, CRC_INIT),
        old_size: 4096,
        old_hash: 0xDEAD_BEEF,
        new_size: new.len() as u32,
        new_hash: crc32(&new, CRC_INIT),
        ..Default::default()
    };
    let mut header = PackageHeader::from_descriptors(&[descriptor]).unwrap();
    header.remain_size = new.len() as u32;
    header.remain_hash = crc32(&new, CRC_INIT);

    let mut buf = [0u8; 1024];
    let header_len = header.encode_into(&mut buf);
    let mut package = buf[..header_len].to_vec();
    package.extend_from_slice(&new);

    let mut engine = make_engine(&old);
    stream_package(&mut engine, &package);
    assert_eq!(engine.finish_download(), Err(PrecheckError::NoDescriptor));
}

#[test]
fn test_precheck_rejects_oversized_header() {
    let old: Vec<u8> = (0..4096).map(|i| (i * 3) as u8).collect();
    let mut package = vec![0u8; 128];
    package[..4].copy_from_slice(&2048u32.to_le_bytes());

    let mut engine = make_engine(&old);
    stream_package(&mut engine, &package);
    assert_eq!(
        engine.finish_download(),
        Err(PrecheckError::Header(HeaderError::TooLarge { size: 2048 }))
    );
}
