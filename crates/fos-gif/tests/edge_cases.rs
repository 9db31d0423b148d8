//! Edge case tests for fos-gif
//!
//! Whole-stream decoding through the public API.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use fos_gif::encoder::{FrameSpec, GifEncoder};
use fos_gif::*;

const RED: u32 = 0xFFFF_0000;
const GREEN: u32 = 0xFF00_FF00;
const BLUE: u32 = 0xFF00_00FF;
const BLACK: u32 = OPAQUE_BLACK;

fn palette() -> Vec<[u8; 3]> {
    vec![[0, 0, 0], [255, 0, 0], [0, 255, 0], [0, 0, 255]]
}

fn open(bytes: Vec<u8>) -> GifStream<Cursor<Vec<u8>>> {
    decode(Cursor::new(bytes), DecodeOptions::default()).unwrap()
}

/// Drain up to `limit` frames, returning their pixels
fn drain(stream: &mut GifStream<Cursor<Vec<u8>>>, limit: usize) -> Vec<Vec<u32>> {
    let mut out = Vec::new();
    while out.len() < limit {
        match stream.next_frame().unwrap() {
            Step::Frame(frame) => out.push(frame.bitmap.pixels().to_vec()),
            Step::Finished | Step::Canceled => break,
        }
    }
    out
}

// ============================================================================
// HEADER TESTS
// ============================================================================

#[test]
fn test_gif87a_accepted() {
    let mut bytes = GifEncoder::new(1, 1, palette()).frame(FrameSpec::solid(1, 1, 3)).encode();
    bytes[3..6].copy_from_slice(b"87a");
    let mut stream = open(bytes);
    assert_eq!(drain(&mut stream, 4), vec![vec![BLUE]]);
}

#[test]
fn test_screen_descriptor_exposed() {
    let stream = open(GifEncoder::new(7, 3, palette()).background(2).frame(FrameSpec::solid(7, 3, 1)).encode());
    let screen = stream.screen();
    assert_eq!((screen.width, screen.height), (7, 3));
    assert_eq!(screen.background_index, 2);
    assert!(screen.has_global_table());
    assert_eq!(screen.global_table_len(), 4);
    assert_eq!(stream.frame_count(), None);
    assert_eq!(stream.loop_count(), None);
}

#[test]
fn test_header_cut_short() {
    let bytes = GifEncoder::new(1, 1, palette()).frame(FrameSpec::solid(1, 1, 1)).encode();
    let err = decode(Cursor::new(bytes[..9].to_vec()), DecodeOptions::default()).err();
    assert!(matches!(err, Some(GifError::Truncated { frames: 0 })));

    // Palette cut short
    let err = decode(Cursor::new(bytes[..15].to_vec()), DecodeOptions::default()).err();
    assert!(matches!(err, Some(GifError::Truncated { frames: 0 })));
}

#[test]
fn test_empty_screen_rejected() {
    let bytes = GifEncoder::new(0, 4, palette()).encode();
    let err = decode(Cursor::new(bytes), DecodeOptions::default()).err();
    assert!(matches!(err, Some(GifError::Malformed(_))));
}

// ============================================================================
// FRAME SEQUENCE TESTS
// ============================================================================

#[test]
fn test_truncated_image_data_after_full_frames() {
    let full = GifEncoder::new(4, 4, palette())
        .frame(FrameSpec::solid(4, 4, 1))
        .frame(FrameSpec::solid(4, 4, 2))
        .frame(FrameSpec::solid(4, 4, 3))
        .encode();
    // Drop the trailer and the tail of the third frame's image data
    let cut = full[..full.len() - 4].to_vec();
    let mut stream = open(cut);
    let frames = drain(&mut stream, 10);
    assert_eq!(frames.len(), 2);
    assert_eq!(stream.frame_count(), Some(2));
}

#[test]
fn test_truncated_first_frame() {
    let full = GifEncoder::new(4, 4, palette()).frame(FrameSpec::solid(4, 4, 1)).encode();
    let mut stream = open(full[..full.len() - 4].to_vec());
    assert!(matches!(stream.next_frame(), Err(GifError::Truncated { frames: 0 })));
    assert!(matches!(stream.next_frame().unwrap(), Step::Finished));
}

#[test]
fn test_frame_clipped_to_screen() {
    let bytes = GifEncoder::new(2, 2, palette())
        .frame(FrameSpec::solid(2, 2, 1))
        .frame(FrameSpec::at(1, 1, 3, 3, vec![3; 9]))
        .encode();
    let mut stream = open(bytes);
    let frames = drain(&mut stream, 10);
    assert_eq!(frames[1], vec![RED, RED, RED, BLUE]);
}

#[test]
fn test_full_frame_replaces_canvas() {
    let bytes = GifEncoder::new(2, 2, palette())
        .frame(FrameSpec::solid(2, 2, 1))
        .frame(FrameSpec::solid(2, 2, 3))
        .encode();
    let mut stream = open(bytes);
    let frames = drain(&mut stream, 10);
    assert_eq!(frames, vec![vec![RED; 4], vec![BLUE; 4]]);
}

#[test]
fn test_frame_metadata() {
    let bytes = GifEncoder::new(1, 1, palette())
        .frame(FrameSpec::solid(1, 1, 1).delay(7).disposal(1))
        .frame(FrameSpec::solid(1, 1, 2).delay(1))
        .encode();
    let mut stream = open(bytes);

    let Step::Frame(first) = stream.next_frame().unwrap() else { panic!("expected frame") };
    assert_eq!(first.index, 0);
    assert_eq!(first.delay.as_millis(), 70);
    assert_eq!(first.disposal, Disposal::DoNotDispose);

    let Step::Frame(second) = stream.next_frame().unwrap() else { panic!("expected frame") };
    assert_eq!(second.index, 1);
    assert_eq!(second.delay.as_millis(), MIN_FRAME_DELAY_MS as u128);
    assert_eq!(second.disposal, Disposal::Unspecified);
}

#[test]
fn test_unused_palette_slots_are_opaque_black() {
    // Two-entry palette, index 3 falls outside it
    let bytes = GifEncoder::new(1, 1, vec![[255, 0, 0], [0, 255, 0]])
        .frame(FrameSpec::solid(1, 1, 3))
        .encode();
    let mut stream = open(bytes);
    assert_eq!(drain(&mut stream, 1), vec![vec![BLACK]]);
}

// ============================================================================
// DISPOSAL TESTS
// ============================================================================

#[test]
fn test_restore_background_when_background_is_transparent() {
    // Background index equals the frame's transparent index: the region is kept
    let bytes = GifEncoder::new(2, 1, palette())
        .background(0)
        .frame(FrameSpec::solid(2, 1, 1).transparent(0).disposal(2))
        .frame(FrameSpec::at(1, 0, 1, 1, vec![2]))
        .encode();
    let mut stream = open(bytes);
    let frames = drain(&mut stream, 10);
    assert_eq!(frames[1], vec![RED, GREEN]);
}

#[test]
fn test_do_not_dispose_accumulates() {
    let bytes = GifEncoder::new(3, 1, palette())
        .frame(FrameSpec::at(0, 0, 1, 1, vec![1]).disposal(1))
        .frame(FrameSpec::at(1, 0, 1, 1, vec![2]).disposal(1))
        .frame(FrameSpec::at(2, 0, 1, 1, vec![3]))
        .encode();
    let mut stream = open(bytes);
    let frames = drain(&mut stream, 10);
    assert_eq!(frames[2], vec![RED, GREEN, BLUE]);
}

// ============================================================================
// LOOPING TESTS
// ============================================================================

#[test]
fn test_animexts_signature() {
    let mut bytes = GifEncoder::new(1, 1, palette())
        .looping(0)
        .frame(FrameSpec::solid(1, 1, 1))
        .frame(FrameSpec::solid(1, 1, 2))
        .encode();
    let at = bytes.windows(11).position(|w| w == b"NETSCAPE2.0").unwrap();
    bytes[at..at + 11].copy_from_slice(b"ANIMEXTS1.0");
    let mut stream = open(bytes);
    assert_eq!(drain(&mut stream, 6).len(), 6);
    assert_eq!(stream.loop_count(), Some(0));
}

#[test]
fn test_unknown_application_extension_ignored() {
    let mut bytes = GifEncoder::new(1, 1, palette())
        .looping(0)
        .frame(FrameSpec::solid(1, 1, 1))
        .frame(FrameSpec::solid(1, 1, 2))
        .encode();
    let at = bytes.windows(11).position(|w| w == b"NETSCAPE2.0").unwrap();
    bytes[at..at + 11].copy_from_slice(b"XMP DataXMP");
    let mut stream = open(bytes);
    assert_eq!(drain(&mut stream, 10).len(), 2);
    assert_eq!(stream.loop_count(), None);
}

#[test]
fn test_single_frame_never_restarts() {
    let bytes = GifEncoder::new(1, 1, palette()).looping(0).frame(FrameSpec::solid(1, 1, 1)).encode();
    let mut stream = open(bytes);
    assert_eq!(drain(&mut stream, 10).len(), 1);
    assert_eq!(stream.frame_count(), Some(1));
}

#[test]
fn test_restart_keeps_disposed_canvas() {
    // The second pass starts from what the last frame's disposal left behind
    let bytes = GifEncoder::new(2, 1, palette())
        .looping(2)
        .frame(FrameSpec::at(0, 0, 1, 1, vec![1]))
        .frame(FrameSpec::at(1, 0, 1, 1, vec![2]).disposal(2))
        .encode();
    let mut stream = open(bytes);
    let frames = drain(&mut stream, 10);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[1], vec![RED, GREEN]);
    assert_eq!(frames[2], vec![RED, BLACK]);
}

// ============================================================================
// SESSION TESTS
// ============================================================================

#[test]
fn test_cancel_before_first_frame() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let bytes = GifEncoder::new(1, 1, palette()).frame(FrameSpec::solid(1, 1, 1)).encode();
    let mut stream = decode(Cursor::new(bytes), DecodeOptions::default().with_cancel(cancel)).unwrap();
    assert!(matches!(stream.next_frame().unwrap(), Step::Canceled));
}

#[test]
fn test_shared_scratch_pool_recycles() {
    let scratch = Arc::new(ScratchPool::new());
    let bytes = GifEncoder::new(4, 4, palette()).frame(FrameSpec::solid(4, 4, 2)).encode();
    for _ in 0..3 {
        let options = DecodeOptions::default().with_scratch(scratch.clone());
        let mut stream = decode(Cursor::new(bytes.clone()), options).unwrap();
        assert_eq!(drain(&mut stream, 4).len(), 1);
    }
    // Read window and index row
    assert_eq!(scratch.available(), 2);
}

struct Recycler {
    free: Mutex<Vec<Vec<u32>>>,
    acquired: Mutex<usize>,
}

impl PixelAllocator for Recycler {
    fn acquire(&self, _width: u32, _height: u32) -> Option<Vec<u32>> {
        let buf = self.free.lock().unwrap().pop();
        if buf.is_some() {
            *self.acquired.lock().unwrap() += 1;
        }
        buf
    }

    fn release(&self, _width: u32, _height: u32, pixels: Vec<u32>) {
        self.free.lock().unwrap().push(pixels);
    }
}

#[test]
fn test_allocator_buffers_reused_across_sessions() {
    let recycler = Arc::new(Recycler { free: Mutex::new(Vec::new()), acquired: Mutex::new(0) });
    let bytes = GifEncoder::new(3, 3, palette()).frame(FrameSpec::solid(3, 3, 1)).encode();

    for _ in 0..2 {
        let options = DecodeOptions::default().with_allocator(recycler.clone());
        let mut stream = decode(Cursor::new(bytes.clone()), options).unwrap();
        assert_eq!(drain(&mut stream, 2), vec![vec![RED; 9]]);
    }
    assert_eq!(*recycler.acquired.lock().unwrap(), 2);
    assert_eq!(recycler.free.lock().unwrap().len(), 2);
}

#[test]
fn test_large_frame_roundtrip() {
    let (w, h) = (120u16, 90u16);
    let indices: Vec<u8> = (0..w as usize * h as usize).map(|i| ((i / 7 + i % 5) % 4) as u8).collect();
    let bytes = GifEncoder::new(w, h, palette()).frame(FrameSpec::at(0, 0, w, h, indices.clone())).encode();
    let mut stream = open(bytes);
    let frames = drain(&mut stream, 2);
    let colors = [BLACK, RED, GREEN, BLUE];
    let expected: Vec<u32> = indices.iter().map(|&i| colors[i as usize]).collect();
    assert_eq!(frames, vec![expected]);
}
