//! Property-based tests for the frame parser.
//!
//! Verifies that delivery does not depend on how the byte stream is split
//! across reads, and that arbitrary input never panics.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use spdy_client::Version;
use spdy_client::protocol::{
    CompressionFactory, Frame, FrameListener, Generator, IdentityCompressionFactory, Parser,
    Setting,
};
use spdy_client::transport::BufferPool;

#[derive(Default)]
struct Recorder(Mutex<Vec<Frame>>);

impl FrameListener for Recorder {
    fn on_frame(&self, _version: Option<Version>, frame: Frame) {
        self.0.lock().push(frame);
    }
}

// Strategy for protocol versions
fn version_strategy() -> impl Strategy<Value = Version> {
    prop_oneof![Just(Version::V2), Just(Version::V3)]
}

// Strategy for frames that survive a trip through either version
fn frame_strategy(version: Version) -> impl Strategy<Value = Frame> {
    let stream_id = 0u32..=0x7fff_ffff;
    let setting = (0u32..=0x00ff_ffff, any::<u8>(), any::<u32>())
        .prop_map(|(id, flags, value)| Setting { id, flags, value });

    prop_oneof![
        any::<u32>().prop_map(|id| Frame::Ping { id }),
        (stream_id.clone(), any::<u32>()).prop_map(move |(last_good_stream_id, status)| {
            Frame::GoAway {
                last_good_stream_id,
                status: if version == Version::V3 { status } else { 0 },
            }
        }),
        (any::<bool>(), prop::collection::vec(setting, 0..6))
            .prop_map(|(clear, entries)| Frame::Settings { clear, entries }),
        (stream_id.clone(), 0u32..=0x7fff_ffff)
            .prop_map(|(stream_id, delta)| Frame::WindowUpdate { stream_id, delta }),
        (stream_id.clone(), prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(stream_id, block)| Frame::Headers { stream_id, block }),
        (stream_id, any::<u8>(), prop::collection::vec(any::<u8>(), 0..128)).prop_map(
            |(stream_id, flags, data)| Frame::Data {
                stream_id,
                flags,
                data,
            }
        ),
    ]
}

// Strategy for a version plus a frame sequence valid for it
fn stream_strategy() -> impl Strategy<Value = (Version, Vec<Frame>)> {
    version_strategy().prop_flat_map(|version| {
        (
            Just(version),
            prop::collection::vec(frame_strategy(version), 1..8),
        )
    })
}

fn encode(version: Version, frames: &[Frame]) -> Vec<u8> {
    let mut generator = Generator::new(
        Arc::new(BufferPool::default()),
        IdentityCompressionFactory.new_compressor(),
    );
    frames
        .iter()
        .flat_map(|frame| generator.generate(version, frame).unwrap())
        .collect()
}

fn parser() -> (Parser, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let mut parser = Parser::new(IdentityCompressionFactory.new_decompressor());
    parser.add_listener(recorder.clone());
    (parser, recorder)
}

#[test]
fn prop_chunking_does_not_change_delivery() {
    proptest!(|((version, frames) in stream_strategy(), chunk in 1usize..32)| {
        let bytes = encode(version, &frames);

        let (mut parser, recorder) = parser();
        let mut delivered = 0;
        for piece in bytes.chunks(chunk) {
            delivered += parser.parse(piece).unwrap();
        }

        prop_assert_eq!(delivered, frames.len());
        prop_assert_eq!(parser.pending_len(), 0);
        prop_assert_eq!(&*recorder.0.lock(), &frames);
    });
}

#[test]
fn prop_truncated_stream_keeps_remainder_pending() {
    proptest!(|((version, frames) in stream_strategy(), cut in 1usize..8)| {
        let bytes = encode(version, &frames);
        let cut = cut.min(bytes.len());

        let (mut parser, recorder) = parser();
        parser.parse(&bytes[..bytes.len() - cut]).unwrap();

        prop_assert!(recorder.0.lock().len() < frames.len());
        prop_assert!(parser.pending_len() > 0);
    });
}

#[test]
fn prop_arbitrary_input_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        let (mut parser, _recorder) = parser();
        let _ = parser.parse(&bytes);
    });
}
