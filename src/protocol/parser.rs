//! Incremental frame parser.
//!
//! Bytes are fed as they arrive from the endpoint; complete frames are
//! decoded and delivered to every registered [`FrameListener`] in arrival
//! order. Partial frames stay buffered until the rest arrives.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};

use super::compression::Decompressor;
use super::frame::{FLAG_SETTINGS_CLEAR, Frame, HEADER_SIZE, Setting, frame_type};
use super::version::Version;

// ============================================================================
// FrameListener
// ============================================================================

/// Receives decoded frames.
pub trait FrameListener: Send + Sync {
    /// Called once per complete frame.
    fn on_frame(&self, version: Option<Version>, frame: Frame);
}

// ============================================================================
// Parser
// ============================================================================

/// Frame parser bound to one connection.
pub struct Parser {
    /// Header-block decompressor for this connection.
    decompressor: Box<dyn Decompressor>,
    /// Frame listeners.
    listeners: Vec<Arc<dyn FrameListener>>,
    /// Bytes of an incomplete frame.
    pending: Vec<u8>,
}

impl Parser {
    /// Creates a parser using `decompressor` for header blocks.
    #[must_use]
    pub fn new(decompressor: Box<dyn Decompressor>) -> Self {
        Self {
            decompressor,
            listeners: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Registers a frame listener.
    pub fn add_listener(&mut self, listener: Arc<dyn FrameListener>) {
        self.listeners.push(listener);
    }

    /// Returns the number of buffered bytes of an incomplete frame.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feeds bytes into the parser.
    ///
    /// Returns the number of frames delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a malformed frame. The connection is
    /// expected to close afterwards; the parser does not resynchronise.
    pub fn parse(&mut self, data: &[u8]) -> Result<usize> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(data);

        let mut offset = 0;
        let mut delivered = 0;

        while pending.len() - offset >= HEADER_SIZE {
            let header = &pending[offset..offset + HEADER_SIZE];
            let length = usize::from(header[5]) << 16
                | usize::from(header[6]) << 8
                | usize::from(header[7]);

            if pending.len() - offset - HEADER_SIZE < length {
                break;
            }

            let start = offset + HEADER_SIZE;
            let (version, frame) = decode(
                self.decompressor.as_mut(),
                header,
                &pending[start..start + length],
            )?;
            offset = start + length;

            trace!(?frame, "Frame parsed");
            for listener in &self.listeners {
                listener.on_frame(version, frame.clone());
            }
            delivered += 1;
        }

        pending.drain(..offset);
        self.pending = pending;
        Ok(delivered)
    }
}

/// Decodes one complete frame.
fn decode(
    decompressor: &mut dyn Decompressor,
    header: &[u8],
    payload: &[u8],
) -> Result<(Option<Version>, Frame)> {
    let flags = header[4];

    if header[0] & 0x80 == 0 {
        let stream_id = read_u32(header, 0) & 0x7fff_ffff;
        return Ok((
            None,
            Frame::Data {
                stream_id,
                flags,
                data: payload.to_vec(),
            },
        ));
    }

    let version = Version::try_from(u16::from_be_bytes([header[0] & 0x7f, header[1]]))
        .map_err(|e| Error::protocol(format!("Bad control frame version: {e}")))?;
    let kind = u16::from_be_bytes([header[2], header[3]]);

    let frame = match kind {
        frame_type::SETTINGS => decode_settings(version, flags, payload)?,
        frame_type::PING => {
            expect_len(kind, payload, 4)?;
            Frame::Ping {
                id: read_u32(payload, 0),
            }
        }
        frame_type::GO_AWAY => {
            let status = match version {
                Version::V2 => {
                    expect_len(kind, payload, 4)?;
                    0
                }
                Version::V3 => {
                    expect_len(kind, payload, 8)?;
                    read_u32(payload, 4)
                }
            };
            Frame::GoAway {
                last_good_stream_id: read_u32(payload, 0) & 0x7fff_ffff,
                status,
            }
        }
        frame_type::SYN_REPLY | frame_type::HEADERS => {
            // SPDY/2 pads the stream ID with two unused bytes
            let block_start = match version {
                Version::V2 => 6,
                Version::V3 => 4,
            };
            if payload.len() < block_start {
                return Err(Error::protocol(format!(
                    "Frame type {kind} too short: {} bytes",
                    payload.len()
                )));
            }
            let mut block = Vec::new();
            decompressor.decompress(&payload[block_start..], &mut block)?;
            Frame::Headers {
                stream_id: read_u32(payload, 0) & 0x7fff_ffff,
                block,
            }
        }
        frame_type::WINDOW_UPDATE => {
            expect_len(kind, payload, 8)?;
            Frame::WindowUpdate {
                stream_id: read_u32(payload, 0) & 0x7fff_ffff,
                delta: read_u32(payload, 4) & 0x7fff_ffff,
            }
        }
        other => Frame::Unknown {
            frame_type: other,
            flags,
            payload: payload.to_vec(),
        },
    };

    Ok((Some(version), frame))
}

// ============================================================================
// Helpers
// ============================================================================

/// Reads a big-endian `u32`. Callers check bounds first.
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn expect_len(kind: u16, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(Error::protocol(format!(
            "Frame type {kind} length {} != {expected}",
            payload.len()
        )));
    }
    Ok(())
}

fn decode_settings(version: Version, flags: u8, payload: &[u8]) -> Result<Frame> {
    if payload.len() < 4 {
        return Err(Error::protocol("SETTINGS frame missing entry count"));
    }
    let count = read_u32(payload, 0) as usize;
    if count.checked_mul(8).and_then(|n| n.checked_add(4)) != Some(payload.len()) {
        return Err(Error::protocol(format!(
            "SETTINGS length {} does not match {count} entries",
            payload.len()
        )));
    }

    let entries = payload[4..]
        .chunks_exact(8)
        .map(|entry| {
            // SPDY/2 stores the 24-bit ID little-endian ahead of the flags
            let (id, entry_flags) = match version {
                Version::V2 => (
                    u32::from_le_bytes([entry[0], entry[1], entry[2], 0]),
                    entry[3],
                ),
                Version::V3 => (
                    u32::from_be_bytes([0, entry[1], entry[2], entry[3]]),
                    entry[0],
                ),
            };
            Setting {
                id,
                flags: entry_flags,
                value: read_u32(entry, 4),
            }
        })
        .collect();

    Ok(Frame::Settings {
        clear: flags & FLAG_SETTINGS_CLEAR != 0,
        entries,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::protocol::compression::{CompressionFactory, IdentityCompressionFactory};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Frame>>);

    impl FrameListener for Recorder {
        fn on_frame(&self, _version: Option<Version>, frame: Frame) {
            self.0.lock().push(frame);
        }
    }

    fn parser_with_recorder() -> (Parser, Arc<Recorder>) {
        let mut parser = Parser::new(IdentityCompressionFactory.new_decompressor());
        let recorder = Arc::new(Recorder::default());
        parser.add_listener(recorder.clone());
        (parser, recorder)
    }

    #[test]
    fn test_parse_ping_v3() {
        let (mut parser, recorder) = parser_with_recorder();
        let bytes = [0x80, 3, 0, 6, 0, 0, 0, 4, 0, 0, 0, 7];
        assert_eq!(parser.parse(&bytes).unwrap(), 1);
        assert_eq!(recorder.0.lock().as_slice(), &[Frame::Ping { id: 7 }]);
    }

    #[test]
    fn test_parse_partial_frame_is_buffered() {
        let (mut parser, recorder) = parser_with_recorder();
        let bytes = [0x80, 3, 0, 7, 0, 0, 0, 8, 0, 0, 0, 5, 0, 0, 0, 1];
        assert_eq!(parser.parse(&bytes[..10]).unwrap(), 0);
        assert_eq!(parser.pending_len(), 10);
        assert_eq!(parser.parse(&bytes[10..]).unwrap(), 1);
        assert_eq!(parser.pending_len(), 0);
        assert_eq!(
            recorder.0.lock().as_slice(),
            &[Frame::GoAway {
                last_good_stream_id: 5,
                status: 1
            }]
        );
    }

    #[test]
    fn test_parse_settings_v2_little_endian_id() {
        let (mut parser, recorder) = parser_with_recorder();
        let bytes = [
            0x80, 2, 0, 4, 0, 0, 0, 12, // header
            0, 0, 0, 1, // count
            7, 0, 0, 0, // id 7 (LE), flags 0
            0, 0, 0x10, 0, // value 4096
        ];
        parser.parse(&bytes).unwrap();
        assert_eq!(
            recorder.0.lock().as_slice(),
            &[Frame::Settings {
                clear: false,
                entries: vec![Setting {
                    id: 7,
                    flags: 0,
                    value: 4096
                }]
            }]
        );
    }

    #[test]
    fn test_parse_data_frame() {
        let (mut parser, recorder) = parser_with_recorder();
        let bytes = [0, 0, 0, 3, 1, 0, 0, 2, b'h', b'i'];
        parser.parse(&bytes).unwrap();
        assert_eq!(
            recorder.0.lock().as_slice(),
            &[Frame::Data {
                stream_id: 3,
                flags: 1,
                data: b"hi".to_vec()
            }]
        );
    }

    #[test]
    fn test_parse_bad_version_fails() {
        let (mut parser, _) = parser_with_recorder();
        let bytes = [0x80, 9, 0, 6, 0, 0, 0, 4, 0, 0, 0, 1];
        let err = parser.parse(&bytes).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_bad_ping_length_fails() {
        let (mut parser, _) = parser_with_recorder();
        let bytes = [0x80, 3, 0, 6, 0, 0, 0, 2, 0, 1];
        assert!(parser.parse(&bytes).is_err());
    }
}
