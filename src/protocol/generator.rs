//! Frame generator.
//!
//! Serialises outgoing frames into buffers borrowed from the shared
//! [`BufferPool`]. Header blocks pass through the connection's compressor.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::BufferPool;

use super::compression::Compressor;
use super::frame::{FLAG_SETTINGS_CLEAR, Frame, HEADER_SIZE, MAX_FRAME_LENGTH, frame_type};
use super::version::Version;

// ============================================================================
// Generator
// ============================================================================

/// Frame generator bound to one connection.
pub struct Generator {
    /// Shared buffer pool.
    pool: Arc<BufferPool>,
    /// Header-block compressor for this connection.
    compressor: Box<dyn Compressor>,
}

impl Generator {
    /// Creates a generator drawing buffers from `pool`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>, compressor: Box<dyn Compressor>) -> Self {
        Self { pool, compressor }
    }

    /// Returns the buffer pool frames are written into.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Serialises `frame` for `version`.
    ///
    /// The returned buffer belongs to the pool; release it once written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload exceeds the 24-bit length.
    pub fn generate(&mut self, version: Version, frame: &Frame) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        let (prefix, flags) = match frame {
            Frame::Settings { clear, entries } => {
                payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                for entry in entries {
                    let id = entry.id.to_be_bytes();
                    match version {
                        Version::V2 => {
                            payload.extend_from_slice(&[id[3], id[2], id[1], entry.flags]);
                        }
                        Version::V3 => {
                            payload.extend_from_slice(&[entry.flags, id[1], id[2], id[3]]);
                        }
                    }
                    payload.extend_from_slice(&entry.value.to_be_bytes());
                }
                let flags = if *clear { FLAG_SETTINGS_CLEAR } else { 0 };
                (control_prefix(version, frame_type::SETTINGS), flags)
            }
            Frame::Ping { id } => {
                payload.extend_from_slice(&id.to_be_bytes());
                (control_prefix(version, frame_type::PING), 0)
            }
            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                payload.extend_from_slice(&(last_good_stream_id & 0x7fff_ffff).to_be_bytes());
                if version == Version::V3 {
                    payload.extend_from_slice(&status.to_be_bytes());
                }
                (control_prefix(version, frame_type::GO_AWAY), 0)
            }
            Frame::Headers { stream_id, block } => {
                payload.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
                if version == Version::V2 {
                    payload.extend_from_slice(&[0, 0]);
                }
                self.compressor.compress(block, &mut payload);
                (control_prefix(version, frame_type::HEADERS), 0)
            }
            Frame::WindowUpdate { stream_id, delta } => {
                payload.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
                payload.extend_from_slice(&(delta & 0x7fff_ffff).to_be_bytes());
                (control_prefix(version, frame_type::WINDOW_UPDATE), 0)
            }
            Frame::Data {
                stream_id,
                flags,
                data,
            } => {
                payload.extend_from_slice(data);
                ((stream_id & 0x7fff_ffff).to_be_bytes(), *flags)
            }
            Frame::Unknown {
                frame_type,
                flags,
                payload: raw,
            } => {
                payload.extend_from_slice(raw);
                (control_prefix(version, *frame_type), *flags)
            }
        };

        if payload.len() > MAX_FRAME_LENGTH {
            return Err(Error::protocol(format!(
                "Frame payload too large: {} bytes",
                payload.len()
            )));
        }

        let mut buffer = self.pool.acquire(HEADER_SIZE + payload.len());
        buffer.extend_from_slice(&prefix);
        let length = (payload.len() as u32).to_be_bytes();
        buffer.extend_from_slice(&[flags, length[1], length[2], length[3]]);
        buffer.extend_from_slice(&payload);

        Ok(buffer)
    }
}

/// First word of a control frame header: control bit, version, type.
fn control_prefix(version: Version, kind: u16) -> [u8; 4] {
    let version = (0x8000 | version.as_u16()).to_be_bytes();
    let kind = kind.to_be_bytes();
    [version[0], version[1], kind[0], kind[1]]
}

// ============================================================================
// Tests
// ============================================================================
