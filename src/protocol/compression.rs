//! Header-block compression boundary.
//!
//! Each connection gets its own compressor/decompressor pair from a
//! [`CompressionFactory`]. The codec itself lives behind these traits; the
//! crate only ships an identity codec.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::Result;

// ============================================================================
// Traits
// ============================================================================

/// Compresses outgoing header blocks.
pub trait Compressor: Send {
    /// Appends the compressed form of `input` to `output`.
    fn compress(&mut self, input: &[u8], output: &mut Vec<u8>);
}

/// Decompresses incoming header blocks.
pub trait Decompressor: Send {
    /// Appends the decompressed form of `input` to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Protocol`] if the block is corrupt.
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()>;
}

/// Produces a compressor/decompressor pair per connection.
pub trait CompressionFactory: Send + Sync + fmt::Debug {
    /// Creates the compressor used by the frame generator.
    fn new_compressor(&self) -> Box<dyn Compressor>;

    /// Creates the decompressor used by the frame parser.
    fn new_decompressor(&self) -> Box<dyn Decompressor>;
}

// ============================================================================
// Identity codec
// ============================================================================

/// Pass-through codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCompressionFactory;

struct Identity;

impl Compressor for Identity {
    fn compress(&mut self, input: &[u8], output: &mut Vec<u8>) {
        output.extend_from_slice(input);
    }
}

impl Decompressor for Identity {
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        output.extend_from_slice(input);
        Ok(())
    }
}

impl CompressionFactory for IdentityCompressionFactory {
    fn new_compressor(&self) -> Box<dyn Compressor> {
        Box::new(Identity)
    }

    fn new_decompressor(&self) -> Box<dyn Decompressor> {
        Box::new(Identity)
    }
}

// ============================================================================
// Tests
// ============================================================================
