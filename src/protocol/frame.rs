//! Control frame types carried by the lifecycle layer.
//!
//! Only the frames a session needs to be established, kept alive and retired
//! are decoded. Everything else is surfaced as [`Frame::Unknown`] or
//! [`Frame::Data`] with its raw payload.
//!
//! # Control frame header
//!
//! ```text
//! +----------------------------------+
//! |C| Version(15bits) | Type(16bits) |
//! +----------------------------------+
//! | Flags (8)  |  Length (24 bits)   |
//! +----------------------------------+
//! ```

// ============================================================================
// Constants
// ============================================================================

/// Size of every frame header.
pub const HEADER_SIZE: usize = 8;

/// Largest payload representable in the 24-bit length field.
pub const MAX_FRAME_LENGTH: usize = 0x00ff_ffff;

/// SETTINGS identifier for the initial window size.
pub const SETTINGS_INITIAL_WINDOW_SIZE: u32 = 7;

/// SETTINGS frame flag: clear previously persisted settings.
pub const FLAG_SETTINGS_CLEAR: u8 = 0x01;

/// Control frame type codes.
pub mod frame_type {
    /// SYN_REPLY.
    pub const SYN_REPLY: u16 = 2;
    /// SETTINGS.
    pub const SETTINGS: u16 = 4;
    /// PING.
    pub const PING: u16 = 6;
    /// GOAWAY.
    pub const GO_AWAY: u16 = 7;
    /// HEADERS.
    pub const HEADERS: u16 = 8;
    /// WINDOW_UPDATE.
    pub const WINDOW_UPDATE: u16 = 9;
}

// ============================================================================
// Setting
// ============================================================================

/// One SETTINGS entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    /// Setting identifier (24 bits).
    pub id: u32,
    /// Per-entry flags.
    pub flags: u8,
    /// Setting value.
    pub value: u32,
}

// ============================================================================
// Frame
// ============================================================================

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// SETTINGS.
    Settings {
        /// Whether the peer asked to clear persisted settings.
        clear: bool,
        /// Entries in wire order.
        entries: Vec<Setting>,
    },

    /// PING.
    Ping {
        /// Ping identifier. Odd IDs are client-initiated.
        id: u32,
    },

    /// GOAWAY.
    GoAway {
        /// Last stream the sender processed.
        last_good_stream_id: u32,
        /// Status code (always 0 for SPDY/2).
        status: u32,
    },

    /// HEADERS or SYN_REPLY, header block already decompressed.
    Headers {
        /// Stream the headers belong to.
        stream_id: u32,
        /// Decompressed header block.
        block: Vec<u8>,
    },

    /// WINDOW_UPDATE.
    WindowUpdate {
        /// Target stream.
        stream_id: u32,
        /// Window increment.
        delta: u32,
    },

    /// Data frame.
    Data {
        /// Target stream.
        stream_id: u32,
        /// Frame flags.
        flags: u8,
        /// Raw payload.
        data: Vec<u8>,
    },

    /// Control frame not handled at this layer.
    Unknown {
        /// Control frame type.
        frame_type: u16,
        /// Frame flags.
        flags: u8,
        /// Raw payload.
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Returns the control frame type, or `None` for data frames.
    #[must_use]
    pub fn frame_type(&self) -> Option<u16> {
        match self {
            Self::Settings { .. } => Some(frame_type::SETTINGS),
            Self::Ping { .. } => Some(frame_type::PING),
            Self::GoAway { .. } => Some(frame_type::GO_AWAY),
            Self::Headers { .. } => Some(frame_type::HEADERS),
            Self::WindowUpdate { .. } => Some(frame_type::WINDOW_UPDATE),
            Self::Data { .. } => None,
            Self::Unknown { frame_type, .. } => Some(*frame_type),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
