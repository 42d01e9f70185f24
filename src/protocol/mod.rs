//! SPDY protocol collaborators.
//!
//! This module holds the pieces a session is assembled from. They stop at
//! the lifecycle boundary: control-frame codec, header-block compression
//! hooks and flow-control policy.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `version` | Protocol versions and negotiation names |
//! | `flow_control` | Version-keyed flow-control strategies |
//! | `frame` | Control frame types |
//! | `parser` | Incremental frame parser |
//! | `generator` | Frame serialisation |
//! | `compression` | Compressor/decompressor factory boundary |

// ============================================================================
// Submodules
// ============================================================================

/// Header-block compression boundary.
pub mod compression;

/// Flow-control strategy selection.
pub mod flow_control;

/// Control frame types.
pub mod frame;

/// Frame serialisation.
pub mod generator;

/// Incremental frame parser.
pub mod parser;

/// Protocol versions.
pub mod version;

// ============================================================================
// Re-exports
// ============================================================================

pub use compression::{CompressionFactory, Compressor, Decompressor, IdentityCompressionFactory};
pub use flow_control::{
    FlowControlKind, FlowControlStrategy, NoFlowControlStrategy, SpdyV3FlowControlStrategy,
    new_flow_control_strategy,
};
pub use frame::{Frame, Setting};
pub use generator::Generator;
pub use parser::{FrameListener, Parser};
pub use version::Version;
