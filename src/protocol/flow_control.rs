//! Flow-control strategy selection.
//!
//! A strategy is a stateless policy selected once per client from the
//! protocol version. Window arithmetic stays inside the session; the strategy
//! only decides how the session window reacts to the peer's settings.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use super::version::Version;

// ============================================================================
// FlowControlKind
// ============================================================================

/// Discriminates the built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowControlKind {
    /// No flow control (SPDY/2).
    None,
    /// Window-based flow control (SPDY/3).
    SpdyV3,
}

// ============================================================================
// FlowControlStrategy
// ============================================================================

/// Policy object applied by a session to its flow-control window.
pub trait FlowControlStrategy: Send + Sync + fmt::Debug {
    /// Identifies the strategy.
    fn kind(&self) -> FlowControlKind;

    /// Returns the session window after the peer announced a new initial
    /// window size.
    fn initial_window_size_changed(&self, current: i32, announced: i32) -> i32;

    /// Returns `true` if `WINDOW_UPDATE` frames are meaningful.
    fn is_flow_controlled(&self) -> bool;
}

/// SPDY/2 strategy: windows are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFlowControlStrategy;

impl FlowControlStrategy for NoFlowControlStrategy {
    fn kind(&self) -> FlowControlKind {
        FlowControlKind::None
    }

    fn initial_window_size_changed(&self, current: i32, _announced: i32) -> i32 {
        current
    }

    fn is_flow_controlled(&self) -> bool {
        false
    }
}

/// SPDY/3 strategy: the announced initial window replaces the session window.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpdyV3FlowControlStrategy;

impl FlowControlStrategy for SpdyV3FlowControlStrategy {
    fn kind(&self) -> FlowControlKind {
        FlowControlKind::SpdyV3
    }

    fn initial_window_size_changed(&self, _current: i32, announced: i32) -> i32 {
        announced
    }

    fn is_flow_controlled(&self) -> bool {
        true
    }
}

static NO_FLOW_CONTROL: NoFlowControlStrategy = NoFlowControlStrategy;
static SPDY_V3_FLOW_CONTROL: SpdyV3FlowControlStrategy = SpdyV3FlowControlStrategy;

/// Maps a protocol version to its shared flow-control strategy.
#[must_use]
pub fn new_flow_control_strategy(version: Version) -> &'static dyn FlowControlStrategy {
    match version {
        Version::V2 => &NO_FLOW_CONTROL,
        Version::V3 => &SPDY_V3_FLOW_CONTROL,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mapping() {
        assert_eq!(
            new_flow_control_strategy(Version::V2).kind(),
            FlowControlKind::None
        );
        assert_eq!(
            new_flow_control_strategy(Version::V3).kind(),
            FlowControlKind::SpdyV3
        );
    }

    #[test]
    fn test_strategies_are_shared() {
        let a = new_flow_control_strategy(Version::V3);
        let b = new_flow_control_strategy(Version::V3);
        assert!(std::ptr::addr_eq(a, b));
    }

    #[test]
    fn test_window_reaction() {
        let v2 = new_flow_control_strategy(Version::V2);
        let v3 = new_flow_control_strategy(Version::V3);
        assert_eq!(v2.initial_window_size_changed(65536, 1024), 65536);
        assert_eq!(v3.initial_window_size_changed(65536, 1024), 1024);
        assert!(!v2.is_flow_controlled());
        assert!(v3.is_flow_controlled());
    }
}
