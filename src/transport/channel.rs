//! Closeable handle to a socket channel.
//!
//! The socket itself is owned by whichever task is driving it (the connect
//! future, then the connection loop). Everyone else holds a [`Channel`] and
//! can request closure; the owning task observes it through
//! [`Channel::closed`] and drops the socket.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::identifiers::ChannelId;

// ============================================================================
// Channel
// ============================================================================

/// Shared close handle for one socket.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    /// Channel identifier.
    id: ChannelId,
    /// Remote address the channel connects to.
    peer: SocketAddr,
    /// Close flag, observed by the owning task.
    closed: watch::Sender<bool>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Channel {
    /// Creates an open channel towards `peer`.
    #[must_use]
    pub fn new(peer: SocketAddr) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ChannelInner {
                id: ChannelId::next(),
                peer,
                closed,
            }),
        }
    }

    /// Returns the channel identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Returns `true` until the channel is closed.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !*self.inner.closed.borrow()
    }

    /// Requests closure.
    ///
    /// Returns `true` if this call closed the channel, `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        self.inner.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
