//! Connection promise.
//!
//! A [`SessionPromise`] is returned by `Client::connect` before the socket
//! has connected. It leaves `Pending` exactly once:
//!
//! ```text
//!            ┌──► Completed(Session)
//! Pending ───┼──► Failed(Error)
//!            └──► Cancelled
//! ```
//!
//! Results can be observed through a callback, by awaiting the promise, or
//! by blocking a non-async thread.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::client::config::saturating_millis;
use crate::client::handle::Client;
use crate::error::{Error, Result};
use crate::session::{Session, SessionFrameListener};
use crate::transport::channel::Channel;

// ============================================================================
// Types
// ============================================================================

/// Completion callback.
type Callback = Box<dyn FnOnce(Result<Session>) + Send>;

/// Terminal outcome.
#[derive(Clone)]
enum Outcome {
    Completed(Session),
    Failed(Arc<Error>),
    Cancelled,
}

impl Outcome {
    /// Result as delivered to observers.
    fn into_result(self) -> Result<Session> {
        match self {
            Self::Completed(session) => Ok(session),
            Self::Failed(error) => Err(Error::ConnectFailed(error)),
            Self::Cancelled => Err(Error::Cancelled),
        }
    }
}

struct Slot {
    /// `None` while pending.
    outcome: Option<Outcome>,
    callbacks: Vec<Callback>,
}

// ============================================================================
// SessionPromise
// ============================================================================

/// Pending result of `Client::connect`.
///
/// Cloning shares the same promise.
#[derive(Clone)]
pub struct SessionPromise {
    inner: Arc<PromiseInner>,
}

struct PromiseInner {
    channel: Channel,
    client: Client,
    listener: Arc<dyn SessionFrameListener>,
    slot: Mutex<Slot>,
    /// Flips to `true` once the outcome is set; observed by `wait`.
    done: watch::Sender<bool>,
}

impl fmt::Debug for SessionPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.slot.lock().outcome {
            None => "pending",
            Some(Outcome::Completed(_)) => "completed",
            Some(Outcome::Failed(_)) => "failed",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("SessionPromise")
            .field("channel", &self.inner.channel.id())
            .field("state", &state)
            .finish()
    }
}

// ============================================================================
// SessionPromise - Constructor
// ============================================================================

impl SessionPromise {
    pub(crate) fn new(
        channel: Channel,
        client: Client,
        listener: Arc<dyn SessionFrameListener>,
    ) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                channel,
                client,
                listener,
                slot: Mutex::new(Slot {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                done: watch::Sender::new(false),
            }),
        }
    }
}

// ============================================================================
// SessionPromise - Accessors
// ============================================================================

impl SessionPromise {
    /// Returns the channel being connected.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Returns the client that started the connect.
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Returns the listener the session will be built with.
    #[inline]
    #[must_use]
    pub fn listener(&self) -> Arc<dyn SessionFrameListener> {
        Arc::clone(&self.inner.listener)
    }

    /// Returns `true` once the promise has left `Pending`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.slot.lock().outcome.is_some()
    }

    /// Returns `true` if the promise was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.slot.lock().outcome, Some(Outcome::Cancelled))
    }

    /// Returns the outcome, or `None` while pending.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<Session>> {
        self.inner.slot.lock().outcome.clone().map(Outcome::into_result)
    }
}

// ============================================================================
// SessionPromise - Transitions
// ============================================================================

impl SessionPromise {
    /// Completes with `session`. Returns `false` if already terminal.
    pub(crate) fn completed(&self, session: Session) -> bool {
        self.transition(Outcome::Completed(session))
    }

    /// Fails with `error`. Returns `false` if already terminal.
    pub(crate) fn failed(&self, error: Error) -> bool {
        self.transition(Outcome::Failed(Arc::new(error)))
    }

    /// Cancels the connect.
    ///
    /// The channel is closed unless a session was already delivered. Never
    /// fails; always returns `true`.
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(Outcome::Cancelled);
        let completed = matches!(self.inner.slot.lock().outcome, Some(Outcome::Completed(_)));
        if !completed {
            self.inner.channel.close();
        }
        if cancelled {
            debug!(channel = %self.inner.channel.id(), "Connect cancelled");
        }
        true
    }

    fn transition(&self, next: Outcome) -> bool {
        let callbacks = {
            let mut slot = self.inner.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(next.clone());
            std::mem::take(&mut slot.callbacks)
        };
        self.inner.done.send_replace(true);

        // Callbacks run outside the lock
        for callback in callbacks {
            callback(next.clone().into_result());
        }
        true
    }
}

// ============================================================================
// SessionPromise - Observation
// ============================================================================

impl SessionPromise {
    /// Registers `callback`, invoked exactly once with the outcome.
    ///
    /// Runs immediately on the calling thread if the promise is already
    /// terminal; otherwise on the thread that completes it.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(Result<Session>) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.inner.slot.lock();
            match &slot.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    slot.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(outcome.into_result());
    }

    /// Waits for the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectFailed`] wrapping the connect failure
    /// - [`Error::Cancelled`] if the promise was cancelled
    ///
    /// Dropping the future leaves nothing registered on the promise.
    pub async fn wait(&self) -> Result<Session> {
        let mut done = self.inner.done.subscribe();
        done.wait_for(|done| *done)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        self.try_result().unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Waits for the outcome for at most `timeout`.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait), plus [`Error::ConnectionTimeout`] on expiry.
    /// The connect keeps running after a timeout; cancel it if unwanted.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Session> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::connection_timeout(saturating_millis(timeout)))?
    }

    /// Blocks the current thread until the outcome is known.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_wait(&self) -> Result<Session> {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.blocking_recv().map_err(|_| Error::ConnectionClosed)?
    }
}

impl IntoFuture for SessionPromise {
    type Output = Result<Session>;
    type IntoFuture = BoxFuture<'static, Result<Session>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.wait().await }.boxed()
    }
}

// ============================================================================
// Tests
// ============================================================================
