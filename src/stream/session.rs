//! Stream session state and the guarded subscriber handed to producers.

use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

/// Receiver of stream events.
///
/// Implementations see at most one terminal event and nothing after it; the
/// [`Subscriber`] wrapping them enforces that regardless of what the producer does.
pub trait Observer<T>: Send {
    fn on_next(&mut self, value: T);
    fn on_completed(&mut self);
    fn on_error(&mut self, error: Error);
}

/// Lifecycle of a stream session. Every state but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamState {
    Active = 0,
    Completed = 1,
    Errored = 2,
    Cancelled = 3,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StreamState::Active,
            1 => StreamState::Completed,
            2 => StreamState::Errored,
            _ => StreamState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamState::Active)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamState::Active => "active",
            StreamState::Completed => "completed",
            StreamState::Errored => "errored",
            StreamState::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug)]
struct SessionShared {
    id: Uuid,
    state: AtomicU8,
    token: CancellationToken,
}

impl SessionShared {
    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `Active -> to`. Only the first terminal transition wins.
    fn terminate(&self, to: StreamState) -> bool {
        self.state
            .compare_exchange(
                StreamState::Active as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Handle on one subscription: observe its state and cancel it.
#[derive(Debug, Clone)]
pub struct StreamSession {
    shared: Arc<SessionShared>,
}

impl StreamSession {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(SessionShared {
                id: Uuid::new_v4(),
                state: AtomicU8::new(StreamState::Active as u8),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == StreamState::Cancelled
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancel the session. Returns `false` if it had already completed, errored or
    /// been cancelled; cancellation and completion are mutually exclusive.
    pub fn cancel(&self) -> bool {
        let won = self.shared.terminate(StreamState::Cancelled);
        if won {
            debug!(session = %self.shared.id, "stream session cancelled");
            self.shared.token.cancel();
        }
        won
    }

    /// Resolves once the session is cancelled. Never resolves for a session that
    /// terminated any other way.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.shared.token.cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }
}

/// Producer-side handle: emits into the observer and polls for cancellation.
///
/// Every method checks the session state under the observer lock, so nothing
/// reaches the observer after a terminal event. Post-terminal calls are dropped
/// and reported through the boolean return value.
pub struct Subscriber<T> {
    session: StreamSession,
    observer: Arc<Mutex<Box<dyn Observer<T>>>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<T> Subscriber<T> {
    pub(crate) fn new(session: StreamSession, observer: Box<dyn Observer<T>>) -> Self {
        Self {
            session,
            observer: Arc::new(Mutex::new(observer)),
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Producers poll this before each emission and stop once it returns `true`.
    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub fn is_active(&self) -> bool {
        !self.session.is_terminated()
    }

    /// `Err(Error::Cancelled)` once the session is cancelled, for producers that
    /// bail out with `?`. The error is never delivered to the observer.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Emit a value. Returns `false` if the session is no longer active.
    pub fn on_next(&self, value: T) -> bool {
        let mut observer = self.lock_observer();
        if self.session.is_terminated() {
            self.suppressed("on_next");
            return false;
        }
        observer.on_next(value);
        true
    }

    /// Complete the stream. Returns `false` if it had already terminated.
    pub fn on_completed(&self) -> bool {
        let mut observer = self.lock_observer();
        if !self.session.shared.terminate(StreamState::Completed) {
            self.suppressed("on_completed");
            return false;
        }
        observer.on_completed();
        true
    }

    /// Fail the stream. Returns `false` if it had already terminated.
    pub fn on_error(&self, error: Error) -> bool {
        let mut observer = self.lock_observer();
        if !self.session.shared.terminate(StreamState::Errored) {
            self.suppressed("on_error");
            return false;
        }
        observer.on_error(error);
        true
    }

    fn lock_observer(&self) -> MutexGuard<'_, Box<dyn Observer<T>>> {
        // A panicking observer leaves the lock poisoned; later events still go through the state checks.
        self.observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn suppressed(&self, event: &str) {
        debug!(
            session = %self.session.id(),
            state = %self.session.state(),
            event,
            "suppressed event after terminal state"
        );
    }
}
