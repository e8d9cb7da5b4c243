//! Collapsing window.

use crate::{Error, Result};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// One logical request buffered in a window, handed to the batch function in
/// submission order.
#[derive(Debug, Clone)]
pub struct CollapsedRequest<K, A> {
    pub key: K,
    pub argument: A,
    pub submitted_at: Instant,
}

impl<K, A> CollapsedRequest<K, A> {
    pub fn new(key: K, argument: A) -> Self {
        Self {
            key,
            argument,
            submitted_at: Instant::now(),
        }
    }
}

/// Single-assignment result slot of a buffered request.
///
/// Resolving consumes the responder, so a request can never be answered twice.
pub(crate) struct Responder<V> {
    tx: oneshot::Sender<Result<V>>,
}

impl<V> Responder<V> {
    pub(crate) fn new(tx: oneshot::Sender<Result<V>>) -> Self {
        Self { tx }
    }

    pub(crate) fn resolve(self, result: Result<V>) {
        // The caller may have stopped waiting; nothing to deliver to then.
        let _ = self.tx.send(result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Size,
    Timer,
    Flush,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CloseReason::Size => "size",
            CloseReason::Timer => "timer",
            CloseReason::Flush => "flush",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WindowAddResult {
    Added { count: usize },
    Full { count: usize },
}

impl WindowAddResult {
    pub(crate) fn is_full(&self) -> bool {
        matches!(self, WindowAddResult::Full { .. })
    }
}

/// Ordered set of pending requests accumulated since the window opened.
///
/// Requests and their responders are kept in two parallel vectors so the batch
/// function can take ownership of the requests while the responders stay behind
/// for positional fan-out.
pub(crate) struct Window<K, A, V> {
    sequence: u64,
    opened_at: Instant,
    max_size: usize,
    requests: Vec<CollapsedRequest<K, A>>,
    responders: Vec<Responder<V>>,
}

impl<K, A, V> Window<K, A, V> {
    pub(crate) fn new(sequence: u64, max_size: usize) -> Self {
        Self {
            sequence,
            opened_at: Instant::now(),
            max_size,
            requests: Vec::with_capacity(max_size.min(1024)),
            responders: Vec::with_capacity(max_size.min(1024)),
        }
    }

    pub(crate) fn push(
        &mut self,
        request: CollapsedRequest<K, A>,
        responder: Responder<V>,
    ) -> WindowAddResult {
        self.requests.push(request);
        self.responders.push(responder);
        let count = self.requests.len();
        if count >= self.max_size {
            WindowAddResult::Full { count }
        } else {
            WindowAddResult::Added { count }
        }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn into_parts(self) -> (Vec<CollapsedRequest<K, A>>, Vec<Responder<V>>) {
        (self.requests, self.responders)
    }
}

/// Fan a positional batch result out to the window's responders.
///
/// Callers must have checked the lengths already; a mismatch here is treated as a
/// mapping failure for every responder rather than a partial answer.
pub(crate) fn fan_out<V>(responders: Vec<Responder<V>>, values: Vec<V>) {
    if responders.len() != values.len() {
        let err = Error::Mapping {
            expected: responders.len(),
            actual: values.len(),
        };
        for r in responders {
            r.resolve(Err(err.clone()));
        }
        return;
    }
    for (responder, value) in responders.into_iter().zip(values) {
        responder.resolve(Ok(value));
    }
}

/// Resolve every responder of a window with the same outcome.
pub(crate) fn fail_all<V>(responders: Vec<Responder<V>>, mut result_for: impl FnMut() -> Result<V>) {
    for r in responders {
        r.resolve(result_for());
    }
}
