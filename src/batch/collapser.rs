//! Request collapser.

use super::unit::BatchExecutionUnit;
use super::window::{fail_all, fan_out, CloseReason, CollapsedRequest, Responder, Window};
use crate::error::IntoExecutionError;
use crate::isolation::{ExecutionContext, Fallback, IsolatedExecutor};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapserConfig {
    /// A window closes as soon as it holds this many requests.
    pub max_batch_size: usize,
    /// A window closes this long after its first request, whatever its size.
    #[serde(rename = "max_window_ms", with = "crate::utils::duration_ms")]
    pub max_window_duration: Duration,
    /// Isolation policy for the batch executions.
    pub context: ExecutionContext,
}

impl Default for CollapserConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_window_duration: Duration::from_millis(10),
            context: ExecutionContext::default(),
        }
    }
}

impl CollapserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n;
        self
    }

    pub fn with_max_window_duration(mut self, d: Duration) -> Self {
        self.max_window_duration = d;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "max batch size must be greater than zero",
                ErrorContext::new().with_field_path("max_batch_size"),
            ));
        }
        if self.max_window_duration.is_zero() {
            return Err(Error::configuration_with_context(
                "window duration must be greater than zero",
                ErrorContext::new().with_field_path("max_window_ms"),
            ));
        }
        self.context.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollapserStats {
    pub windows_dispatched: u64,
    pub requests_dispatched: u64,
    /// Requests buffered in the currently open window.
    pub pending: usize,
}

/// Future resolving to the value of one collapsed request.
///
/// Resolves exactly once: with the positional slice of the batch result, the
/// window-wide failure, or a fallback value.
#[must_use = "the result of a collapsed request is only observable by awaiting it"]
pub struct PendingResponse<V> {
    rx: oneshot::Receiver<Result<V>>,
}

impl<V> Future for PendingResponse<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::runtime_with_context(
                "collapsed request dropped before resolution",
                ErrorContext::new().with_source("request_collapser"),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Inner<K, A, V> {
    config: CollapserConfig,
    unit: BatchExecutionUnit<K, A, V>,
    fallback: Option<Fallback<V>>,
    /// The only mutable shared state: the open window, swapped out under the lock.
    active: Mutex<Option<Window<K, A, V>>>,
    next_sequence: AtomicU64,
    windows_dispatched: AtomicU64,
    requests_dispatched: AtomicU64,
}

/// Collapses concurrently submitted requests into batched executions.
///
/// A window opens with the first submission and closes when it reaches
/// `max_batch_size` or when `max_window_duration` has elapsed, whichever comes
/// first. The closed window is taken out of the slot under the same lock that
/// submissions use, so every request lands in exactly one window.
///
/// ```rust
/// use collapser_rs::batch::{CollapsedRequest, CollapserConfig, RequestCollapser};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let collapser = RequestCollapser::new(
///     CollapserConfig::new()
///         .with_max_batch_size(10)
///         .with_max_window_duration(Duration::from_millis(5)),
///     |batch: Vec<CollapsedRequest<u32, u32>>| async move {
///         Ok::<_, collapser_rs::Error>(
///             batch.iter().map(|r| format!("ValueForKey: {}", r.argument)).collect::<Vec<_>>(),
///         )
///     },
/// )?;
///
/// let (a, b) = futures::join!(collapser.submit(1, 1), collapser.submit(2, 2));
/// assert_eq!(a?, "ValueForKey: 1");
/// assert_eq!(b?, "ValueForKey: 2");
/// # Ok::<(), collapser_rs::Error>(())
/// # }).unwrap();
/// ```
pub struct RequestCollapser<K, A, V> {
    inner: Arc<Inner<K, A, V>>,
}

impl<K, A, V> Clone for RequestCollapser<K, A, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`RequestCollapser`].
pub struct CollapserBuilder<K, A, V> {
    config: CollapserConfig,
    executor: Option<Arc<IsolatedExecutor>>,
    fallback: Option<Fallback<V>>,
    _marker: std::marker::PhantomData<fn(K, A)>,
}

impl<K, A, V> CollapserBuilder<K, A, V>
where
    K: Send + 'static,
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: CollapserConfig::default(),
            executor: None,
            fallback: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_config(mut self, config: CollapserConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing executor (and its pool) instead of building one from
    /// `config.context`.
    pub fn with_executor(mut self, executor: Arc<IsolatedExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback<V>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn build<F, Fut, E>(self, batch_fn: F) -> Result<RequestCollapser<K, A, V>>
    where
        F: Fn(Vec<CollapsedRequest<K, A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<V>, E>> + Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        self.config.validate()?;
        let mut config = self.config;
        let executor = match self.executor {
            Some(ex) => {
                config.context = ex.context().clone();
                ex
            }
            None => Arc::new(IsolatedExecutor::new(config.context.clone())?),
        };
        Ok(RequestCollapser {
            inner: Arc::new(Inner {
                config,
                unit: BatchExecutionUnit::new(executor, batch_fn),
                fallback: self.fallback,
                active: Mutex::new(None),
                next_sequence: AtomicU64::new(1),
                windows_dispatched: AtomicU64::new(0),
                requests_dispatched: AtomicU64::new(0),
            }),
        })
    }
}

impl<K, A, V> Default for CollapserBuilder<K, A, V>
where
    K: Send + 'static,
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A, V> RequestCollapser<K, A, V>
where
    K: Send + 'static,
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut, E>(config: CollapserConfig, batch_fn: F) -> Result<Self>
    where
        F: Fn(Vec<CollapsedRequest<K, A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<V>, E>> + Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        CollapserBuilder::new().with_config(config).build(batch_fn)
    }

    pub fn builder() -> CollapserBuilder<K, A, V> {
        CollapserBuilder::new()
    }

    pub fn config(&self) -> &CollapserConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &Arc<IsolatedExecutor> {
        self.inner.unit.executor()
    }

    /// Submit one request and wait for its slice of the batch result.
    pub async fn submit(&self, key: K, argument: A) -> Result<V> {
        self.enqueue(key, argument)?.await
    }

    /// Add one request to the open window and return its pending response.
    ///
    /// The request is buffered before this returns, so the relative order of
    /// `enqueue` calls on one task is the order within the window. Must be called
    /// from inside a tokio runtime.
    pub fn enqueue(&self, key: K, argument: A) -> Result<PendingResponse<V>> {
        let handle = runtime_handle()?;
        let (tx, rx) = oneshot::channel();
        let request = CollapsedRequest::new(key, argument);

        let (opened, closed) = {
            let mut active = self.inner.lock_active()?;
            let mut opened = None;
            let window = active.get_or_insert_with(|| {
                let seq = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);
                let window = Window::new(seq, self.inner.config.max_batch_size);
                opened = Some((seq, window.opened_at() + self.inner.config.max_window_duration));
                window
            });
            let added = window.push(request, Responder::new(tx));
            let closed = if added.is_full() { active.take() } else { None };
            (opened, closed)
        };

        if let Some((seq, _)) = opened {
            debug!(window = seq, "window opened");
        }
        match closed {
            Some(window) => {
                handle.spawn(Inner::dispatch(Arc::clone(&self.inner), window, CloseReason::Size));
            }
            None => {
                if let Some((seq, deadline)) = opened {
                    handle.spawn(Inner::close_at(Arc::clone(&self.inner), seq, deadline));
                }
            }
        }

        Ok(PendingResponse { rx })
    }

    /// Close the open window now. Returns how many requests it held (0 if none was open).
    pub fn flush(&self) -> Result<usize> {
        let handle = runtime_handle()?;
        let closed = self.inner.lock_active()?.take();
        match closed {
            Some(window) => {
                let n = window.len();
                handle.spawn(Inner::dispatch(Arc::clone(&self.inner), window, CloseReason::Flush));
                Ok(n)
            }
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> CollapserStats {
        let pending = match self.inner.active.lock() {
            Ok(active) => active.as_ref().map(Window::len).unwrap_or(0),
            Err(_) => 0,
        };
        CollapserStats {
            windows_dispatched: self.inner.windows_dispatched.load(Ordering::Relaxed),
            requests_dispatched: self.inner.requests_dispatched.load(Ordering::Relaxed),
            pending,
        }
    }
}

fn runtime_handle() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        Error::runtime_with_context(
            "request collapser used outside of a tokio runtime",
            ErrorContext::new().with_source("request_collapser"),
        )
    })
}

impl<K, A, V> Inner<K, A, V>
where
    K: Send + 'static,
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock_active(&self) -> Result<MutexGuard<'_, Option<Window<K, A, V>>>> {
        self.active.lock().map_err(|_| {
            Error::runtime_with_context(
                "active window lock poisoned",
                ErrorContext::new().with_source("request_collapser"),
            )
        })
    }

    /// Timer for window `seq`, due at its open time plus `max_window_duration` however
    /// late the task first runs. A no-op if that window already closed by size or flush.
    async fn close_at(inner: Arc<Self>, seq: u64, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
        let closed = match inner.lock_active() {
            Ok(mut active) => {
                if active.as_ref().map(Window::sequence) == Some(seq) {
                    active.take()
                } else {
                    None
                }
            }
            Err(e) => {
                warn!(window = seq, error = %e, "window timer could not close window");
                None
            }
        };
        if let Some(window) = closed {
            Self::dispatch(inner, window, CloseReason::Timer).await;
        }
    }

    async fn dispatch(inner: Arc<Self>, window: Window<K, A, V>, reason: CloseReason) {
        let seq = window.sequence();
        let size = window.len();
        debug!(
            window = seq,
            size,
            reason = %reason,
            age_ms = window.opened_at().elapsed().as_millis() as u64,
            "window closed"
        );
        inner.windows_dispatched.fetch_add(1, Ordering::Relaxed);
        inner
            .requests_dispatched
            .fetch_add(size as u64, Ordering::Relaxed);

        let (requests, responders) = window.into_parts();
        match inner.unit.execute(requests).await {
            Ok(values) => fan_out(responders, values),
            Err(err) => match &inner.fallback {
                Some(fb) if err.is_fallbackable() => {
                    warn!(window = seq, size, error = %err, "batch failed, resolving window with fallback");
                    let executor = inner.unit.executor();
                    fail_all(responders, || executor.apply_fallback(&err, fb));
                }
                _ => {
                    warn!(window = seq, size, error = %err, "batch failed");
                    fail_all(responders, || Err(err.clone()));
                }
            },
        }
    }
}
