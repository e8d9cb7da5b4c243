//! Async stream command: a producer emitting many values per subscription.

use super::session::{Observer, StreamSession, Subscriber};
use crate::error::IntoExecutionError;
use crate::isolation::{Fallback, IsolatedExecutor};
use crate::{BoxStream, Error, ErrorContext, Result};
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

type ProducerFn<T> = Arc<dyn Fn(Subscriber<T>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Runs an injected producer per subscription on the shared executor.
///
/// The producer receives a [`Subscriber`], emits through it, and polls
/// [`Subscriber::is_cancelled`] between emissions. When the producer returns:
///
/// - `Ok(())` completes the stream unless it already terminated
/// - `Err(e)` delivers `on_error(e)`, or the fallback value followed by completion
///   when a fallback is configured and `e` is fallbackable
///
/// The producer is called inside the admitted task only. Admission rejection and
/// the execution timeout are reported the same way as a producer error.
pub struct AsyncStreamCommand<T> {
    producer: ProducerFn<T>,
    executor: Arc<IsolatedExecutor>,
    fallback: Option<Fallback<T>>,
}

impl<T: Clone> Clone for AsyncStreamCommand<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            executor: Arc::clone(&self.executor),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T> AsyncStreamCommand<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut, E>(executor: Arc<IsolatedExecutor>, producer: F) -> Self
    where
        F: Fn(Subscriber<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        let producer: ProducerFn<T> = Arc::new(move |subscriber| {
            producer(subscriber)
                .map(|r| r.map_err(IntoExecutionError::into_execution_error))
                .boxed()
        });
        Self {
            producer,
            executor,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Fallback<T>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Start the producer for `observer` and return the session controlling it.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn subscribe<O>(&self, observer: O) -> Result<StreamSession>
    where
        O: Observer<T> + 'static,
    {
        let handle = Handle::try_current().map_err(|_| {
            Error::runtime_with_context(
                "stream command subscribed outside of a tokio runtime",
                ErrorContext::new().with_source("async_stream_command"),
            )
        })?;

        let session = StreamSession::new();
        let subscriber = Subscriber::new(session.clone(), Box::new(observer));
        let producer = Arc::clone(&self.producer);
        let producer_subscriber = subscriber.clone();
        let work = async move { producer(producer_subscriber).await };
        let executor = Arc::clone(&self.executor);
        let fallback = self.fallback.clone();

        debug!(session = %session.id(), "stream session started");
        handle.spawn(async move {
            let timeout = executor.context().execution_timeout;
            match executor.isolate(work, timeout).await {
                Ok(()) => {
                    subscriber.on_completed();
                }
                Err(err) if subscriber.is_cancelled() => {
                    debug!(session = %subscriber.session().id(), error = %err, "producer ended after cancellation");
                }
                Err(err) => match fallback {
                    Some(fb) if err.is_fallbackable() && subscriber.is_active() => {
                        warn!(session = %subscriber.session().id(), error = %err, "stream failed, resuming with fallback");
                        match executor.apply_fallback(&err, &fb) {
                            Ok(value) => {
                                subscriber.on_next(value);
                                subscriber.on_completed();
                            }
                            Err(fallback_err) => {
                                subscriber.on_error(fallback_err);
                            }
                        }
                    }
                    _ => {
                        subscriber.on_error(err);
                    }
                },
            }
        });

        Ok(session)
    }

    /// Subscribe with a channel-backed observer and expose the events as a stream.
    ///
    /// Values arrive as `Ok`, a stream error as a final `Err`. The stream ends on
    /// completion, error, or cancellation of the returned session.
    pub fn observe(&self) -> Result<(BoxStream<'static, T>, StreamSession)> {
        let (tx, rx) = mpsc::unbounded();
        let session = self.subscribe(ChannelObserver { tx })?;
        let token = session.token();
        let stream = rx.take_until(async move { token.cancelled().await });
        Ok((Box::pin(stream), session))
    }
}

struct ChannelObserver<T> {
    tx: mpsc::UnboundedSender<Result<T>>,
}

impl<T: Send> Observer<T> for ChannelObserver<T> {
    fn on_next(&mut self, value: T) {
        let _ = self.tx.unbounded_send(Ok(value));
    }

    fn on_completed(&mut self) {
        self.tx.close_channel();
    }

    fn on_error(&mut self, error: Error) {
        let _ = self.tx.unbounded_send(Err(error));
        self.tx.close_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::ExecutionContext;
    use crate::stream::session::tests::{Event, Recorder};
    use crate::stream::StreamState;
    use std::time::Duration;

    fn executor() -> Arc<IsolatedExecutor> {
        Arc::new(IsolatedExecutor::new(ExecutionContext::default()).unwrap())
    }

    async fn wait_terminal(session: &StreamSession) {
        while !session.is_terminated() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_returning_ok_completes_stream() {
        let cmd = AsyncStreamCommand::new(executor(), |sub: Subscriber<u32>| async move {
            sub.on_next(1);
            sub.on_next(2);
            Ok::<_, Error>(())
        });
        let rec = Recorder::new();
        let session = cmd.subscribe(rec.clone()).unwrap();
        wait_terminal(&session).await;
        assert_eq!(
            rec.events(),
            vec![Event::Next(1), Event::Next(2), Event::Completed]
        );
    }

    #[tokio::test]
    async fn test_producer_error_reaches_observer_once() {
        let cmd = AsyncStreamCommand::new(executor(), |sub: Subscriber<u32>| async move {
            sub.on_next(7);
            Err::<(), _>("source closed")
        });
        let rec = Recorder::new();
        let session = cmd.subscribe(rec.clone()).unwrap();
        wait_terminal(&session).await;
        assert_eq!(session.state(), StreamState::Errored);
        assert_eq!(
            rec.events(),
            vec![Event::Next(7), Event::Error("Execution failed: source closed".into())]
        );
    }

    #[tokio::test]
    async fn test_fallback_resumes_stream() {
        let cmd = AsyncStreamCommand::new(executor(), |_sub: Subscriber<String>| async move {
            Err::<(), _>("down")
        })
        .with_fallback(Fallback::value("fallback".to_string()));
        let (stream, session) = cmd.observe().unwrap();
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["fallback".to_string()]);
        assert_eq!(session.state(), StreamState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_errors_stream() {
        let ex = Arc::new(
            IsolatedExecutor::new(
                ExecutionContext::new().with_execution_timeout(Duration::from_millis(20)),
            )
            .unwrap(),
        );
        let cmd = AsyncStreamCommand::new(ex, |sub: Subscriber<u8>| async move {
            sub.on_next(1);
            tokio::time::sleep(Duration::from_secs(5)).await;
            sub.on_next(2);
            Ok::<_, Error>(())
        });
        let (stream, _session) = cmd.observe().unwrap();
        let items: Vec<Result<u8>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert!(matches!(items[1], Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let cmd = AsyncStreamCommand::new(executor(), |_sub: Subscriber<u8>| async move {
            Ok::<_, Error>(())
        });
        assert!(cmd.subscribe(Recorder::new()).is_err());
    }
}
