//! Lifecycle of a single chat request.
//!
//! A `ChatRequest` owns its assembler and walks
//! `Idle -> Streaming -> {Completed | Failed | Cancelled}` as events arrive.
//! Snapshots go to every registered handler, in registration order.
//! Requests share nothing, so any number may run concurrently.

use std::time::Duration;

use futures::{Stream, StreamExt};
use oc_protocol::{ChatError, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{AssemblerConfig, DisplaySnapshot, ResponseAssembler};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Streaming,
    Completed,
    Failed(ChatError),
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed(_) | RequestState::Cancelled
        )
    }
}

/// Receives every snapshot a request produces.
pub trait SnapshotHandler: Send {
    fn on_snapshot(&mut self, snapshot: &DisplaySnapshot);

    /// Called once when the request reaches a terminal state.
    fn on_finish(&mut self, _outcome: &RequestOutcome) {}
}

/// Final state of a request plus what it last showed.
///
/// A failed request keeps its last good snapshot; a cancelled one keeps
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub state: RequestState,
    pub snapshot: Option<DisplaySnapshot>,
}

impl RequestOutcome {
    pub fn error(&self) -> Option<&ChatError> {
        match &self.state {
            RequestState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Settings for driving one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub assembler: AssemblerConfig,
    /// Longest wait for the next event. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

enum Step {
    Cancelled,
    TimedOut,
    Next(Option<StreamEvent>),
}

pub struct ChatRequest {
    state: RequestState,
    assembler: Option<ResponseAssembler>,
    last_snapshot: Option<DisplaySnapshot>,
    idle_timeout: Option<Duration>,
    handlers: Vec<Box<dyn SnapshotHandler>>,
}

impl ChatRequest {
    pub fn new(options: RequestOptions) -> Self {
        Self {
            state: RequestState::Idle,
            assembler: Some(ResponseAssembler::new(options.assembler)),
            last_snapshot: None,
            idle_timeout: options.idle_timeout,
            handlers: Vec::new(),
        }
    }

    /// Register a handler for this request's snapshots.
    pub fn subscribe(&mut self, handler: Box<dyn SnapshotHandler>) {
        self.handlers.push(handler);
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn last_snapshot(&self) -> Option<&DisplaySnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Accumulated text so far. Empty once the request is cancelled.
    pub fn buffer(&self) -> &str {
        self.assembler.as_ref().map(|a| a.buffer()).unwrap_or("")
    }

    /// Apply one event. Returns the new snapshot, if the event produced one.
    ///
    /// Events arriving after a terminal state are ignored.
    pub fn apply(&mut self, event: StreamEvent) -> Option<DisplaySnapshot> {
        if self.state.is_terminal() {
            debug!(?event, "ignoring event after request finished");
            return None;
        }

        match event {
            StreamEvent::Response(response) => {
                let assembler = self.assembler.as_mut()?;
                self.state = RequestState::Streaming;
                let snapshot = assembler.on_event(&response);
                debug!(
                    fragment_len = response.fragment.len(),
                    is_final = response.is_final,
                    "applied response event"
                );
                for handler in &mut self.handlers {
                    handler.on_snapshot(&snapshot);
                }
                self.last_snapshot = Some(snapshot.clone());
                Some(snapshot)
            }
            StreamEvent::Done => {
                self.state = RequestState::Completed;
                None
            }
            StreamEvent::Error(err) => {
                warn!(kind = ?err.kind, message = %err.message, "request failed");
                self.state = RequestState::Failed(err);
                None
            }
        }
    }

    /// Abandon the request: no further snapshots, buffer discarded.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = RequestState::Cancelled;
        self.assembler = None;
        self.last_snapshot = None;
    }

    fn outcome(&self) -> RequestOutcome {
        RequestOutcome {
            state: self.state.clone(),
            snapshot: self.last_snapshot.clone(),
        }
    }

    fn finish(&mut self) -> RequestOutcome {
        let outcome = self.outcome();
        for handler in &mut self.handlers {
            handler.on_finish(&outcome);
        }
        info!(state = ?outcome.state, chars = self.buffer().len(), "request finished");
        outcome
    }

    /// Drive the request to a terminal state.
    ///
    /// Consumes `events` until the stream ends, fails, stalls past the idle
    /// timeout, or `cancel` fires. A stream that ends without `Done` is
    /// treated as completed.
    pub async fn run<S>(mut self, events: S, cancel: CancellationToken) -> RequestOutcome
    where
        S: Stream<Item = StreamEvent>,
    {
        let mut events = std::pin::pin!(events);
        let idle_timeout = self.idle_timeout;

        while !self.state.is_terminal() {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = next_within(&mut events, idle_timeout) => match next {
                    Some(event) => Step::Next(event),
                    None => Step::TimedOut,
                },
            };

            match step {
                Step::Cancelled => {
                    debug!("request cancelled");
                    self.cancel();
                }
                Step::TimedOut => {
                    let secs = idle_timeout.map(|d| d.as_secs_f64()).unwrap_or_default();
                    self.apply(StreamEvent::Error(ChatError::timeout(format!(
                        "no response from backend for {secs:.1}s"
                    ))));
                }
                Step::Next(Some(event)) => {
                    self.apply(event);
                }
                Step::Next(None) => {
                    self.apply(StreamEvent::Done);
                }
            }
        }

        self.finish()
    }
}

/// Next item of `events`, or `None` if the idle timeout elapsed first.
async fn next_within<S>(events: &mut S, idle_timeout: Option<Duration>) -> Option<Option<S::Item>>
where
    S: Stream + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, events.next()).await.ok(),
        None => Some(events.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_protocol::{ErrorKind, ResponseEvent};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        snapshots: Arc<Mutex<Vec<DisplaySnapshot>>>,
        finished: Arc<Mutex<Option<RequestOutcome>>>,
    }

    impl SnapshotHandler for Recorder {
        fn on_snapshot(&mut self, snapshot: &DisplaySnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }

        fn on_finish(&mut self, outcome: &RequestOutcome) {
            *self.finished.lock().unwrap() = Some(outcome.clone());
        }
    }

    fn response(text: &str) -> StreamEvent {
        StreamEvent::Response(ResponseEvent::fragment(text))
    }

    #[test]
    fn starts_idle() {
        let request = ChatRequest::new(RequestOptions::default());
        assert_eq!(request.state(), &RequestState::Idle);
        assert!(request.last_snapshot().is_none());
        assert_eq!(request.buffer(), "");
    }

    #[test]
    fn first_event_enters_streaming() {
        let mut request = ChatRequest::new(RequestOptions::default());
        let snapshot = request.apply(response("Hi")).unwrap();
        assert_eq!(request.state(), &RequestState::Streaming);
        assert_eq!(snapshot.answer, "Hi");
    }

    #[test]
    fn error_preserves_last_snapshot() {
        let mut request = ChatRequest::new(RequestOptions::default());
        request.apply(response("partial"));
        request.apply(StreamEvent::Error(ChatError::transport("reset")));

        assert_eq!(
            request.state(),
            &RequestState::Failed(ChatError::transport("reset"))
        );
        assert_eq!(request.last_snapshot().unwrap().answer, "partial");
    }

    #[test]
    fn events_after_terminal_state_are_ignored() {
        let mut request = ChatRequest::new(RequestOptions::default());
        request.apply(response("a"));
        request.apply(StreamEvent::Done);
        assert!(request.apply(response("b")).is_none());
        assert_eq!(request.state(), &RequestState::Completed);
        assert_eq!(request.buffer(), "a");
    }

    #[test]
    fn cancel_discards_buffer() {
        let mut request = ChatRequest::new(RequestOptions::default());
        request.apply(response("secret"));
        request.cancel();

        assert_eq!(request.state(), &RequestState::Cancelled);
        assert_eq!(request.buffer(), "");
        assert!(request.last_snapshot().is_none());
        assert!(request.apply(response("more")).is_none());
    }

    #[tokio::test]
    async fn run_delivers_snapshots_to_every_handler() {
        let first = Recorder::default();
        let second = Recorder::default();
        let mut request = ChatRequest::new(RequestOptions::default());
        request.subscribe(Box::new(first.clone()));
        request.subscribe(Box::new(second.clone()));

        let events = futures::stream::iter(vec![response("a"), response("b"), StreamEvent::Done]);
        let outcome = request.run(events, CancellationToken::new()).await;

        assert_eq!(outcome.state, RequestState::Completed);
        assert_eq!(outcome.snapshot.unwrap().answer, "ab");
        for recorder in [first, second] {
            let answers: Vec<_> = recorder
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.answer.clone())
                .collect();
            assert_eq!(answers, vec!["a", "ab"]);
            assert!(recorder.finished.lock().unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn stream_end_without_done_completes() {
        let request = ChatRequest::new(RequestOptions::default());
        let events = futures::stream::iter(vec![response("x")]);
        let outcome = request.run(events, CancellationToken::new()).await;
        assert_eq!(outcome.state, RequestState::Completed);
    }

    #[tokio::test]
    async fn empty_stream_completes_without_snapshot() {
        let request = ChatRequest::new(RequestOptions::default());
        let outcome = request
            .run(futures::stream::empty(), CancellationToken::new())
            .await;
        assert_eq!(outcome.state, RequestState::Completed);
        assert!(outcome.snapshot.is_none());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let recorder = Recorder::default();
        let mut request = ChatRequest::new(RequestOptions::default());
        request.subscribe(Box::new(recorder.clone()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = request
            .run(futures::stream::iter(vec![response("never")]), cancel)
            .await;

        assert_eq!(outcome.state, RequestState::Cancelled);
        assert!(outcome.snapshot.is_none());
        assert!(recorder.snapshots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn idle_timeout_fails_request() {
        let options = RequestOptions {
            idle_timeout: Some(Duration::from_millis(20)),
            ..RequestOptions::default()
        };
        let request = ChatRequest::new(options);
        let events = futures::stream::iter(vec![response("slow start")])
            .chain(futures::stream::pending());
        let outcome = request.run(events, CancellationToken::new()).await;

        let err = outcome.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(outcome.snapshot.unwrap().answer, "slow start");
    }

    #[test]
    fn outcome_error_accessor() {
        let outcome = RequestOutcome {
            state: RequestState::Completed,
            snapshot: None,
        };
        assert!(outcome.error().is_none());
    }
}
