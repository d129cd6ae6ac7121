//! Session lifecycle: connect, pump chunks through the decoder, deliver events.
//!
//! A session is started with a connect future and an [`EventSink`]. The pump
//! runs on its own tokio task and owns the sink, so callbacks are never
//! invoked concurrently. Exactly one of `on_complete`/`on_error` is delivered,
//! unless the session is cancelled first, in which case neither is.
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::{CancelHandle, CancelSignal};
use crate::chunk::{ByteStream, ChunkRead, ChunkReader};
use crate::decoder::EventDecoder;
use crate::errors::{SessionError, StreamError, TransportError};
use crate::normalize::DomainEvent;
use crate::phase::PhaseTracker;
use crate::pipelines::{BackendError, Pipeline};

/// Future that opens the response body stream.
pub type Connect = BoxFuture<'static, Result<ByteStream, TransportError>>;

/// Consumer callbacks for one session.
///
/// Called from the session task in wire order. After a terminal callback
/// nothing else is called.
pub trait EventSink<E>: Send + 'static {
    fn on_event(&mut self, event: E);
    fn on_error(&mut self, error: SessionError);
    fn on_complete(&mut self);
}

type EventFn<E> = Box<dyn FnMut(E) + Send>;
type ErrorFn = Box<dyn FnMut(SessionError) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;

/// Closure-based [`EventSink`]. Unset callbacks are no-ops.
pub struct Callbacks<E> {
    event: EventFn<E>,
    error: ErrorFn,
    complete: CompleteFn,
}

impl<E> Default for Callbacks<E> {
    fn default() -> Self {
        Self {
            event: Box::new(|_| {}),
            error: Box::new(|_| {}),
            complete: Box::new(|| {}),
        }
    }
}

impl<E> Callbacks<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, f: impl FnMut(E) + Send + 'static) -> Self {
        self.event = Box::new(f);
        self
    }

    pub fn error(mut self, f: impl FnMut(SessionError) + Send + 'static) -> Self {
        self.error = Box::new(f);
        self
    }

    pub fn complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.complete = Box::new(f);
        self
    }
}

impl<E: 'static> EventSink<E> for Callbacks<E> {
    fn on_event(&mut self, event: E) {
        (self.event)(event)
    }

    fn on_error(&mut self, error: SessionError) {
        (self.error)(error)
    }

    fn on_complete(&mut self) {
        (self.complete)()
    }
}

/// One callback invocation, as seen through a [`ChannelSink`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SessionUpdate<E> {
    Event(E),
    Error(SessionError),
    Complete,
}

impl<E> SessionUpdate<E> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Complete)
    }
}

/// Pull-style sink: forwards every callback into an unbounded channel.
///
/// The receiver yields `None` once the session task has ended.
pub struct ChannelSink<E> {
    tx: mpsc::UnboundedSender<SessionUpdate<E>>,
}

impl<E: Send + 'static> ChannelSink<E> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionUpdate<E>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, update: SessionUpdate<E>) {
        if self.tx.send(update).is_err() {
            debug!("session update receiver dropped");
        }
    }
}

impl<E: Send + 'static> EventSink<E> for ChannelSink<E> {
    fn on_event(&mut self, event: E) {
        self.forward(SessionUpdate::Event(event));
    }

    fn on_error(&mut self, error: SessionError) {
        self.forward(SessionUpdate::Error(error));
    }

    fn on_complete(&mut self) {
        self.forward(SessionUpdate::Complete);
    }
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition. Repeats and transitions
    /// out of a terminal state are not.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Streaming)
                | (
                    Self::Connecting | Self::Streaming,
                    Self::Completed | Self::Errored | Self::Cancelled
                )
        )
    }
}

/// Which backend `error` events end the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FatalBackendErrors {
    /// Errors without a `scene_id` end the session; per-item errors do not.
    #[default]
    Unscoped,
    /// Every error event ends the session.
    Any,
    /// Error events are only delivered as events.
    Never,
}

impl FatalBackendErrors {
    pub fn is_fatal(self, err: &BackendError) -> bool {
        match self {
            Self::Unscoped => !err.is_scoped(),
            Self::Any => true,
            Self::Never => false,
        }
    }
}

/// Per-session behavior.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub fatal_backend_errors: FatalBackendErrors,
}

impl SessionOptions {
    pub fn fatal_backend_errors(mut self, policy: FatalBackendErrors) -> Self {
        self.fatal_backend_errors = policy;
        self
    }
}

/// Handle to a running session.
///
/// Dropping the handle detaches the session; it keeps running until the
/// stream ends.
pub struct SessionHandle<P: Pipeline> {
    id: uuid::Uuid,
    cancel: CancelHandle,
    state: watch::Receiver<SessionState>,
    progress: watch::Receiver<P::Progress>,
    task: JoinHandle<SessionState>,
}

impl<P: Pipeline> SessionHandle<P> {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Requests cancellation. No callback runs after this returns, except one
    /// already executing on the session task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the session if it has not finished within `timeout`.
    pub fn cancel_after(&self, timeout: Duration) {
        let cancel = self.cancel.clone();
        let mut state = self.state.clone();
        let id = self.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(session_id = %id, ?timeout, "session deadline reached");
                    cancel.cancel();
                }
                _ = state.wait_for(|s| s.is_terminal()) => {}
            }
        });
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Snapshot of the phase tracker after the last delivered event.
    pub fn progress(&self) -> P::Progress {
        self.progress.borrow().clone()
    }

    pub fn phase(&self) -> <P::Progress as PhaseTracker>::Phase {
        self.progress.borrow().phase()
    }

    pub fn watch_progress(&self) -> watch::Receiver<P::Progress> {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session task and returns its terminal state.
    pub async fn join(self) -> Result<SessionState, StreamError> {
        self.task
            .await
            .map_err(|e| StreamError::Protocol(format!("session task failed: {e}")))
    }
}

/// Starts a session on the current tokio runtime.
///
/// The session is `Connecting` when this returns.
pub fn start<P, S>(connect: Connect, sink: S, options: SessionOptions) -> SessionHandle<P>
where
    P: Pipeline,
    S: EventSink<P::Event>,
{
    let id = uuid::Uuid::new_v4();
    let (cancel, signal) = CancelHandle::new();
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);
    let (progress_tx, progress_rx) = watch::channel(P::Progress::default());

    let pump = Pump::<P> {
        id,
        options,
        cancel: signal,
        state: state_tx,
        progress: progress_tx,
    };
    pump.transition(SessionState::Connecting);
    info!(session_id = %id, pipeline = %P::ID, "session started");
    let task = tokio::spawn(pump.run(connect, sink));

    SessionHandle {
        id,
        cancel,
        state: state_rx,
        progress: progress_rx,
        task,
    }
}

struct Pump<P: Pipeline> {
    id: uuid::Uuid,
    options: SessionOptions,
    cancel: CancelSignal,
    state: watch::Sender<SessionState>,
    progress: watch::Sender<P::Progress>,
}

impl<P: Pipeline> Pump<P> {
    async fn run<S: EventSink<P::Event>>(self, connect: Connect, mut sink: S) -> SessionState {
        let mut cancel = self.cancel.clone();
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.cancelled(),
            connected = connect => connected,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => return self.fail(&mut sink, err.into_session_error(P::ID)),
        };
        debug!(session_id = %self.id, pipeline = %P::ID, "response stream open");

        let mut reader = ChunkReader::new(stream, self.cancel.clone());
        let mut decoder = EventDecoder::<P>::new();
        loop {
            let chunk = match reader.next_chunk().await {
                Ok(ChunkRead::Chunk(chunk)) => chunk,
                Ok(ChunkRead::End) => {
                    decoder.finish();
                    if self.cancel.is_cancelled() {
                        return self.cancelled();
                    }
                    self.transition(SessionState::Completed);
                    info!(
                        session_id = %self.id,
                        pipeline = %P::ID,
                        chunks = reader.chunks_read(),
                        bytes = reader.bytes_read(),
                        dropped_frames = decoder.dropped_frames(),
                        "session completed"
                    );
                    sink.on_complete();
                    return SessionState::Completed;
                }
                Ok(ChunkRead::Cancelled) => return self.cancelled(),
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        return self.cancelled();
                    }
                    return self.fail(&mut sink, err.into_session_error(P::ID));
                }
            };

            if *self.state.borrow() == SessionState::Connecting {
                self.transition(SessionState::Streaming);
            }
            debug!(session_id = %self.id, pipeline = %P::ID, bytes = chunk.len(), "chunk received");

            for event in decoder.push_chunk(&chunk) {
                if self.cancel.is_cancelled() {
                    return self.cancelled();
                }
                let fatal = event
                    .backend_error()
                    .filter(|err| self.options.fatal_backend_errors.is_fatal(err))
                    .map(|err| err.message.clone());
                self.progress.send_modify(|progress| progress.observe(&event));
                debug!(session_id = %self.id, pipeline = %P::ID, event = event.name(), "delivering event");
                sink.on_event(event);
                if let Some(message) = fatal {
                    return self.fail(&mut sink, SessionError::backend(P::ID, message));
                }
            }
        }
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        match from {
            Some(from) => {
                debug!(session_id = %self.id, pipeline = %P::ID, ?from, to = ?next, "session state changed");
                true
            }
            None => {
                debug!(session_id = %self.id, pipeline = %P::ID, to = ?next, "rejected session state change");
                false
            }
        }
    }

    fn cancelled(&self) -> SessionState {
        self.transition(SessionState::Cancelled);
        info!(session_id = %self.id, pipeline = %P::ID, "session cancelled");
        SessionState::Cancelled
    }

    fn fail<S: EventSink<P::Event>>(&self, sink: &mut S, error: SessionError) -> SessionState {
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        self.transition(SessionState::Errored);
        warn!(session_id = %self.id, pipeline = %P::ID, error = %error, "session failed");
        sink.on_error(error);
        SessionState::Errored
    }
}
