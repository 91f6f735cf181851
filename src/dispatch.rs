//! Delivering records to the caller.
//!
//! The [`Dispatcher`] is the only part of the decoder with side effects. It
//! walks the `Streaming -> Terminated` state machine and calls into a
//! [`StreamHandler`]; once a terminal record has been delivered nothing else
//! is.

use itertools::Itertools;

use crate::client::ClientError;
use crate::model::{ChatSource, Completion, Record, StreamOutcome};
use crate::stream::StreamState;

/// Receiver of decoded stream events.
///
/// Only `on_content` is required. Callbacks are never invoked concurrently
/// and never after `on_done` or `on_error`.
///
/// # Example
/// ```
/// use clinchat::dispatch::StreamHandler;
///
/// struct Printer;
///
/// impl StreamHandler for Printer {
///     fn on_content(&mut self, delta: &str) {
///         print!("{}", delta);
///     }
/// }
/// ```
pub trait StreamHandler {
    /// A delta of answer text, not the cumulative answer.
    fn on_content(&mut self, delta: &str);

    /// The full citation list; replaces any earlier one.
    fn on_sources(&mut self, _sources: &[ChatSource]) {}

    /// Successful completion.
    fn on_done(&mut self, _message_id: &str, _session_id: &str) {}

    /// Stream failure.
    ///
    /// Returning `Ok(())` consumes the error and the decode call returns
    /// normally with [`Completion::Failed`]. The default returns the error so
    /// the decode call fails with it.
    fn on_error(&mut self, error: ClientError) -> Result<(), ClientError> {
        Err(error)
    }
}

impl<H: StreamHandler + ?Sized> StreamHandler for &mut H {
    fn on_content(&mut self, delta: &str) {
        (**self).on_content(delta)
    }

    fn on_sources(&mut self, sources: &[ChatSource]) {
        (**self).on_sources(sources)
    }

    fn on_done(&mut self, message_id: &str, session_id: &str) {
        (**self).on_done(message_id, session_id)
    }

    fn on_error(&mut self, error: ClientError) -> Result<(), ClientError> {
        (**self).on_error(error)
    }
}

/// Handler for callers that only want the returned [`StreamOutcome`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Collect;

impl StreamHandler for Collect {
    fn on_content(&mut self, _delta: &str) {}
}

type ContentFn<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type SourcesFn<'a> = Box<dyn FnMut(&[ChatSource]) + Send + 'a>;
type DoneFn<'a> = Box<dyn FnMut(&str, &str) + Send + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(ClientError) + Send + 'a>;

/// Closure-based [`StreamHandler`].
///
/// Without an error callback, errors are returned from the decode call.
///
/// # Example
/// ```
/// use clinchat::dispatch::Callbacks;
///
/// let mut answer = String::new();
/// let callbacks = Callbacks::new(|delta| answer.push_str(delta))
///     .with_done(|message_id, session_id| println!("{} {}", message_id, session_id));
/// # drop(callbacks);
/// ```
pub struct Callbacks<'a> {
    content: ContentFn<'a>,
    sources: Option<SourcesFn<'a>>,
    done: Option<DoneFn<'a>>,
    error: Option<ErrorFn<'a>>,
}

impl<'a> Callbacks<'a> {
    pub fn new(on_content: impl FnMut(&str) + Send + 'a) -> Self {
        Self {
            content: Box::new(on_content),
            sources: None,
            done: None,
            error: None,
        }
    }

    pub fn with_sources(mut self, on_sources: impl FnMut(&[ChatSource]) + Send + 'a) -> Self {
        self.sources = Some(Box::new(on_sources));
        self
    }

    pub fn with_done(mut self, on_done: impl FnMut(&str, &str) + Send + 'a) -> Self {
        self.done = Some(Box::new(on_done));
        self
    }

    pub fn with_error(mut self, on_error: impl FnMut(ClientError) + Send + 'a) -> Self {
        self.error = Some(Box::new(on_error));
        self
    }
}

impl StreamHandler for Callbacks<'_> {
    fn on_content(&mut self, delta: &str) {
        (self.content)(delta)
    }

    fn on_sources(&mut self, sources: &[ChatSource]) {
        if let Some(callback) = self.sources.as_mut() {
            callback(sources)
        }
    }

    fn on_done(&mut self, message_id: &str, session_id: &str) {
        if let Some(callback) = self.done.as_mut() {
            callback(message_id, session_id)
        }
    }

    fn on_error(&mut self, error: ClientError) -> Result<(), ClientError> {
        match self.error.as_mut() {
            Some(callback) => {
                callback(error);
                Ok(())
            }
            None => Err(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Terminated(Completion),
}

/// Drives a [`StreamHandler`] from a sequence of records.
pub struct Dispatcher<H> {
    handler: H,
    answer: String,
    sources: Vec<ChatSource>,
    phase: Phase,
}

impl<H: StreamHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            answer: String::new(),
            sources: Vec::new(),
            phase: Phase::Streaming,
        }
    }

    /// Deliver one record.
    ///
    /// Sources captured from a legacy payload are delivered first. Terminal
    /// records set `state.terminated`; after that every call is a no-op.
    pub fn dispatch(&mut self, record: Record, state: &mut StreamState) -> Result<(), ClientError> {
        if self.phase != Phase::Streaming {
            return Ok(());
        }

        if let Some(sources) = state.pending_sources.take() {
            self.replace_sources(sources);
        }

        match record {
            Record::Content(delta) => {
                self.answer.push_str(&delta);
                self.handler.on_content(&delta);
            }
            Record::Sources(sources) => self.replace_sources(sources),
            Record::Done {
                message_id,
                session_id,
            } => {
                self.terminate(Completion::Done, state);
                tracing::debug!(%message_id, %session_id, "Chat stream completed");
                self.handler.on_done(&message_id, &session_id);
            }
            Record::Error(message) => {
                self.terminate(Completion::Failed, state);
                tracing::debug!(%message, "Chat stream reported an error");
                self.handler.on_error(ClientError::Server(message))?;
            }
            Record::Unrecognized => {}
        }

        Ok(())
    }

    /// Route a transport failure to the handler and terminate.
    pub fn fail(&mut self, error: ClientError, state: &mut StreamState) -> Result<(), ClientError> {
        if self.phase != Phase::Streaming {
            return Ok(());
        }
        self.terminate(Completion::Failed, state);
        self.handler.on_error(error)
    }

    /// End the stream, completing it implicitly if no terminal record arrived.
    pub fn finish(mut self, state: &mut StreamState) -> StreamOutcome {
        if self.phase == Phase::Streaming {
            let record = state.done_record();
            // Dispatching `Done` cannot fail.
            let _ = self.dispatch(record, state);
        }

        let completion = match self.phase {
            Phase::Terminated(completion) => completion,
            Phase::Streaming => Completion::Done,
        };

        StreamOutcome {
            answer: self.answer,
            sources: self.sources,
            message_id: state.message_id.clone(),
            session_id: state.session_id.clone(),
            completion,
        }
    }

    fn replace_sources(&mut self, sources: Vec<ChatSource>) {
        tracing::debug!(
            documents = %sources.iter().map(|source| source.document_id.as_str()).join(","),
            "Received chat sources"
        );
        self.handler.on_sources(&sources);
        self.sources = sources;
    }

    fn terminate(&mut self, completion: Completion, state: &mut StreamState) {
        self.phase = Phase::Terminated(completion);
        state.terminated = true;
    }
}
