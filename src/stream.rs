//! The decode loop.
//!
//! One call to [`decode_stream`] owns one [`StreamState`] and runs
//! read chunk -> accumulate text -> frame -> recognize -> dispatch until the
//! body ends or a terminal record arrives. The only suspension point is
//! waiting for the next chunk; dropping the future drops the state and no
//! callback fires afterwards.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};

use crate::client::ClientError;
use crate::dispatch::{Dispatcher, StreamHandler};
use crate::framer;
use crate::model::{ChatSource, Framing, Record, StreamOutcome};
use crate::recognize::{error_message, fold_identifiers, recognize, sources_field};
use crate::text::TextAccumulator;

/// Per-call decoder state. Never shared between calls.
#[derive(Debug, Clone)]
pub struct StreamState {
    /// Unterminated trailing text carried between reads.
    pub buffer: String,

    /// Fixed for the whole call.
    pub framing: Framing,

    pub message_id: String,

    /// Seeded from the request; a record may replace it.
    pub session_id: String,

    /// Set once a terminal record has been recognized.
    pub terminated: bool,

    /// Sources that rode along on a legacy text payload, not yet delivered.
    pub(crate) pending_sources: Option<Vec<ChatSource>>,
}

impl StreamState {
    pub fn new(framing: Framing, seed_session_id: &str) -> Self {
        Self {
            buffer: String::new(),
            framing,
            message_id: String::new(),
            session_id: seed_session_id.to_string(),
            terminated: false,
            pending_sources: None,
        }
    }

    /// A `Done` record carrying the identifiers known so far.
    pub fn done_record(&self) -> Record {
        Record::Done {
            message_id: self.message_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// Decode a chunked response body, delivering events to `handler`.
///
/// Errors from `chunks` are routed to [`StreamHandler::on_error`] and end the
/// stream. A body that ends without a terminal record completes implicitly
/// with whatever identifiers were seen.
///
/// # Example
/// ```
/// use bytes::Bytes;
/// use clinchat::dispatch::Collect;
/// use clinchat::model::Framing;
/// use clinchat::stream::decode_stream;
///
/// # futures::executor::block_on(async {
/// let body = "data: {\"type\":\"content\",\"content\":\"Hello\"}\n\ndata: [DONE]\n\n";
/// let chunks = futures::stream::iter(vec![Ok(Bytes::from(body))]);
///
/// let outcome = decode_stream(chunks, Framing::ServerSentEvents, "session-1", Collect)
///     .await
///     .unwrap();
/// assert_eq!(outcome.answer, "Hello");
/// assert_eq!(outcome.session_id, "session-1");
/// # });
/// ```
pub async fn decode_stream<S, H>(
    chunks: S,
    framing: Framing,
    seed_session_id: &str,
    handler: H,
) -> Result<StreamOutcome, ClientError>
where
    S: Stream<Item = Result<Bytes, ClientError>>,
    H: StreamHandler,
{
    let mut state = StreamState::new(framing, seed_session_id);
    let mut accumulator = TextAccumulator::new();
    let mut dispatcher = Dispatcher::new(handler);
    futures::pin_mut!(chunks);

    tracing::debug!(?framing, "Decoding chat response stream");

    while !state.terminated {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                let appended_from = state.buffer.len();
                accumulator.push(&chunk, &mut state.buffer);
                let lines = framer::take_lines(&mut state.buffer, appended_from);
                process_lines(lines, &mut state, &mut dispatcher)?;
            }
            Some(Err(error)) => {
                tracing::warn!(%error, "Chat stream transport failed");
                dispatcher.fail(error, &mut state)?;
            }
            None => {
                accumulator.finish(&mut state.buffer);
                let last = framer::flush(&mut state.buffer);
                process_lines(last, &mut state, &mut dispatcher)?;
                break;
            }
        }
    }

    Ok(dispatcher.finish(&mut state))
}

fn process_lines<H: StreamHandler>(
    lines: impl IntoIterator<Item = String>,
    state: &mut StreamState,
    dispatcher: &mut Dispatcher<H>,
) -> Result<(), ClientError> {
    for line in lines {
        if state.terminated {
            break;
        }
        if let Some(record) = recognize(&line, state) {
            dispatcher.dispatch(record, state)?;
        }
    }
    Ok(())
}

const COMPLETE_TEXT_FIELDS: &[&str] = &["content", "answer", "response"];

/// Decode a body that was read to completion in one piece.
///
/// The payload is parsed once as a JSON document. A body that is not one
/// document is read line by line the way a stream would be, and only when no
/// line is recognized does it count as plain text. Text is delivered through
/// `on_content`, then any sources, then completion with the identifiers found
/// in the body or the seeded session. A body that only carries an error is
/// delivered through `on_error`.
pub fn decode_complete<H: StreamHandler>(
    body: &[u8],
    seed_session_id: &str,
    handler: H,
) -> Result<StreamOutcome, ClientError> {
    let mut state = StreamState::new(Framing::Unknown, seed_session_id);
    let mut dispatcher = Dispatcher::new(handler);
    let text = String::from_utf8_lossy(body);

    let records = match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(object)) => document_records(&object, &mut state),
        Ok(Value::String(answer)) => vec![Record::Content(answer)],
        Ok(_) => Vec::new(),
        Err(_) if text.trim().is_empty() => Vec::new(),
        Err(_) => {
            if decode_lines(&text, &mut state, &mut dispatcher)? {
                Vec::new()
            } else {
                vec![Record::Content(text.into_owned())]
            }
        }
    };

    for record in records {
        dispatcher.dispatch(record, &mut state)?;
    }

    Ok(dispatcher.finish(&mut state))
}

fn document_records(object: &Map<String, Value>, state: &mut StreamState) -> Vec<Record> {
    fold_identifiers(object, state);

    // An empty answer is still the answer.
    let answer = COMPLETE_TEXT_FIELDS
        .iter()
        .find_map(|name| object.get(*name).and_then(Value::as_str));
    let is_error = object.get("type").and_then(Value::as_str) == Some("error")
        || (answer.is_none() && object.contains_key("error"));

    if is_error {
        return vec![Record::Error(error_message(object))];
    }

    let mut records = Vec::new();
    if let Some(answer) = answer {
        records.push(Record::Content(answer.to_string()));
    }
    if let Some(sources) = sources_field(object) {
        records.push(Record::Sources(sources));
    }
    records
}

/// Run every line of `text` through the recognizer. Returns whether any line
/// was recognized.
fn decode_lines<H: StreamHandler>(
    text: &str,
    state: &mut StreamState,
    dispatcher: &mut Dispatcher<H>,
) -> Result<bool, ClientError> {
    let mut recognized = false;

    for line in text.lines() {
        let record = match recognize(line, state) {
            None | Some(Record::Unrecognized) => continue,
            Some(record) => record,
        };

        recognized = true;
        let terminal = record.is_terminal();
        dispatcher.dispatch(record, state)?;
        if terminal {
            break;
        }
    }

    Ok(recognized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Collect;
    use crate::model::Completion;
    use futures::stream;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Content(String),
        Sources(Vec<ChatSource>),
        Done(String, String),
        Error(String),
    }

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl StreamHandler for Recorder {
        fn on_content(&mut self, delta: &str) {
            self.events.push(Event::Content(delta.to_string()));
        }

        fn on_sources(&mut self, sources: &[ChatSource]) {
            self.events.push(Event::Sources(sources.to_vec()));
        }

        fn on_done(&mut self, message_id: &str, session_id: &str) {
            self.events.push(Event::Done(message_id.to_string(), session_id.to_string()));
        }

        fn on_error(&mut self, error: ClientError) -> Result<(), ClientError> {
            self.events.push(Event::Error(error.to_string()));
            Ok(())
        }
    }

    impl Recorder {
        fn answer(&self) -> String {
            self.events
                .iter()
                .filter_map(|event| match event {
                    Event::Content(delta) => Some(delta.as_str()),
                    _ => None,
                })
                .collect()
        }

        fn terminal_count(&self) -> usize {
            self.events
                .iter()
                .filter(|event| matches!(event, Event::Done(..) | Event::Error(_)))
                .count()
        }
    }

    fn chunks_of(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, ClientError>> {
        let parts: Vec<Result<Bytes, ClientError>> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(parts)
    }

    async fn run(parts: &[&str], framing: Framing) -> (Recorder, StreamOutcome) {
        let parts: Vec<&[u8]> = parts.iter().map(|part| part.as_bytes()).collect();
        run_bytes(&parts, framing).await
    }

    async fn run_bytes(parts: &[&[u8]], framing: Framing) -> (Recorder, StreamOutcome) {
        let mut recorder = Recorder::default();
        let outcome = decode_stream(chunks_of(parts), framing, "seed", &mut recorder)
            .await
            .unwrap();
        (recorder, outcome)
    }

    fn content(text: &str) -> Event {
        Event::Content(text.to_string())
    }

    #[tokio::test]
    async fn test_sse_single_chunk() {
        let body = "data: {\"type\":\"content\",\"content\":\"Hello\"}\n\ndata: [DONE]\n\n";
        let (recorder, outcome) = run(&[body], Framing::ServerSentEvents).await;

        assert_eq!(
            recorder.events,
            vec![content("Hello"), Event::Done(String::new(), "seed".into())]
        );
        assert_eq!(outcome.completion, Completion::Done);
    }

    #[tokio::test]
    async fn test_json_split_across_chunks() {
        let (recorder, _) = run(
            &["{\"type\":\"cont", "ent\",\"content\":\"Hi\"}\n"],
            Framing::NewlineDelimitedJson,
        )
        .await;

        assert_eq!(
            recorder.events,
            vec![content("Hi"), Event::Done(String::new(), "seed".into())]
        );
    }

    #[tokio::test]
    async fn test_ndjson_with_completion_flag() {
        let body = "{\"content\":\"A\"}\n{\"content\":\"B\"}\n{\"done\":true}\n";
        let (recorder, _) = run(&[body], Framing::NewlineDelimitedJson).await;

        assert_eq!(
            recorder.events,
            vec![content("A"), content("B"), Event::Done(String::new(), "seed".into())]
        );
    }

    #[tokio::test]
    async fn test_sources_before_content() {
        let body = "{\"sources\":[{\"documentId\":\"d1\",\"chunkId\":\"c1\",\"chunkIndex\":0}]}\n{\"content\":\"X\"}\n";
        let (recorder, outcome) = run(&[body], Framing::Unknown).await;

        let source = ChatSource {
            document_id: "d1".into(),
            chunk_id: "c1".into(),
            chunk_index: 0,
        };
        assert_eq!(recorder.events[0], Event::Sources(vec![source.clone()]));
        assert_eq!(recorder.events[1], content("X"));
        assert_eq!(outcome.sources, vec![source]);
    }

    #[tokio::test]
    async fn test_implicit_done_on_end_of_body() {
        let mut recorder = Recorder::default();
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"{\"content\":\"partial\"}\n"))]);
        let outcome = decode_stream(chunks, Framing::NewlineDelimitedJson, "", &mut recorder)
            .await
            .unwrap();

        assert_eq!(
            recorder.events,
            vec![content("partial"), Event::Done(String::new(), String::new())]
        );
        assert_eq!(recorder.terminal_count(), 1);
        assert_eq!(outcome.completion, Completion::Done);
    }

    #[tokio::test]
    async fn test_leading_noise_is_skipped() {
        let (recorder, _) = run(&["<<garbage>>\n{\"content\":\"ok\"}\n"], Framing::Unknown).await;
        assert_eq!(
            recorder.events,
            vec![content("ok"), Event::Done(String::new(), "seed".into())]
        );
    }

    #[tokio::test]
    async fn test_flush_on_close() {
        let (recorder, _) = run(
            &["data: {\"type\":\"content\",\"content\":\"a\"}\n", "data: {\"type\":\"content\",\"content\":\"b\"}"],
            Framing::ServerSentEvents,
        )
        .await;
        assert_eq!(
            recorder.events,
            vec![content("a"), content("b"), Event::Done(String::new(), "seed".into())]
        );
    }

    #[tokio::test]
    async fn test_unflushed_done_record_is_the_only_terminal() {
        let (recorder, outcome) = run(
            &["{\"content\":\"a\"}\n{\"type\":\"done\",\"messageId\":\"m-1\"}"],
            Framing::NewlineDelimitedJson,
        )
        .await;
        assert_eq!(
            recorder.events,
            vec![content("a"), Event::Done("m-1".into(), "seed".into())]
        );
        assert_eq!(outcome.message_id, "m-1");
    }

    #[tokio::test]
    async fn test_nothing_read_after_terminal_record() {
        let mut polled_after_done = false;
        let chunks = stream::iter(vec![
            Bytes::from_static(b"data: {\"type\":\"content\",\"content\":\"a\"}\ndata: [DONE]\n"),
            Bytes::from_static(b"data: {\"type\":\"content\",\"content\":\"late\"}\n"),
        ])
        .enumerate()
        .map(|(index, chunk)| {
            if index > 0 {
                polled_after_done = true;
            }
            Ok::<_, ClientError>(chunk)
        });

        let mut recorder = Recorder::default();
        decode_stream(chunks, Framing::ServerSentEvents, "seed", &mut recorder)
            .await
            .unwrap();

        assert!(!polled_after_done);
        assert_eq!(recorder.answer(), "a");
        assert_eq!(recorder.terminal_count(), 1);
    }

    #[tokio::test]
    async fn test_records_after_terminal_in_same_chunk_are_dropped() {
        let body = "{\"type\":\"error\",\"error\":\"refused\"}\n{\"content\":\"late\"}\n{\"done\":true}\n";
        let (recorder, outcome) = run(&[body], Framing::NewlineDelimitedJson).await;

        assert_eq!(recorder.events, vec![Event::Error("Server error: refused".into())]);
        assert_eq!(outcome.completion, Completion::Failed);
    }

    #[tokio::test]
    async fn test_transport_failure_routes_to_error_callback() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"content\":\"part\"}\n")),
            Err(ClientError::Transport("connection reset".into())),
            Ok(Bytes::from_static(b"{\"content\":\"never\"}\n")),
        ]);
        let mut recorder = Recorder::default();
        let outcome = decode_stream(chunks, Framing::NewlineDelimitedJson, "seed", &mut recorder)
            .await
            .unwrap();

        assert_eq!(
            recorder.events,
            vec![content("part"), Event::Error("Transport error: connection reset".into())]
        );
        assert_eq!(outcome.answer, "part");
        assert_eq!(outcome.completion, Completion::Failed);
    }

    #[tokio::test]
    async fn test_errors_propagate_without_error_callback() {
        let chunks = stream::iter(vec![Err::<Bytes, _>(ClientError::Transport("dropped".into()))]);
        let result = decode_stream(chunks, Framing::ServerSentEvents, "seed", Collect).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));

        let body = stream::iter(vec![Ok(Bytes::from_static(b"data: {\"type\":\"error\",\"error\":\"no\"}\n"))]);
        let result = decode_stream(body, Framing::ServerSentEvents, "seed", Collect).await;
        assert!(matches!(result, Err(ClientError::Server(message)) if message == "no"));
    }

    #[tokio::test]
    async fn test_identifiers_fold_forward() {
        let body = "data: {\"type\":\"content\",\"content\":\"a\",\"messageId\":\"m-7\"}\n\
                     data: {\"type\":\"content\",\"content\":\"b\",\"sessionId\":\"s-7\"}\n\
                     data: [DONE]\n";
        let (recorder, outcome) = run(&[body], Framing::ServerSentEvents).await;
        assert_eq!(recorder.events.last(), Some(&Event::Done("m-7".into(), "s-7".into())));
        assert_eq!(outcome.session_id, "s-7");
    }

    const SSE_BODY: &str = "data: {\"type\":\"sources\",\"sources\":[{\"documentId\":\"d1\",\"chunkId\":\"c1\",\"chunkIndex\":0}]}\r\n\r\n\
        : keep-alive\n\n\
        data: {\"type\":\"content\",\"content\":\"Take 5 µg \"}\n\n\
        data: {\"type\":\"content\",\"content\":\"with water 💧.\\n\"}\n\n\
        data: {\"type\":\"content\",\"content\":\"Ask your doctor — 医師.\"}\n\n\
        data: {\"type\":\"done\",\"messageId\":\"m-1\",\"sessionId\":\"s-1\"}\n\n";

    const NDJSON_BODY: &str = "{\"content\":\"Take 5 µg \"}\n\
        {\"delta\":{\"content\":\"with water 💧.\\n\"}}\n\
        \"Ask your doctor — 医師.\"\n\
        {\"done\":true,\"messageId\":\"m-1\",\"sessionId\":\"s-1\"}";

    const EXPECTED_ANSWER: &str = "Take 5 µg with water 💧.\nAsk your doctor — 医師.";

    async fn assert_chunking_invariant(body: &str, framing: Framing) {
        let bytes = body.as_bytes();
        let (whole, _) = run_bytes(&[bytes], framing).await;
        assert_eq!(whole.answer(), EXPECTED_ANSWER);

        for split in 0..=bytes.len() {
            let (recorder, outcome) = run_bytes(&[&bytes[..split], &bytes[split..]], framing).await;
            assert_eq!(recorder.events, whole.events, "split at byte {}", split);
            assert_eq!(outcome.answer, EXPECTED_ANSWER);
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        let (recorder, _) = run_bytes(&singles, framing).await;
        assert_eq!(recorder.events, whole.events);
    }

    #[tokio::test]
    async fn test_chunking_invariance_sse() {
        assert_chunking_invariant(SSE_BODY, Framing::ServerSentEvents).await;
    }

    #[tokio::test]
    async fn test_chunking_invariance_ndjson() {
        assert_chunking_invariant(NDJSON_BODY, Framing::NewlineDelimitedJson).await;
    }

    #[tokio::test]
    async fn test_garbage_lines_do_not_change_events() {
        let clean = "{\"content\":\"a\"}\n{\"content\":\"b\"}\n{\"done\":true}\n";
        let noisy = "{\"content\":\"a\"}\nnot json\n{\"heartbeat\":1}\n[1,2]\n\n{\"content\":\"b\"}\n{\"type\":\"ping\"}\n{\"done\":true}\n";
        let (clean, _) = run(&[clean], Framing::NewlineDelimitedJson).await;
        let (noisy, _) = run(&[noisy], Framing::NewlineDelimitedJson).await;
        assert_eq!(clean.events, noisy.events);
    }

    #[tokio::test]
    async fn test_empty_body_completes() {
        let (recorder, outcome) = run(&[], Framing::Unknown).await;
        assert_eq!(recorder.events, vec![Event::Done(String::new(), "seed".into())]);
        assert_eq!(outcome.answer, "");
    }

    #[test]
    fn test_decode_complete_json_document() {
        let body = br#"{"content":"Full answer","sources":[{"documentId":"d1"}],"messageId":"m-3"}"#;
        let mut recorder = Recorder::default();
        let outcome = decode_complete(body, "seed", &mut recorder).unwrap();

        assert_eq!(recorder.events.len(), 3);
        assert_eq!(recorder.events[0], content("Full answer"));
        assert!(matches!(&recorder.events[1], Event::Sources(list) if list.len() == 1));
        assert_eq!(recorder.events[2], Event::Done("m-3".into(), "seed".into()));
        assert_eq!(outcome.answer, "Full answer");
    }

    #[test]
    fn test_decode_complete_plain_text() {
        let mut recorder = Recorder::default();
        decode_complete("Just text.".as_bytes(), "seed", &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![content("Just text."), Event::Done(String::new(), "seed".into())]
        );
    }

    #[test]
    fn test_decode_complete_error_body() {
        let result = decode_complete(br#"{"error":"quota exceeded"}"#, "seed", Collect);
        assert!(matches!(result, Err(ClientError::Server(message)) if message == "quota exceeded"));
    }

    #[test]
    fn test_decode_complete_multi_line_ndjson() {
        let body = b"{\"content\":\"A\"}\n{\"content\":\"B\"}\n{\"done\":true,\"messageId\":\"m-4\"}\n";
        let mut recorder = Recorder::default();
        let outcome = decode_complete(body, "seed", &mut recorder).unwrap();

        assert_eq!(
            recorder.events,
            vec![content("A"), content("B"), Event::Done("m-4".into(), "seed".into())]
        );
        assert_eq!(outcome.answer, "AB");
    }

    #[test]
    fn test_decode_complete_multi_line_plain_text() {
        let text = "First paragraph.\n\nSecond paragraph.\n";
        let mut recorder = Recorder::default();
        decode_complete(text.as_bytes(), "seed", &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![content(text), Event::Done(String::new(), "seed".into())]
        );
    }

    #[test]
    fn test_decode_complete_stops_at_terminal_line() {
        let body = b"{\"content\":\"A\"}\n{\"type\":\"error\",\"error\":\"cut off\"}\n{\"content\":\"late\"}\n";
        let mut recorder = Recorder::default();
        let outcome = decode_complete(body, "seed", &mut recorder).unwrap();

        assert_eq!(
            recorder.events,
            vec![content("A"), Event::Error("Server error: cut off".into())]
        );
        assert_eq!(outcome.completion, Completion::Failed);
    }

    #[test]
    fn test_decode_complete_empty_answer() {
        let mut recorder = Recorder::default();
        let outcome = decode_complete(br#"{"content":"","sessionId":"s-5"}"#, "seed", &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![content(""), Event::Done(String::new(), "s-5".into())]
        );
        assert_eq!(outcome.completion, Completion::Done);

        let outcome = decode_complete(br#"{"content":"","error":"ignored"}"#, "seed", Collect).unwrap();
        assert_eq!(outcome.answer, "");
    }

    #[test]
    fn test_decode_complete_answer_field() {
        let outcome = decode_complete(br#"{"answer":"A","sessionId":"s-2"}"#, "seed", Collect).unwrap();
        assert_eq!(outcome.answer, "A");
        assert_eq!(outcome.session_id, "s-2");
    }
}
