//! Classifying complete lines into [`Record`]s.
//!
//! The server has shipped several payload shapes over time. Each line is
//! classified on its own by walking [`MATCHERS`] in order; the first matcher
//! that accepts the payload decides the record. A line nothing accepts is
//! [`Record::Unrecognized`] and never fails the stream.
//!
//! Shapes, in precedence order:
//! ```text
//! {"type":"content","content":"Hel"}              typed content
//! {"type":"sources","sources":[...]}               typed sources
//! {"type":"done","messageId":"m","sessionId":"s"}  typed done
//! {"type":"error","error":"..."}                   typed error
//! {"done":true}                                    completion flag (not SSE)
//! {"content":"Hel","sources":[...]}                legacy text
//! {"sources":[...]}                                legacy sources
//! {"delta":{"content":"Hel"}}                      nested delta
//! "Hel"                                            bare string
//! ```

use serde_json::{Map, Value};

use crate::model::{ChatSource, Framing, Record};
use crate::sse::{is_done_marker, parse_sse_line};
use crate::stream::StreamState;

const TYPE_FIELD: &str = "type";
const TEXT_FIELD: &str = "content";
const SOURCES_FIELD: &str = "sources";
const DONE_FLAG: &str = "done";
const DEFAULT_ERROR_MESSAGE: &str = "The server reported an error without a message";
const LOGGED_LINE_LIMIT: usize = 120;

/// One entry of the classification cascade.
pub struct Matcher {
    /// Name used in logs and tests.
    pub name: &'static str,
    applies: fn(Framing) -> bool,
    extract: fn(&Value) -> Option<Record>,
}

/// The classification cascade. First match wins.
pub const MATCHERS: &[Matcher] = &[
    Matcher { name: "typed_content", applies: any_framing, extract: typed_content },
    Matcher { name: "typed_sources", applies: any_framing, extract: typed_sources },
    Matcher { name: "typed_done", applies: any_framing, extract: typed_done },
    Matcher { name: "typed_error", applies: any_framing, extract: typed_error },
    Matcher {
        name: "completion_flag",
        applies: Framing::accepts_completion_flag,
        extract: completion_flag,
    },
    Matcher { name: "legacy_text", applies: any_framing, extract: legacy_text },
    Matcher { name: "legacy_sources", applies: any_framing, extract: legacy_sources },
    Matcher { name: "nested_delta", applies: any_framing, extract: nested_delta },
    Matcher { name: "bare_string", applies: any_framing, extract: bare_string },
];

/// Classify one complete line under the state's framing.
///
/// Blank lines yield `None`. Identifiers found on a matched object are folded
/// into `state`, as are sources riding along on a legacy text payload; `Done`
/// records carry the identifiers known after that fold.
pub fn recognize(line: &str, state: &mut StreamState) -> Option<Record> {
    if line.trim().is_empty() {
        return None;
    }

    let payload = match state.framing {
        Framing::ServerSentEvents => match parse_sse_line(line) {
            Some(payload) if is_done_marker(payload) => return Some(state.done_record()),
            Some(payload) => payload,
            None => return Some(unrecognized(line)),
        },
        Framing::NewlineDelimitedJson | Framing::Unknown => line,
    };

    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return Some(unrecognized(line));
    };

    let Some((matcher, record)) = classify(&value, state.framing) else {
        return Some(unrecognized(line));
    };

    if let Value::Object(object) = &value {
        fold_identifiers(object, state);
        if matcher.name == "legacy_text" {
            state.pending_sources = sources_field(object);
        }
    }

    Some(match record {
        Record::Done { .. } => state.done_record(),
        record => record,
    })
}

/// Run the cascade over an already parsed payload.
pub fn classify(value: &Value, framing: Framing) -> Option<(&'static Matcher, Record)> {
    MATCHERS
        .iter()
        .filter(|matcher| (matcher.applies)(framing))
        .find_map(|matcher| (matcher.extract)(value).map(|record| (matcher, record)))
}

fn unrecognized(line: &str) -> Record {
    let shown: String = line.chars().take(LOGGED_LINE_LIMIT).collect();
    tracing::debug!(line = %shown, "Skipping unrecognized stream line");
    Record::Unrecognized
}

fn any_framing(_: Framing) -> bool {
    true
}

fn typed_content(value: &Value) -> Option<Record> {
    let object = object_with_type(value, "content")?;
    text_field(object).map(|text| Record::Content(text.to_string()))
}

fn typed_sources(value: &Value) -> Option<Record> {
    let object = object_with_type(value, "sources")?;
    sources_field(object).map(Record::Sources)
}

fn typed_done(value: &Value) -> Option<Record> {
    object_with_type(value, "done").map(|_| placeholder_done())
}

fn typed_error(value: &Value) -> Option<Record> {
    object_with_type(value, "error").map(|object| Record::Error(error_message(object)))
}

fn completion_flag(value: &Value) -> Option<Record> {
    let flag = value.as_object()?.get(DONE_FLAG)?.as_bool()?;
    flag.then(placeholder_done)
}

fn legacy_text(value: &Value) -> Option<Record> {
    let object = untyped_object(value)?;
    text_field(object).map(|text| Record::Content(text.to_string()))
}

fn legacy_sources(value: &Value) -> Option<Record> {
    let object = untyped_object(value)?;
    sources_field(object).map(Record::Sources)
}

fn nested_delta(value: &Value) -> Option<Record> {
    let object = value.as_object()?;

    let delta = object.get("delta").or_else(|| {
        object
            .get("choices")?
            .as_array()?
            .first()?
            .as_object()?
            .get("delta")
    })?;

    let delta = delta.as_object()?;
    delta
        .get(TEXT_FIELD)
        .or_else(|| delta.get("text"))?
        .as_str()
        .map(|text| Record::Content(text.to_string()))
}

fn bare_string(value: &Value) -> Option<Record> {
    value.as_str().map(|text| Record::Content(text.to_string()))
}

fn object_with_type<'a>(value: &'a Value, kind: &str) -> Option<&'a Map<String, Value>> {
    let object = value.as_object()?;
    (object.get(TYPE_FIELD)?.as_str()? == kind).then_some(object)
}

fn untyped_object(value: &Value) -> Option<&Map<String, Value>> {
    let object = value.as_object()?;
    match object.get(TYPE_FIELD) {
        None | Some(Value::Null) => Some(object),
        Some(_) => None,
    }
}

fn text_field(object: &Map<String, Value>) -> Option<&str> {
    object.get(TEXT_FIELD)?.as_str()
}

/// Parse a `sources` list, skipping entries that are not citation objects.
pub(crate) fn sources_field(object: &Map<String, Value>) -> Option<Vec<ChatSource>> {
    let list = object.get(SOURCES_FIELD)?.as_array()?;
    Some(
        list.iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
    )
}

pub(crate) fn error_message(object: &Map<String, Value>) -> String {
    let nested = object
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str);

    object
        .get("error")
        .and_then(Value::as_str)
        .or(nested)
        .or_else(|| object.get("message").and_then(Value::as_str))
        .unwrap_or(DEFAULT_ERROR_MESSAGE)
        .to_string()
}

/// Identifiers are filled in from the stream state once folding is done.
fn placeholder_done() -> Record {
    Record::Done {
        message_id: String::new(),
        session_id: String::new(),
    }
}

fn string_field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| object.get(*name).and_then(Value::as_str))
        .filter(|value| !value.is_empty())
}

pub(crate) fn fold_identifiers(object: &Map<String, Value>, state: &mut StreamState) {
    if let Some(message_id) = string_field(object, &["messageId", "message_id"]) {
        state.message_id = message_id.to_string();
    }
    if let Some(session_id) = string_field(object, &["sessionId", "session_id"]) {
        state.session_id = session_id.to_string();
    }
}
