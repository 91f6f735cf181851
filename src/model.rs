//! Data models shared by the decoder and the chat client.

use serde::{Deserialize, Serialize};

/// A citation attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatSource {
    #[serde(default, alias = "document_id")]
    pub document_id: String,

    #[serde(default, alias = "chunk_id")]
    pub chunk_id: String,

    #[serde(default, alias = "chunk_index")]
    pub chunk_index: u32,
}

/// Line-oriented wire convention of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`: records arrive as `data: <payload>` lines.
    ServerSentEvents,
    /// `application/x-ndjson`: one JSON document per line.
    NewlineDelimitedJson,
    /// Anything else; treated like newline-delimited JSON.
    Unknown,
}

impl Framing {
    /// Pick the framing from a declared content type.
    ///
    /// # Example
    /// ```
    /// use clinchat::model::Framing;
    ///
    /// assert_eq!(Framing::from_content_type(Some("text/event-stream; charset=utf-8")), Framing::ServerSentEvents);
    /// assert_eq!(Framing::from_content_type(Some("application/x-ndjson")), Framing::NewlineDelimitedJson);
    /// assert_eq!(Framing::from_content_type(Some("application/json")), Framing::Unknown);
    /// assert_eq!(Framing::from_content_type(None), Framing::Unknown);
    /// ```
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Framing::Unknown;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "text/event-stream" => Framing::ServerSentEvents,
            "application/x-ndjson" | "application/ndjson" | "application/jsonl"
            | "application/x-jsonlines" => Framing::NewlineDelimitedJson,
            _ => Framing::Unknown,
        }
    }

    /// Whether a boolean `done` flag counts as completion in this framing.
    pub fn accepts_completion_flag(self) -> bool {
        !matches!(self, Framing::ServerSentEvents)
    }
}

/// One classified line of a response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A delta of answer text.
    Content(String),

    /// Citation list; supersedes any earlier one.
    Sources(Vec<ChatSource>),

    /// Successful completion.
    Done {
        message_id: String,
        session_id: String,
    },

    /// Server-signaled failure.
    Error(String),

    /// A line no known payload shape matched.
    Unrecognized,
}

impl Record {
    /// `Done` and `Error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Record::Done { .. } | Record::Error(_))
    }
}

/// How a decode call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Explicit `Done` record, `[DONE]` sentinel, or end of body.
    Done,
    /// Server `Error` record or transport failure.
    Failed,
}

/// Everything a decode call accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Concatenation of every dispatched content delta.
    pub answer: String,

    /// The last dispatched citation list.
    pub sources: Vec<ChatSource>,

    pub message_id: String,

    pub session_id: String,

    pub completion: Completion,
}

/// Request body for both the streaming and the non-streaming endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The user's question
    pub message: String,

    /// Conversation to continue; the server starts a new one when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Restrict retrieval to these documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            document_ids: Vec::new(),
        }
    }

    /// Continue an existing conversation.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add a document to restrict retrieval to.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_ids.push(document_id.into());
        self
    }
}

/// Result of the non-streaming request variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<ChatSource>,
    pub message_id: String,
    pub session_id: String,
}

impl From<StreamOutcome> for ChatResponse {
    fn from(outcome: StreamOutcome) -> Self {
        ChatResponse {
            answer: outcome.answer,
            sources: outcome.sources,
            message_id: outcome.message_id,
            session_id: outcome.session_id,
        }
    }
}
