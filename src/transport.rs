//! Reading a response body as a sequence of byte chunks.

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;

use crate::client::ClientError;
use crate::dispatch::StreamHandler;
use crate::model::{Framing, StreamOutcome};
use crate::stream::{decode_complete, decode_stream};

enum Body {
    Streaming(reqwest::Response),
    Whole(Bytes),
}

/// The Transport Reader: yields non-empty chunks until the body is exhausted.
///
/// A body that was already read to completion is a stream of one chunk.
pub struct TransportReader {
    framing: Framing,
    body: Body,
}

impl TransportReader {
    /// Wrap an open response. Framing comes from its `Content-Type`.
    pub fn from_response(response: reqwest::Response) -> Self {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let framing = Framing::from_content_type(content_type);

        Self {
            framing,
            body: Body::Streaming(response),
        }
    }

    /// Wrap a body that can only be read whole.
    pub fn whole(body: impl Into<Bytes>) -> Self {
        Self {
            framing: Framing::Unknown,
            body: Body::Whole(body.into()),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// The body as a stream of non-empty chunks.
    pub fn into_chunks(self) -> BoxStream<'static, Result<Bytes, ClientError>> {
        let chunks = match self.body {
            Body::Streaming(response) => response
                .bytes_stream()
                .map_err(|e| ClientError::Transport(e.to_string()))
                .boxed(),
            Body::Whole(bytes) => stream::once(future::ready(Ok(bytes))).boxed(),
        };

        chunks
            .try_filter(|chunk| future::ready(!chunk.is_empty()))
            .boxed()
    }

    /// Read everything at once.
    pub async fn read_to_end(self) -> Result<Bytes, ClientError> {
        match self.body {
            Body::Streaming(response) => response
                .bytes()
                .await
                .map_err(|e| ClientError::Transport(e.to_string())),
            Body::Whole(bytes) => Ok(bytes),
        }
    }

    /// Decode this body into `handler`.
    ///
    /// An open response runs the incremental loop. A body already read whole
    /// goes through [`decode_complete`], so plain-text answers survive.
    pub async fn decode<H: StreamHandler>(
        self,
        seed_session_id: &str,
        handler: H,
    ) -> Result<StreamOutcome, ClientError> {
        let framing = self.framing;
        match self.body {
            Body::Whole(bytes) => decode_complete(&bytes, seed_session_id, handler),
            body @ Body::Streaming(_) => {
                let chunks = Self { framing, body }.into_chunks();
                decode_stream(chunks, framing, seed_session_id, handler).await
            }
        }
    }
}
