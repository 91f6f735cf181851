//! Chat client and error types.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;

use crate::dispatch::{Collect, StreamHandler};
use crate::http::{add_extra_headers, build_http_client};
use crate::model::{ChatRequest, ChatResponse, Framing, StreamOutcome};
use crate::options::{ClientOptions, SecretString};
use crate::stream::decode_complete;
use crate::transport::TransportReader;

const STREAM_ACCEPT: &str = "text/event-stream, application/x-ndjson";
const MESSAGE_ACCEPT: &str = "application/json";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not authenticated: no bearer token available")]
    Unauthenticated,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Source of the bearer token sent with every request.
///
/// Returning `Ok(None)` means the user is signed out; requests then fail with
/// [`ClientError::Unauthenticated`] before anything is sent.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<SecretString>, ClientError>;
}

#[async_trait]
impl CredentialProvider for SecretString {
    async fn bearer_token(&self) -> Result<Option<SecretString>, ClientError> {
        Ok(Some(self.clone()))
    }
}

#[async_trait]
impl CredentialProvider for Option<SecretString> {
    async fn bearer_token(&self) -> Result<Option<SecretString>, ClientError> {
        Ok(self.clone())
    }
}

/// Client for the chat endpoints.
///
/// # Example
/// ```no_run
/// use clinchat::client::ChatClient;
/// use clinchat::dispatch::Callbacks;
/// use clinchat::model::ChatRequest;
/// use clinchat::options::{ClientOptions, SecretString};
///
/// # async fn run() -> Result<(), clinchat::ClientError> {
/// let client = ChatClient::new(
///     ClientOptions::new("https://chat.example.com/api"),
///     SecretString::from("token"),
/// )?;
///
/// let request = ChatRequest::new("Can I take ibuprofen with my prescription?");
/// let outcome = client
///     .stream_message(&request, Callbacks::new(|delta| print!("{}", delta)))
///     .await?;
/// println!("\nsession {}", outcome.session_id);
/// # Ok(())
/// # }
/// ```
pub struct ChatClient<C> {
    options: ClientOptions,
    credentials: C,
    http: reqwest::Client,
}

impl<C: CredentialProvider> ChatClient<C> {
    pub fn new(options: ClientOptions, credentials: C) -> Result<Self, ClientError> {
        let http = build_http_client(&options)?;
        Ok(Self {
            options,
            credentials,
            http,
        })
    }

    /// Send a question and decode the streamed answer into `handler`.
    ///
    /// Missing credentials and non-success statuses are returned before any
    /// callback fires. Everything after that goes through the handler.
    pub async fn stream_message<H: StreamHandler>(
        &self,
        request: &ChatRequest,
        handler: H,
    ) -> Result<StreamOutcome, ClientError> {
        let response = self
            .post(&self.options.stream_url(), request, STREAM_ACCEPT)
            .await?;
        let reader = TransportReader::from_response(response);

        reader.decode(seed_session_id(request), handler).await
    }

    /// Send a question and wait for the whole answer.
    ///
    /// A server that streams anyway is decoded incrementally, so the result
    /// does not depend on how the server chose to reply.
    pub async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let response = self
            .post(&self.options.message_url(), request, MESSAGE_ACCEPT)
            .await?;
        let reader = TransportReader::from_response(response);
        let seed = seed_session_id(request);

        let outcome = match reader.framing() {
            Framing::Unknown => {
                let body = reader.read_to_end().await?;
                decode_complete(&body, seed, Collect)?
            }
            Framing::ServerSentEvents | Framing::NewlineDelimitedJson => {
                reader.decode(seed, Collect).await?
            }
        };

        Ok(outcome.into())
    }

    async fn post(
        &self,
        url: &str,
        request: &ChatRequest,
        accept: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let token = self
            .credentials
            .bearer_token()
            .await?
            .ok_or(ClientError::Unauthenticated)?;

        let mut req = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .header(ACCEPT, accept)
            .header(CONTENT_TYPE, "application/json");

        req = add_extra_headers(req, &self.options.extra_headers);

        tracing::debug!(%url, session_id = ?request.session_id, "Sending chat request");
        let response = req.json(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Chat request rejected");
            return Err(handle_error_response(status, &body));
        }

        Ok(response)
    }
}

fn seed_session_id(request: &ChatRequest) -> &str {
    request.session_id.as_deref().unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Map a non-success response to an error.
fn handle_error_response(status: reqwest::StatusCode, body: &str) -> ClientError {
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return ClientError::Unauthenticated;
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message.or(parsed.error))
        .unwrap_or_else(|| body.to_string());

    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}
