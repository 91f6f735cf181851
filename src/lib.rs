//! # clinchat - streaming answer decoder for a clinical chat API
//!
//! The chat API answers questions over a long-lived chunked HTTP response.
//! This crate turns that byte stream into typed events (text deltas, citation
//! lists, completion, error) as the bytes arrive.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Event-stream (`text/event-stream`) and newline-delimited JSON bodies
//! - Tolerant of arbitrary chunk splits, including inside UTF-8 characters
//! - Accepts every historical payload shape the server has shipped
//! - Plain send-and-wait requests share the same decoder
//!
//! ## Architecture
//!
//! One decode call runs these pieces in order for every chunk:
//!
//! 1. **[`transport`]** pulls byte chunks from the response body
//! 2. **[`text`]** decodes them onto a carry-over buffer
//! 3. **[`framer`]** splits off complete lines
//! 4. **[`recognize`]** classifies each line into a [`Record`]
//! 5. **[`dispatch`]** delivers records to a [`StreamHandler`]
//!
//! [`stream`] owns the per-call state and the loop.
//!
//! ## Example
//! ```no_run
//! use clinchat::client::ChatClient;
//! use clinchat::dispatch::Callbacks;
//! use clinchat::model::ChatRequest;
//! use clinchat::options::{ClientOptions, SecretString};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::new(
//!         ClientOptions::new("https://chat.example.com/api"),
//!         SecretString::from("bearer-token"),
//!     )?;
//!
//!     let request = ChatRequest::new("What does my lab report say about iron?");
//!     let handler = Callbacks::new(|delta| print!("{}", delta))
//!         .with_sources(|sources| println!("\n[{} sources]", sources.len()))
//!         .with_done(|message_id, _| println!("\n(done: {})", message_id));
//!
//!     client.stream_message(&request, handler).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod dispatch;
pub mod framer;
pub mod http;
pub mod model;
pub mod options;
pub mod recognize;
pub mod sse;
pub mod stream;
pub mod text;
pub mod transport;

// Re-exports for convenience
pub use client::{ChatClient, ClientError, CredentialProvider};
pub use dispatch::{Callbacks, StreamHandler};
pub use model::{ChatRequest, ChatResponse, ChatSource, Framing, Record, StreamOutcome};
pub use stream::{decode_complete, decode_stream, StreamState};
