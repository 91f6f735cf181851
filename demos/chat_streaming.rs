//! Streaming a single question from the chat API.
//!
//! Run with:
//! ```bash
//! export CLINCHAT_BASE_URL="https://chat.example.com/api"
//! export CLINCHAT_TOKEN="your-bearer-token"
//! RUST_LOG=clinchat=debug cargo run --example chat_streaming -- "What is a normal resting heart rate?"
//! ```

use std::io::Write;

use clinchat::client::ChatClient;
use clinchat::dispatch::Callbacks;
use clinchat::model::{ChatRequest, Completion};
use clinchat::options::{ClientOptions, SecretString};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = ClientOptions::from_env()?;
    // A missing token is reported by the client as `Unauthenticated`.
    let token = std::env::var("CLINCHAT_TOKEN").ok().map(SecretString::new);
    let client = ChatClient::new(options, token)?;

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "What is a normal resting heart rate?".to_string());
    let request = ChatRequest::new(question);

    let handler = Callbacks::new(|delta| {
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    })
    .with_sources(|sources| {
        println!("\n\n=== Sources ===");
        for source in sources {
            println!("{} (chunk {} #{})", source.document_id, source.chunk_id, source.chunk_index);
        }
    })
    .with_done(|message_id, session_id| {
        println!("\n\n=== Stream Complete ===");
        println!("message: {}  session: {}", message_id, session_id);
    })
    .with_error(|error| eprintln!("\nError in stream: {}", error));

    let outcome = client.stream_message(&request, handler).await?;

    if outcome.completion == Completion::Failed && !outcome.answer.is_empty() {
        eprintln!("(partial answer kept: {} characters)", outcome.answer.chars().count());
    }

    Ok(())
}
