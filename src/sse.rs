//! Server-Sent Events field helpers.
//!
//! Only the `data:` field carries records:
//! ```text
//! data: {"type": "content", "content": "Hel"}
//!
//! data: {"type": "content", "content": "lo"}
//!
//! data: [DONE]
//! ```
//! `event:`, `id:` and `:` comment lines carry nothing the decoder uses.

/// Field marker of a data line.
pub const DATA_MARKER: &str = "data:";

/// Sentinel payload that ends an event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Extract the payload of an SSE data line.
///
/// Strips the `data:` marker and at most one following space. Lines that are
/// not data lines return `None`.
///
/// # Example
/// ```
/// use clinchat::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// assert_eq!(parse_sse_line("data:[DONE]"), Some("[DONE]"));
/// assert_eq!(parse_sse_line("event: message"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_MARKER)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

/// Check if an SSE payload is the end-of-stream sentinel.
///
/// # Example
/// ```
/// use clinchat::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_SENTINEL
}
