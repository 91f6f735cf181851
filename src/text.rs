//! Incremental UTF-8 decoding of network chunks.
//!
//! A chunk boundary may fall inside a multi-byte character. The decoder keeps
//! the incomplete tail of one chunk and completes it with the head of the next,
//! so the text it produces never depends on how the body was split.

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Stateful UTF-8 decoder that survives split characters.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, appending the text to `out`.
    ///
    /// Bytes of a character that is not yet complete are held back until the
    /// next call. Invalid sequences are replaced with U+FFFD.
    pub fn decode_into(&mut self, chunk: &[u8], out: &mut String) {
        let joined;
        let mut input: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.pending);
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    // `valid_up_to` always ends on a char boundary.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());

                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT);
                            input = &rest[len..];
                        }
                        None => {
                            self.pending.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of input. A character still incomplete becomes U+FFFD.
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push(REPLACEMENT);
        }
    }

    /// Whether bytes of an incomplete character are held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// The Text Accumulator: decodes chunks onto the carry-over buffer.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    decoder: Utf8Decoder,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the decoded text of `chunk` to `buffer`.
    pub fn push(&mut self, chunk: &[u8], buffer: &mut String) {
        self.decoder.decode_into(chunk, buffer);
    }

    /// Append whatever the decoder still holds at end of stream.
    pub fn finish(&mut self, buffer: &mut String) {
        if self.decoder.has_pending() {
            tracing::debug!("Response body ended inside a UTF-8 sequence");
        }
        self.decoder.finish(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(decoder: &mut Utf8Decoder, chunk: &[u8]) -> String {
        let mut out = String::new();
        decoder.decode_into(chunk, &mut out);
        out
    }

    #[test]
    fn test_decode_ascii() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decode(&mut decoder, b"hello"), "hello");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decode_split_multibyte() {
        let text = "dose: 5 µg — ok 💊";
        let bytes = text.as_bytes();

        for split in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut out = String::new();
            decoder.decode_into(&bytes[..split], &mut out);
            decoder.decode_into(&bytes[split..], &mut out);
            decoder.finish(&mut out);
            assert_eq!(out, text, "split at {}", split);
        }
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let text = "日本語のテキスト";
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in text.as_bytes() {
            decoder.decode_into(std::slice::from_ref(byte), &mut out);
        }
        assert!(!decoder.has_pending());
        assert_eq!(out, text);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decode(&mut decoder, b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_character_at_end() {
        let mut decoder = Utf8Decoder::new();
        let mut out = decode(&mut decoder, &"é".as_bytes()[..1]);
        assert!(decoder.has_pending());
        decoder.finish(&mut out);
        assert_eq!(out, "\u{FFFD}");
    }

    #[test]
    fn test_accumulator_appends_to_buffer() {
        let mut accumulator = TextAccumulator::new();
        let mut buffer = String::from("carry ");
        accumulator.push(b"over", &mut buffer);
        accumulator.finish(&mut buffer);
        assert_eq!(buffer, "carry over");
    }

    #[test]
    fn test_accumulator_finish_replaces_truncated_character() {
        let mut accumulator = TextAccumulator::new();
        let mut buffer = String::new();
        accumulator.push(&"💊".as_bytes()[..2], &mut buffer);
        assert!(buffer.is_empty());
        accumulator.finish(&mut buffer);
        assert_eq!(buffer, "\u{FFFD}");
    }
}
