//! Splitting accumulated text into complete lines.

/// Take every complete line out of `buffer`.
///
/// Lines are split on `\n` with a trailing `\r` removed. Whatever follows the
/// last newline stays in `buffer` for the next read; if there is no newline at
/// all nothing is returned and the buffer is left intact.
///
/// `appended_from` is the buffer length before the latest read. The carried
/// tail holds no newline, so only the text after it is searched. An offset
/// that is not a char boundary of `buffer` searches the whole buffer.
///
/// # Example
/// ```
/// use clinchat::framer::take_lines;
///
/// let mut buffer = String::from("one\r\ntwo\nthr");
/// assert_eq!(take_lines(&mut buffer, 0), vec!["one", "two"]);
/// assert_eq!(buffer, "thr");
/// ```
pub fn take_lines(buffer: &mut String, appended_from: usize) -> Vec<String> {
    let start = if buffer.is_char_boundary(appended_from) {
        appended_from
    } else {
        0
    };
    let Some(last_newline) = buffer[start..].rfind('\n').map(|at| start + at) else {
        return Vec::new();
    };

    let rest = buffer.split_off(last_newline + 1);
    let complete = std::mem::replace(buffer, rest);

    complete
        .split_terminator('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Flush the unterminated tail at end of stream.
///
/// Returns the remaining text as one final line if it is non-empty, leaving
/// the buffer empty.
pub fn flush(buffer: &mut String) -> Option<String> {
    let rest = std::mem::take(buffer);
    let line = rest.strip_suffix('\r').unwrap_or(&rest);
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
