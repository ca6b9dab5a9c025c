//! Line scanning over an accumulated receive buffer.
//!
//! The AT protocol has no framing beyond line separators, so everything here
//! works on raw bytes: a header is only recognized when it begins a line, and
//! a response is complete once one of the final result tokens shows up
//! anywhere in the buffer and the line carrying it has ended.

use tracing::trace;

/// Tokens whose appearance marks a buffered response as complete, in the
/// order they are tried.
pub const TERMINATORS: &[&[u8]] = &[
    b"OK\r",
    b"ERROR\r",
    b"+CME ERROR:",
    PROMPT,
    b"CONNECT",
    b"NO CARRIER",
];

/// The data prompt, which ends a response without a line break.
pub const PROMPT: &[u8] = b"> ";

/// Carriage return appended to every outgoing command.
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Returns true for the bytes that separate lines.
#[inline]
pub fn is_line_break(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Find `header` at the start of any line in `buffer`.
///
/// Matching is anchored to line starts: when the current line does not begin
/// with `header`, the rest of that line and the following run of `\r`/`\n`
/// are skipped and matching resumes at the next line. Returns the offset of
/// the first match, or `None`. An empty header never matches.
pub fn find_header_at_line_start(buffer: &[u8], header: &[u8]) -> Option<usize> {
    if header.is_empty() {
        return None;
    }

    let mut line_start = 0;
    while line_start < buffer.len() {
        if buffer[line_start..].starts_with(header) {
            trace!(offset = line_start, "found header at line start");
            return Some(line_start);
        }

        let mut i = line_start;
        while i < buffer.len() && !is_line_break(buffer[i]) {
            i += 1;
        }
        while i < buffer.len() && is_line_break(buffer[i]) {
            i += 1;
        }
        line_start = i;
    }

    None
}

/// Returns the index of the terminator token found in `buffer`, if any.
///
/// Every position is tried left to right against every token in
/// [`TERMINATORS`] order, so a token anywhere in the buffer counts.
pub fn find_terminator(buffer: &[u8]) -> Option<(usize, &'static [u8])> {
    (0..buffer.len()).find_map(|idx| {
        TERMINATORS
            .iter()
            .find(|token| buffer[idx..].starts_with(token))
            .map(|token| (idx, *token))
    })
}

/// Find the line break at or after `from` and return its offset together
/// with the offset of the next line.
///
/// `\r\n`, a lone `\r` and a lone `\n` each end one line. A `\r` that is the
/// last byte of `buffer` may still be followed by `\n`, so it does not end a
/// line yet. Returns `None` while the line is still open.
pub fn find_line_end(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let brk = from + buffer.get(from..)?.iter().position(|&b| is_line_break(b))?;
    match (buffer[brk], buffer.get(brk + 1).copied()) {
        (b'\n', _) => Some((brk, brk + 1)),
        (_, None) => None,
        (_, Some(b'\n')) => Some((brk, brk + 2)),
        (_, Some(_)) => Some((brk, brk + 1)),
    }
}

/// Length of the complete response at the front of `buffer`, if any.
///
/// The response runs through the line break that ends the terminator's line
/// (see [`find_line_end`]), or right after [`PROMPT`]. Because of that the
/// result does not depend on how the bytes were chunked.
pub fn response_len(buffer: &[u8]) -> Option<usize> {
    let (idx, token) = find_terminator(buffer)?;
    let after = idx + token.len();
    if token == PROMPT {
        return Some(after);
    }
    // `OK\r` and `ERROR\r` carry their own carriage return.
    let from = if token.ends_with(b"\r") { after - 1 } else { after };
    find_line_end(buffer, from).map(|(_, next)| next)
}

/// Check whether `buffer` holds a complete response. See
/// [`response_len`].
pub fn is_response_complete(buffer: &[u8]) -> bool {
    response_len(buffer).is_some()
}

/// Check whether a response ends in `OK` once trailing line breaks are
/// trimmed.
pub fn is_response_ok(buffer: &[u8]) -> bool {
    trim_trailing_line_breaks(buffer).ends_with(b"OK")
}

/// Slice `buffer` without its trailing `\r`/`\n` run.
pub fn trim_trailing_line_breaks(buffer: &[u8]) -> &[u8] {
    let end = buffer
        .iter()
        .rposition(|&b| !is_line_break(b))
        .map_or(0, |i| i + 1);
    &buffer[..end]
}

/// Number of leading `\r`/`\n` bytes in `buffer`.
pub fn leading_line_breaks(buffer: &[u8]) -> usize {
    buffer.iter().take_while(|&&b| is_line_break(b)).count()
}

/// Encode a command for transmission.
///
/// Appends the single carriage return that frames an AT command.
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(cmd.len() + 1);
    buf.extend_from_slice(cmd.as_bytes());
    buf.push(COMMAND_TERMINATOR);
    buf
}
