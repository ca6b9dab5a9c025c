//! Unsolicited result code (URC) handlers and dispatch.
//!
//! URCs share the byte stream with command responses. Before a buffer is
//! checked for completion, every registered URC line is cut out of it and
//! handed to its callback, so notifications never leak into a response body.
//! Text that matches no registered header stays in the buffer.
//!
//! A URC may be split across receive chunks. A line that begins like a URC
//! but has not ended yet is left at the tail of the buffer until the rest of
//! it arrives; see [`UrcTable::partial_urc_start`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{ProtocolError, ProtocolResult};
use crate::scanner::{
    find_header_at_line_start, find_line_end, is_line_break, leading_line_breaks,
};

/// Callback invoked with one URC line, header included, terminator excluded.
pub type UrcCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback that recognizes a URC and discards it.
///
/// Register it for headers that must never end up in a response but that the
/// application does not care about, e.g. `#RING`.
pub fn noop_urc(msg: &str) {
    debug!("Ignoring URC: {}", msg);
}

/// A single header → callback registration.
#[derive(Clone)]
pub struct UrcHandler {
    header: String,
    callback: UrcCallback,
}

impl UrcHandler {
    /// The header prefix this handler matches.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Invoke the callback with a URC line.
    pub fn call(&self, line: &str) {
        (self.callback)(line)
    }
}

impl fmt::Debug for UrcHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrcHandler")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Ordered, bounded table of URC handlers.
///
/// Handlers are tried in registration order. Registering a header that is
/// already present replaces its callback in place; handlers are never removed.
#[derive(Debug, Clone)]
pub struct UrcTable {
    handlers: Vec<UrcHandler>,
    capacity: usize,
    max_header_len: usize,
}

impl UrcTable {
    /// Create an empty table holding at most `capacity` handlers whose headers
    /// are at most `max_header_len` bytes long.
    pub fn new(capacity: usize, max_header_len: usize) -> Self {
        UrcTable {
            handlers: Vec::with_capacity(capacity),
            capacity,
            max_header_len,
        }
    }

    /// Register `callback` for lines starting with `header`.
    pub fn register<F>(&mut self, header: &str, callback: F) -> ProtocolResult<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register_arc(header, Arc::new(callback))
    }

    /// Register an already shared callback for lines starting with `header`.
    pub fn register_arc(&mut self, header: &str, callback: UrcCallback) -> ProtocolResult<()> {
        if header.is_empty() {
            return Err(ProtocolError::EmptyHeader);
        }
        if header.len() > self.max_header_len {
            return Err(ProtocolError::HeaderTooLong {
                max: self.max_header_len,
                actual: header.len(),
            });
        }

        if let Some(existing) = self.handlers.iter_mut().find(|h| h.header == header) {
            existing.callback = callback;
            debug!("Replaced handler for URC '{}'", header);
            return Ok(());
        }

        if self.handlers.len() >= self.capacity {
            return Err(ProtocolError::HandlerTableFull {
                capacity: self.capacity,
                header: header.to_string(),
            });
        }

        self.handlers.push(UrcHandler {
            header: header.to_string(),
            callback,
        });
        debug!("Added handler for URC '{}'", header);
        Ok(())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler has been registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate over handlers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &UrcHandler> {
        self.handlers.iter()
    }

    /// Cut every registered URC line out of `buffer`, invoking callbacks.
    ///
    /// Returns the number of URCs delivered. See [`dispatch_urcs`].
    pub fn dispatch(&self, buffer: &mut Vec<u8>) -> usize {
        dispatch_urcs(buffer, &self.handlers)
    }

    /// Offset of a trailing fragment that may still turn into a URC line.
    ///
    /// The last line of `buffer` is a fragment when it has not ended (see
    /// [`find_line_end`]) and it begins with a registered header, or is
    /// still short enough to grow into one. Everything before the returned
    /// offset is settled; the fragment itself must wait for more bytes.
    pub fn partial_urc_start(&self, buffer: &[u8]) -> Option<usize> {
        let trailing_cr = buffer.last() == Some(&b'\r');
        let open_end = buffer.len() - usize::from(trailing_cr);
        let start = buffer[..open_end]
            .iter()
            .rposition(|&b| is_line_break(b))
            .map_or(0, |i| i + 1);
        if start == open_end {
            return None;
        }

        let tail = &buffer[start..open_end];
        let maybe_urc = self.handlers.iter().any(|h| {
            let header = h.header.as_bytes();
            tail.starts_with(header) || (!trailing_cr && header.starts_with(tail))
        });
        maybe_urc.then_some(start)
    }
}

/// Cut every line matching one of `handlers` out of `buffer`.
///
/// For each handler in order, every line-anchored match that has ended is
/// passed to the callback without its terminator and removed together with
/// it. Scanning for the same handler then restarts from the beginning of the
/// shortened buffer. A match that has not ended yet stays where it is. Finally
/// any leading run of line breaks is stripped. Returns the number of URCs
/// delivered.
pub fn dispatch_urcs(buffer: &mut Vec<u8>, handlers: &[UrcHandler]) -> usize {
    let mut delivered = 0;

    for handler in handlers {
        if buffer.is_empty() {
            break;
        }
        trace!("Checking URC with header {}", handler.header);

        while let Some(start) = find_header_at_line_start(buffer, handler.header.as_bytes()) {
            let Some((end, cut)) = find_line_end(buffer, start) else {
                trace!(offset = start, "URC line not finished yet");
                break;
            };

            let line = String::from_utf8_lossy(&buffer[start..end]).into_owned();
            debug!("Reporting URC: {}", line);
            handler.call(&line);
            delivered += 1;

            buffer.drain(start..cut);
            trace!(remaining = buffer.len(), "removed URC from buffer");
        }
    }

    let leading = leading_line_breaks(buffer);
    if leading > 0 {
        buffer.drain(..leading);
    }

    delivered
}
