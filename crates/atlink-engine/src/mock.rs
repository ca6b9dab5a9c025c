//! Scripted in-memory modem.
//!
//! [`MockModem`] implements [`Transport`] by matching every transmitted
//! command against a reply script and feeding the scripted chunks back
//! through the receive notifier. Tests and demos can also inject arbitrary
//! bytes, e.g. URCs, at any time.
//!
//! Replies are delivered from inside `send` unless a reply delay is set, in
//! which case a short-lived thread delivers them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::TransportError;
use crate::transport::{ChannelHandle, RxNotify, Transport};

#[derive(Debug, Clone)]
struct Reply {
    prefix: String,
    chunks: Vec<Vec<u8>>,
}

struct Channel {
    instance: u8,
    on_rx: RxNotify,
    rx: VecDeque<u8>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    channels: HashMap<ChannelHandle, Channel>,
    replies: Vec<Reply>,
    sent: Vec<(u8, String)>,
    opens: usize,
    fail_open: bool,
    fail_sends: usize,
    reply_delay: Option<Duration>,
}

/// A scripted modem shared by every instance of a registry.
#[derive(Clone)]
pub struct MockModem {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockModem")
            .field("channels", &state.channels.len())
            .field("replies", &state.replies.len())
            .field("sent", &state.sent.len())
            .finish()
    }
}

impl Default for MockModem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModem {
    /// A modem that answers `ATE0` with `OK` and ignores everything else.
    pub fn new() -> Self {
        let modem = MockModem {
            state: Arc::new(Mutex::new(MockState::default())),
        };
        modem.reply("ATE0", "OK\r\n");
        modem
    }

    /// Answer commands starting with `prefix` with `response` in one chunk.
    ///
    /// Later scripts take precedence over earlier ones.
    pub fn reply(&self, prefix: &str, response: impl AsRef<[u8]>) {
        self.reply_chunks(prefix, vec![response.as_ref().to_vec()]);
    }

    /// Answer commands starting with `prefix` with `chunks`, one receive
    /// notification per chunk. An empty list scripts silence.
    pub fn reply_chunks(&self, prefix: &str, chunks: Vec<Vec<u8>>) {
        self.state.lock().replies.push(Reply {
            prefix: prefix.to_string(),
            chunks,
        });
    }

    /// Deliver scripted replies from a separate thread after `delay`.
    pub fn set_reply_delay(&self, delay: Option<Duration>) {
        self.state.lock().reply_delay = delay;
    }

    /// Make the next `count` transmissions fail.
    pub fn fail_sends(&self, count: usize) {
        self.state.lock().fail_sends = count;
    }

    /// Make `open` fail until reset.
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Every command transmitted so far, as `(instance, text)` without `\r`.
    pub fn sent(&self) -> Vec<(u8, String)> {
        self.state.lock().sent.clone()
    }

    /// Commands transmitted on `instance`.
    pub fn sent_on(&self, instance: u8) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(i, _)| *i == instance)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Whether `instance` has an open channel.
    pub fn is_open(&self, instance: u8) -> bool {
        self.state.lock().channels.values().any(|c| c.instance == instance)
    }

    /// Push `bytes` to `instance` as a single chunk. Returns false if the
    /// instance has no open channel.
    pub fn inject(&self, instance: u8, bytes: impl AsRef<[u8]>) -> bool {
        let handle = {
            let state = self.state.lock();
            state
                .channels
                .iter()
                .find(|(_, c)| c.instance == instance)
                .map(|(h, _)| *h)
        };
        match handle {
            Some(handle) => {
                deliver(&self.state, handle, &[bytes.as_ref().to_vec()]);
                true
            }
            None => false,
        }
    }

    /// Push `bytes` to `instance` one byte per notification.
    pub fn inject_bytewise(&self, instance: u8, bytes: impl AsRef<[u8]>) -> bool {
        bytes.as_ref().iter().all(|b| self.inject(instance, [*b]))
    }
}

/// Queue each chunk on `handle` and notify, never holding the lock across
/// the notifier.
fn deliver(state: &Mutex<MockState>, handle: ChannelHandle, chunks: &[Vec<u8>]) {
    for chunk in chunks {
        let notify = {
            let mut state = state.lock();
            let Some(channel) = state.channels.get_mut(&handle) else {
                trace!("Mock modem dropping {} bytes for closed {}", chunk.len(), handle);
                return;
            };
            channel.rx.extend(chunk.iter().copied());
            Arc::clone(&channel.on_rx)
        };
        notify(handle, chunk.len());
    }
}

impl Transport for MockModem {
    fn open(&self, instance: u8, on_rx: RxNotify) -> Result<ChannelHandle, TransportError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(TransportError::OpenFailed {
                instance,
                reason: "scripted failure".to_string(),
            });
        }
        state.next_handle += 1;
        let handle = ChannelHandle(state.next_handle);
        state.channels.insert(
            handle,
            Channel {
                instance,
                on_rx,
                rx: VecDeque::new(),
            },
        );
        state.opens += 1;
        Ok(handle)
    }

    fn send(&self, handle: ChannelHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let (chunks, delay) = {
            let mut state = self.state.lock();
            let instance = state
                .channels
                .get(&handle)
                .map(|c| c.instance)
                .ok_or(TransportError::Closed)?;
            if state.fail_sends > 0 {
                state.fail_sends -= 1;
                return Err(TransportError::SendFailed {
                    len: bytes.len(),
                    reason: "scripted failure".to_string(),
                });
            }

            let text = String::from_utf8_lossy(bytes);
            let cmd = text.strip_suffix('\r').unwrap_or(&text).to_string();
            let chunks = state
                .replies
                .iter()
                .rev()
                .find(|r| cmd.starts_with(&r.prefix))
                .map(|r| r.chunks.clone())
                .unwrap_or_default();
            trace!("Mock modem got '{}' on {}, {} reply chunks", cmd, handle, chunks.len());
            state.sent.push((instance, cmd));
            (chunks, state.reply_delay)
        };

        match delay {
            None => deliver(&self.state, handle, &chunks),
            Some(delay) => {
                let state = Arc::clone(&self.state);
                thread::spawn(move || {
                    thread::sleep(delay);
                    deliver(&state, handle, &chunks);
                });
            }
        }
        Ok(())
    }

    fn receive(&self, handle: ChannelHandle, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        let channel = state.channels.get_mut(&handle).ok_or(TransportError::Closed)?;
        let n = buf.len().min(channel.rx.len());
        for (dst, src) in buf.iter_mut().zip(channel.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn close(&self, handle: ChannelHandle) {
        self.state.lock().channels.remove(&handle);
    }
}
