//! The byte channel underneath an AT instance.
//!
//! A transport opens one channel per instance, transmits command bytes, and
//! announces received bytes through the notifier given at open time. The
//! engine then pulls exactly the announced number of bytes with
//! [`Transport::receive`].
//!
//! Transports must not hold their own locks while calling the notifier: the
//! notifier takes the instance lock and calls back into `receive`.

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

/// Opaque identifier of an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u64);

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Receive notification: `(handle, available_bytes)`.
pub type RxNotify = Arc<dyn Fn(ChannelHandle, usize) + Send + Sync>;

/// A command channel to the modem.
pub trait Transport: Send + Sync {
    /// Open the channel for `instance`. `on_rx` is invoked whenever bytes
    /// become available on it.
    fn open(&self, instance: u8, on_rx: RxNotify) -> Result<ChannelHandle, TransportError>;

    /// Transmit `bytes` on an open channel.
    fn send(&self, handle: ChannelHandle, bytes: &[u8]) -> Result<(), TransportError>;

    /// Copy up to `buf.len()` available bytes into `buf`, returning the count.
    fn receive(&self, handle: ChannelHandle, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Release the channel. Further notifications for `handle` stop.
    fn close(&self, handle: ChannelHandle);
}
