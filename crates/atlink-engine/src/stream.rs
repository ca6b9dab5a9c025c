//! TCP stream transport.
//!
//! Connects each instance to a modem AT port exposed over TCP, for example by
//! a serial-to-network bridge. Every open channel gets one reader thread that
//! queues incoming bytes and fires the receive notifier.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::transport::{ChannelHandle, RxNotify, Transport};

const READ_CHUNK: usize = 1024;

struct StreamChannel {
    writer: TcpStream,
    rx: Arc<Mutex<VecDeque<u8>>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// [`Transport`] over one TCP connection per instance.
pub struct TcpTransport {
    default_addr: String,
    addrs: HashMap<u8, String>,
    next_handle: Mutex<u64>,
    channels: Mutex<HashMap<ChannelHandle, StreamChannel>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("default_addr", &self.default_addr)
            .field("addrs", &self.addrs)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Connect every instance to `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            default_addr: addr.into(),
            addrs: HashMap::new(),
            next_handle: Mutex::new(0),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Connect `instance` to `addr` instead of the default address.
    pub fn with_instance_addr(mut self, instance: u8, addr: impl Into<String>) -> Self {
        self.addrs.insert(instance, addr.into());
        self
    }

    fn addr_for(&self, instance: u8) -> &str {
        self.addrs.get(&instance).unwrap_or(&self.default_addr)
    }
}

fn reader_loop(
    mut stream: TcpStream,
    handle: ChannelHandle,
    rx: Arc<Mutex<VecDeque<u8>>>,
    stop: Arc<AtomicBool>,
    on_rx: RxNotify,
) {
    let mut buf = [0u8; READ_CHUNK];
    while !stop.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("AT port on {} closed by peer", handle);
                break;
            }
            Ok(n) => {
                rx.lock().extend(buf[..n].iter().copied());
                trace!("Read {} bytes on {}", n, handle);
                if !stop.load(Ordering::Acquire) {
                    on_rx(handle, n);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    warn!("Read error on {}: {}", handle, e);
                }
                break;
            }
        }
    }
}

impl Transport for TcpTransport {
    fn open(&self, instance: u8, on_rx: RxNotify) -> Result<ChannelHandle, TransportError> {
        let addr = self.addr_for(instance).to_string();
        let writer = TcpStream::connect(&addr).map_err(|e| TransportError::OpenFailed {
            instance,
            reason: format!("{}: {}", addr, e),
        })?;
        writer.set_nodelay(true)?;
        let reader_stream = writer.try_clone()?;

        let handle = {
            let mut next = self.next_handle.lock();
            *next += 1;
            ChannelHandle(*next)
        };

        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let rx = Arc::clone(&rx);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("at-rx-{}", instance))
                .spawn(move || reader_loop(reader_stream, handle, rx, stop, on_rx))?
        };

        debug!("Connected AT instance {} to {} as {}", instance, addr, handle);
        self.channels.lock().insert(
            handle,
            StreamChannel {
                writer,
                rx,
                stop,
                reader: Some(reader),
            },
        );
        Ok(handle)
    }

    fn send(&self, handle: ChannelHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = {
            let channels = self.channels.lock();
            let channel = channels.get(&handle).ok_or(TransportError::Closed)?;
            channel.writer.try_clone()?
        };
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| TransportError::SendFailed {
                len: bytes.len(),
                reason: e.to_string(),
            })
    }

    fn receive(&self, handle: ChannelHandle, buf: &mut [u8]) -> Result<usize, TransportError> {
        let rx = {
            let channels = self.channels.lock();
            Arc::clone(&channels.get(&handle).ok_or(TransportError::Closed)?.rx)
        };
        let mut rx = rx.lock();
        let n = buf.len().min(rx.len());
        for (dst, src) in buf.iter_mut().zip(rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn close(&self, handle: ChannelHandle) {
        let Some(mut channel) = self.channels.lock().remove(&handle) else {
            return;
        };
        channel.stop.store(true, Ordering::Release);
        let _ = channel.writer.shutdown(Shutdown::Both);
        if let Some(reader) = channel.reader.take() {
            let _ = reader.join();
        }
        debug!("Disconnected {}", handle);
    }
}
