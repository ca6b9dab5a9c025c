//! A single AT instance: one channel, one command in flight at a time.
//!
//! The instance owns the accumulation buffer, the URC handler table and the
//! response slot ring. Two threads meet here:
//!
//! - the issuer thread, which installs a pending command, transmits it and
//!   blocks on a one-shot completion channel until the response arrives or
//!   the timeout expires;
//! - the receive thread, driven by the transport's notifier, which pulls
//!   announced bytes, strips URCs, and completes the pending command once a
//!   terminator shows up.
//!
//! Both sides take the same state lock. Whichever side removes the pending
//! record first decides the outcome, so a response landing exactly at the
//! timeout is either delivered or counted as a timeout, never both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use atlink_protocol::{encode_command, is_response_ok, response_len, UrcTable};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::config::{EngineConfig, OverflowPolicy};
use crate::error::{AtError, AtResult};
use crate::guard::{self, DispatchGuard};
use crate::policy::LogPolicy;
use crate::slots::ResponseRing;
use crate::stats::{InstanceStats, StatsCounters};
use crate::transport::{ChannelHandle, RxNotify, Transport};

// ============================================================================
// State
// ============================================================================

/// Outcome delivered to a waiting issuer.
#[derive(Debug)]
enum Completion {
    Response { slot: usize },
    Failed(AtError),
}

/// The command currently waiting for its response.
#[derive(Debug)]
struct PendingCommand {
    seq: u64,
    slot: usize,
    quiet: bool,
    force_log: bool,
    sent_at: Instant,
    notify: Sender<Completion>,
}

impl PendingCommand {
    fn complete(self, outcome: Completion) {
        // Bounded(1) and sent at most once, so this never blocks. The waiter
        // may already be gone after a timeout.
        let _ = self.notify.try_send(outcome);
    }
}

#[derive(Debug)]
struct InstanceState {
    handle: Option<ChannelHandle>,
    buffer: Vec<u8>,
    ring: ResponseRing,
    urcs: UrcTable,
    pending: Option<PendingCommand>,
    next_seq: u64,
}

/// One AT instance bound to a transport channel.
///
/// Instances are created by an [`AtRegistry`](crate::AtRegistry) and opened
/// lazily on first use.
pub struct Instance {
    id: u8,
    key: u64,
    config: Arc<EngineConfig>,
    transport: Arc<dyn Transport>,
    policy: Arc<LogPolicy>,
    open: AtomicBool,
    open_lock: Mutex<()>,
    state: Mutex<InstanceState>,
    idle: Condvar,
    stats: StatsCounters,
    this: Weak<Instance>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(
        id: u8,
        config: Arc<EngineConfig>,
        transport: Arc<dyn Transport>,
        policy: Arc<LogPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Instance {
            id,
            key: guard::next_instance_key(),
            state: Mutex::new(InstanceState {
                handle: None,
                buffer: Vec::with_capacity(config.buffer_capacity),
                ring: ResponseRing::new(config.response_slots),
                urcs: UrcTable::new(config.max_urc_handlers, config.max_header_len),
                pending: None,
                next_seq: 0,
            }),
            config,
            transport,
            policy,
            open: AtomicBool::new(false),
            open_lock: Mutex::new(()),
            idle: Condvar::new(),
            stats: StatsCounters::new(id),
            this: this.clone(),
        })
    }

    /// The instance number.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Whether the channel is open and negotiated.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> InstanceStats {
        self.stats.snapshot()
    }

    // ========================================================================
    // Command issuer
    // ========================================================================

    /// Send `cmd` and return the raw response text, terminator included.
    ///
    /// URC lines with a registered handler never appear in the result.
    pub fn send_command(&self, timeout: Duration, cmd: &str) -> AtResult<String> {
        let bytes = self.issue(timeout, cmd, false)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send `cmd` and report whether the response ends in `OK`.
    ///
    /// Timeouts and transport failures count as not OK.
    pub fn send_command_expect_ok(&self, timeout: Duration, cmd: &str) -> bool {
        match self.issue(timeout, cmd, false) {
            Ok(bytes) if is_response_ok(&bytes) => true,
            Ok(bytes) => {
                if self.policy.all_disabled() {
                    debug!(
                        "AT[{}]: Command '{}' got unwanted response: {}",
                        self.id,
                        cmd,
                        String::from_utf8_lossy(&bytes).trim_end()
                    );
                }
                false
            }
            Err(e) => {
                if self.policy.all_disabled() {
                    debug!("AT[{}]: Command '{}' got no response: {}", self.id, cmd, e);
                }
                false
            }
        }
    }

    /// Send `cmd` and return the response bytes unmodified.
    pub fn send_command_binary(&self, timeout: Duration, cmd: &str) -> AtResult<Bytes> {
        self.issue(timeout, cmd, false)
    }

    /// Like [`send_command`](Self::send_command), but the exchange is logged
    /// at info level even when the command is silenced.
    pub fn send_command_and_log(&self, timeout: Duration, cmd: &str) -> AtResult<String> {
        let bytes = self.issue(timeout, cmd, true)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn issue(&self, timeout: Duration, cmd: &str, force_log: bool) -> AtResult<Bytes> {
        self.check_reentrancy()?;
        self.ensure_open()?;
        self.transact(timeout, cmd, force_log)
    }

    fn transact(&self, timeout: Duration, cmd: &str, force_log: bool) -> AtResult<Bytes> {
        let quiet = self.policy.is_silent(cmd);
        let (tx, rx) = crossbeam_channel::bounded(1);

        let (seq, handle) = {
            let mut state = self.state.lock();
            while state.pending.is_some() {
                self.idle.wait(&mut state);
            }
            let handle = state.handle.ok_or(AtError::Closed)?;
            let seq = state.next_seq;
            state.next_seq += 1;
            let slot = state.ring.cursor();
            state.ring.clear_slot(slot);
            // Leftovers of an earlier exchange go; a URC still arriving stays.
            let keep = state
                .urcs
                .partial_urc_start(&state.buffer)
                .unwrap_or(state.buffer.len());
            state.buffer.drain(..keep);
            state.pending = Some(PendingCommand {
                seq,
                slot,
                quiet,
                force_log,
                sent_at: Instant::now(),
                notify: tx,
            });
            (seq, handle)
        };

        if force_log {
            info!("AT[{}]: {}", self.id, cmd);
        } else if !quiet {
            debug!("AT[{}]: Sending: {}", self.id, cmd);
        }

        // Transmit outside the lock: a transport may deliver the reply from
        // inside `send`.
        if let Err(e) = self.transport.send(handle, &encode_command(cmd)) {
            error!("AT[{}]: Unable to send command '{}': {}", self.id, cmd, e);
            self.stats.send_failure();
            self.abandon(seq);
            return Err(e.into());
        }
        self.stats.command_sent();

        self.wait_for_response(seq, &rx, timeout, cmd, quiet, force_log)
    }

    fn wait_for_response(
        &self,
        seq: u64,
        rx: &Receiver<Completion>,
        timeout: Duration,
        cmd: &str,
        quiet: bool,
        force_log: bool,
    ) -> AtResult<Bytes> {
        let outcome = rx.recv_timeout(timeout);
        let mut state = self.state.lock();

        let completion = match outcome {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Disconnected) => return Err(AtError::Closed),
            Err(RecvTimeoutError::Timeout) => {
                if state.pending.as_ref().is_some_and(|p| p.seq == seq) {
                    state.pending = None;
                    self.idle.notify_all();
                    self.stats.timeout();
                    if force_log {
                        info!("AT[{}]: {}: <timed out>", self.id, cmd);
                    } else if !quiet {
                        error!("AT[{}]: No response to '{}' before timeout", self.id, cmd);
                    }
                    return Err(AtError::Timeout);
                }
                // The receive path got there first; its completion is queued.
                match rx.try_recv() {
                    Ok(completion) => completion,
                    Err(_) => return Err(AtError::Closed),
                }
            }
        };

        match completion {
            Completion::Response { slot } => state.ring.take(slot).ok_or(AtError::Closed),
            Completion::Failed(err) => Err(err),
        }
    }

    /// Drop the pending record for `seq` after a failed transmit.
    fn abandon(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.pending.as_ref().is_some_and(|p| p.seq == seq) {
            state.pending = None;
            self.idle.notify_all();
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn ensure_open(&self) -> AtResult<()> {
        if self.is_open() {
            return Ok(());
        }
        let _opening = self.open_lock.lock();
        if self.is_open() {
            return Ok(());
        }

        trace!("AT[{}]: Opening", self.id);
        let this = self.this.clone();
        let on_rx: RxNotify = Arc::new(move |handle, available| {
            if let Some(instance) = this.upgrade() {
                instance.on_receive(handle, available);
            }
        });
        let handle = self.transport.open(self.id, on_rx).map_err(|e| {
            error!("AT[{}]: Unable to open channel: {}", self.id, e);
            e
        })?;

        {
            let mut state = self.state.lock();
            state.handle = Some(handle);
            state.buffer.clear();
            state.ring.reset();
            state.pending = None;
        }

        self.negotiate();
        self.open.store(true, Ordering::Release);
        debug!("AT[{}]: Opened on {}", self.id, handle);
        Ok(())
    }

    /// Send the configured init commands. Failures are logged, not fatal.
    fn negotiate(&self) {
        for cmd in &self.config.init_commands {
            match self.transact(self.config.default_timeout(), cmd, false) {
                Ok(resp) if is_response_ok(&resp) => {}
                Ok(resp) => warn!(
                    "AT[{}]: Unable to configure with '{}': {}",
                    self.id,
                    cmd,
                    String::from_utf8_lossy(&resp).trim_end()
                ),
                Err(e) => warn!("AT[{}]: Unable to configure with '{}': {}", self.id, cmd, e),
            }
        }
    }

    /// Close the channel. A command waiting for its response fails with
    /// [`AtError::Closed`]. The next command reopens the channel.
    ///
    /// URC handlers stay registered.
    pub fn close(&self) -> AtResult<()> {
        self.check_reentrancy()?;
        let _opening = self.open_lock.lock();
        let handle = {
            let mut state = self.state.lock();
            if let Some(pending) = state.pending.take() {
                pending.complete(Completion::Failed(AtError::Closed));
            }
            state.buffer.clear();
            state.ring.reset();
            state.handle.take()
        };
        self.open.store(false, Ordering::Release);
        self.idle.notify_all();

        if let Some(handle) = handle {
            self.transport.close(handle);
            debug!("AT[{}]: Closed {}", self.id, handle);
        }
        Ok(())
    }

    // ========================================================================
    // URC handlers
    // ========================================================================

    /// Register `callback` for URC lines starting with `header`.
    ///
    /// Re-registering a header replaces its callback. The callback runs on
    /// the receiving thread and must not use this instance; doing so returns
    /// [`AtError::Reentrant`].
    pub fn add_urc_handler<F>(&self, header: &str, callback: F) -> AtResult<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.check_reentrancy()?;
        let mut state = self.state.lock();
        state.urcs.register(header, callback).map_err(|e| {
            warn!("AT[{}]: Unable to add handler for URC '{}': {}", self.id, header, e);
            AtError::from(e)
        })
    }

    /// The most recently completed response, kept for inspection even after
    /// its issuer consumed it. `None` from inside a URC callback.
    pub fn last_response(&self) -> Option<Bytes> {
        if guard::is_dispatching(self.key) {
            warn!("AT[{}]: last_response called from a URC callback", self.id);
            return None;
        }
        self.state.lock().ring.last()
    }

    fn check_reentrancy(&self) -> AtResult<()> {
        if guard::is_dispatching(self.key) {
            warn!("AT[{}]: Called from inside its own URC callback", self.id);
            return Err(AtError::Reentrant { instance: self.id });
        }
        Ok(())
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    /// Handle a receive notification for `handle` with `available` bytes.
    ///
    /// Transports call this through the notifier passed to
    /// [`Transport::open`]; it is public so custom transports and tests can
    /// drive an instance directly.
    pub fn on_receive(&self, handle: ChannelHandle, available: usize) {
        if available == 0 {
            return;
        }
        let mut state = self.state.lock();
        if state.handle != Some(handle) {
            trace!("AT[{}]: Discarding {} bytes for stale {}", self.id, available, handle);
            drop(state);
            self.drain(handle, available);
            return;
        }
        let _dispatching = DispatchGuard::enter(self.key);

        let capacity = self.config.buffer_capacity;
        if available > capacity.saturating_sub(state.buffer.len()) {
            self.overflow(&mut state);
            if available > capacity {
                warn!(
                    "AT[{}]: Dropping {} byte chunk, larger than the {} byte buffer",
                    self.id, available, capacity
                );
                self.drain(handle, available);
                self.stats.dropped_chunk();
                self.fail_in_flight(&mut state);
                return;
            }
        }

        let start = state.buffer.len();
        state.buffer.resize(start + available, 0);
        let read = match self.transport.receive(handle, &mut state.buffer[start..]) {
            Ok(n) => n.min(available),
            Err(e) => {
                warn!("AT[{}]: Unable to perform AT read: {}", self.id, e);
                0
            }
        };
        state.buffer.truncate(start + read);
        if read == 0 {
            return;
        }
        self.stats.received(read);

        let quiet = state
            .pending
            .as_ref()
            .map_or_else(|| self.policy.all_disabled(), |p| p.quiet);
        if !quiet {
            trace!(
                "AT[{}]: Read {} bytes: {:?}",
                self.id,
                read,
                String::from_utf8_lossy(&state.buffer[start..])
            );
        }

        self.process(&mut state, quiet);
    }

    /// Reset the buffer because incoming bytes do not fit.
    fn overflow(&self, state: &mut InstanceState) {
        if state.buffer.is_empty() {
            return;
        }
        warn!(
            "AT[{}]: Response is bigger than the buffer, dropping {} buffered bytes",
            self.id,
            state.buffer.len()
        );
        state.buffer.clear();
        self.stats.overflow();
        self.fail_in_flight(state);
    }

    /// Under [`OverflowPolicy::FailInFlight`], fail the pending command
    /// because some of its response was lost.
    fn fail_in_flight(&self, state: &mut InstanceState) {
        if self.config.overflow_policy != OverflowPolicy::FailInFlight {
            return;
        }
        if let Some(pending) = state.pending.take() {
            pending.complete(Completion::Failed(AtError::Overflow));
            self.idle.notify_all();
        }
    }

    /// Read and discard `available` bytes so the transport does not re-announce them.
    fn drain(&self, handle: ChannelHandle, available: usize) {
        let mut scratch = vec![0u8; available.min(self.config.buffer_capacity)];
        let mut remaining = available;
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            match self.transport.receive(handle, &mut scratch[..want]) {
                Ok(0) | Err(_) => break,
                Ok(n) => remaining = remaining.saturating_sub(n),
            }
        }
    }

    fn process(&self, state: &mut InstanceState, quiet: bool) {
        let InstanceState { buffer, urcs, .. } = &mut *state;
        let delivered = urcs.dispatch(buffer);
        self.stats.urcs(delivered);

        // A URC split across chunks stays at the tail until its line ends.
        let settled = urcs.partial_urc_start(buffer).unwrap_or(buffer.len());
        if settled == 0 {
            return;
        }

        if state.pending.is_none() {
            self.discard(state, settled, quiet);
            return;
        }

        let Some(len) = response_len(&state.buffer[..settled]) else {
            trace!("AT[{}]: Buffering partial response ({} bytes)", self.id, settled);
            return;
        };

        let data = Bytes::copy_from_slice(&state.buffer[..len]);
        state.buffer.drain(..len);
        let slot = state.ring.commit(data.clone());

        if let Some(pending) = state.pending.take() {
            debug_assert_eq!(slot, pending.slot, "slot cursor moved while a command was pending");
            self.stats.response(pending.sent_at.elapsed());
            let text = String::from_utf8_lossy(&data);
            if pending.force_log {
                info!("AT[{}]: {}", self.id, text.trim_end());
            } else if !pending.quiet {
                debug!("AT[{}]: Received response: {}", self.id, text.trim_end());
            }
            pending.complete(Completion::Response { slot });
        }
        self.idle.notify_all();

        // Whatever followed the final result line has no command to go to.
        if settled > len {
            self.discard(state, settled - len, quiet);
        }
    }

    /// Drop the first `len` buffered bytes, which belong to no command.
    fn discard(&self, state: &mut InstanceState, len: usize, quiet: bool) {
        if !quiet {
            trace!("AT[{}]: No command in flight, discarding {} bytes", self.id, len);
        }
        self.stats.discarded(len);
        state.buffer.drain(..len);
    }
}
