//! Per-instance counters, mirrored into the `metrics` recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use atlink_metrics::{metric_defs, InstanceLabels, Metric};

/// Snapshot of an instance's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceStats {
    /// Commands handed to the transport.
    pub commands_sent: u64,
    /// Completed responses committed to the slot ring.
    pub responses: u64,
    /// Commands that timed out.
    pub timeouts: u64,
    /// Commands the transport failed to transmit.
    pub send_failures: u64,
    /// URC lines delivered to handlers.
    pub urcs_dispatched: u64,
    /// Buffer resets caused by incoming data not fitting.
    pub overflows: u64,
    /// Chunks dropped because they exceed the buffer on their own.
    pub dropped_chunks: u64,
    /// Bytes discarded because no command was in flight.
    pub discarded_bytes: u64,
    /// Bytes pulled from the transport.
    pub rx_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct StatsCounters {
    labels: Vec<(&'static str, String)>,
    commands_sent: AtomicU64,
    responses: AtomicU64,
    timeouts: AtomicU64,
    send_failures: AtomicU64,
    urcs_dispatched: AtomicU64,
    overflows: AtomicU64,
    dropped_chunks: AtomicU64,
    discarded_bytes: AtomicU64,
    rx_bytes: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn new(instance: u8) -> Self {
        StatsCounters {
            labels: InstanceLabels::new(instance).to_labels(),
            commands_sent: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            urcs_dispatched: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            dropped_chunks: AtomicU64::new(0),
            discarded_bytes: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
        }
    }

    fn bump(&self, counter: &AtomicU64, metric: &Metric, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
        metrics::counter!(metric.name, &self.labels).increment(by);
    }

    pub(crate) fn command_sent(&self) {
        self.bump(&self.commands_sent, &metric_defs::AT_COMMANDS_SENT, 1);
    }

    pub(crate) fn response(&self, latency: Duration) {
        self.bump(&self.responses, &metric_defs::AT_RESPONSES, 1);
        metrics::histogram!(metric_defs::AT_RESPONSE_LATENCY.name, &self.labels)
            .record(latency.as_secs_f64() * 1000.0);
    }

    pub(crate) fn timeout(&self) {
        self.bump(&self.timeouts, &metric_defs::AT_TIMEOUTS, 1);
    }

    pub(crate) fn send_failure(&self) {
        self.bump(&self.send_failures, &metric_defs::AT_SEND_FAILURES, 1);
    }

    pub(crate) fn urcs(&self, count: usize) {
        if count > 0 {
            self.bump(&self.urcs_dispatched, &metric_defs::URC_DISPATCHED, count as u64);
        }
    }

    pub(crate) fn overflow(&self) {
        self.bump(&self.overflows, &metric_defs::RX_OVERFLOWS, 1);
    }

    pub(crate) fn dropped_chunk(&self) {
        self.bump(&self.dropped_chunks, &metric_defs::RX_DROPPED_CHUNKS, 1);
    }

    pub(crate) fn discarded(&self, bytes: usize) {
        self.discarded_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn received(&self, bytes: usize) {
        self.bump(&self.rx_bytes, &metric_defs::RX_BYTES, bytes as u64);
    }

    pub(crate) fn snapshot(&self) -> InstanceStats {
        InstanceStats {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            urcs_dispatched: self.urcs_dispatched.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
        }
    }
}
