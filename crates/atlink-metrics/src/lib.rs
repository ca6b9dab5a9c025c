//! Metric declarations for the AT command engine.
//!
//! Every metric the engine records is a [`Metric`] constant in
//! [`metric_defs`]. Values go to whatever `metrics` recorder the application
//! installs; without one, recording is a no-op.
//!
//! ```rust
//! use atlink_metrics::{describe_metrics, metric_defs, InstanceLabels};
//!
//! describe_metrics();
//! let labels = InstanceLabels::new(0).to_labels();
//! atlink_metrics::metrics::counter!(metric_defs::AT_COMMANDS_SENT.name, &labels).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_histogram, Unit};

/// How a metric aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count of events or bytes.
    Counter,
    /// Distribution of observed values.
    Histogram,
}

/// Name, kind, unit and label keys of one engine metric.
///
/// Declared as constants with the `const` builders:
///
/// ```rust
/// use atlink_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const URCS: Metric = Metric::counter("atlink.urc.dispatched")
///     .with_description("URC lines delivered to handlers")
///     .with_unit(Unit::Count)
///     .with_labels(&["instance"]);
///
/// assert_eq!(URCS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted metric name, e.g. `atlink.at.timeouts`.
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys every recording of this metric carries.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Metric {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Hand the description and unit to the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every engine metric.
    pub const INSTANCE_LABELS: &[&str] = &["instance"];

    // ========================================================================
    // Command Metrics
    // ========================================================================

    /// Commands handed to the transport.
    pub const AT_COMMANDS_SENT: Metric = Metric::counter("atlink.at.commands_sent")
        .with_description("AT commands handed to the transport")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Completed responses delivered to a waiting caller.
    pub const AT_RESPONSES: Metric = Metric::counter("atlink.at.responses")
        .with_description("Completed responses delivered to a waiting caller")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Commands that saw no terminator before their timeout.
    pub const AT_TIMEOUTS: Metric = Metric::counter("atlink.at.timeouts")
        .with_description("Commands that saw no terminator before their timeout")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Commands the transport failed to transmit.
    pub const AT_SEND_FAILURES: Metric = Metric::counter("atlink.at.send_failures")
        .with_description("Commands the transport failed to transmit")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Time from transmit to completed response in milliseconds.
    pub const AT_RESPONSE_LATENCY: Metric = Metric::histogram("atlink.at.response_latency_ms")
        .with_description("Time from transmit to completed response in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(INSTANCE_LABELS);

    // ========================================================================
    // Receive Path Metrics
    // ========================================================================

    /// URC lines delivered to handlers.
    pub const URC_DISPATCHED: Metric = Metric::counter("atlink.urc.dispatched")
        .with_description("URC lines delivered to handlers")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Bytes pulled from the transport.
    pub const RX_BYTES: Metric = Metric::counter("atlink.rx.bytes")
        .with_description("Bytes pulled from the transport")
        .with_unit(Unit::Bytes)
        .with_labels(INSTANCE_LABELS);

    /// Accumulation buffer resets caused by incoming data not fitting.
    pub const RX_OVERFLOWS: Metric = Metric::counter("atlink.rx.overflows")
        .with_description("Accumulation buffer resets caused by incoming data not fitting")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Incoming chunks dropped because they exceed the buffer on their own.
    pub const RX_DROPPED_CHUNKS: Metric = Metric::counter("atlink.rx.dropped_chunks")
        .with_description("Incoming chunks larger than the whole accumulation buffer")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    pub const ALL: &[&Metric] = &[
        // Commands
        &AT_COMMANDS_SENT,
        &AT_RESPONSES,
        &AT_TIMEOUTS,
        &AT_SEND_FAILURES,
        &AT_RESPONSE_LATENCY,
        // Receive path
        &URC_DISPATCHED,
        &RX_BYTES,
        &RX_OVERFLOWS,
        &RX_DROPPED_CHUNKS,
    ];
}

/// Labels identifying the AT instance a recording belongs to.
#[derive(Debug, Clone, Copy)]
pub struct InstanceLabels {
    pub instance: u8,
}

impl InstanceLabels {
    pub fn new(instance: u8) -> Self {
        InstanceLabels { instance }
    }

    /// Labels in the form the `metrics` macros accept.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("instance", self.instance.to_string())]
    }
}

/// Describe every engine metric. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
