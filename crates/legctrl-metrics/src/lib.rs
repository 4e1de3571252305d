//! Metric declarations for the LegCtrl client.
//!
//! Every metric the client records is declared once in [`metric_defs`] as a
//! [`Metric`] constant carrying its name, kind, description, unit and label
//! keys. Recording goes through the `metrics` facade, so nothing is collected
//! until the binary installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use legctrl_metrics::{describe_metrics, metric_defs, MetricLabels};
//!
//! describe_metrics();
//!
//! let labels = MetricLabels::new("robot-7f3a");
//! metrics::counter!(metric_defs::LINK_FRAMES_SENT.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
///
/// Built with the const constructors so declarations live in constants:
///
/// ```rust
/// use legctrl_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const FRAMES: Metric = Metric::counter("legctrl.example.frames")
///     .with_description("Frames seen")
///     .with_unit(Unit::Count)
///     .with_labels(&["device"]);
///
/// assert_eq!(FRAMES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "legctrl.link.frames_sent").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the client.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on all device-scoped metrics.
    pub const DEVICE_LABELS: &[&str] = &["device"];

    // ========================================================================
    // Link
    // ========================================================================

    /// Frames handed to the transport.
    pub const LINK_FRAMES_SENT: Metric = Metric::counter("legctrl.link.frames_sent")
        .with_description("Command frames handed to the transport")
        .with_unit(Unit::Count)
        .with_labels(&["device", "msg_type"]);

    /// Sends dropped because the session was not ready.
    pub const LINK_SENDS_IGNORED: Metric = Metric::counter("legctrl.link.sends_ignored")
        .with_description("Sends ignored because no session was ready")
        .with_unit(Unit::Count);

    /// Connect attempts the transport reported as failed.
    pub const LINK_CONNECT_FAILURES: Metric = Metric::counter("legctrl.link.connect_failures")
        .with_description("Connection attempts that failed")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Links lost, expectedly or not.
    pub const LINK_LOSSES: Metric = Metric::counter("legctrl.link.losses")
        .with_description("Links reported lost by the transport")
        .with_unit(Unit::Count)
        .with_labels(&["device", "expected"]);

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Telemetry frames decoded.
    pub const TELEMETRY_FRAMES: Metric = Metric::counter("legctrl.telemetry.frames")
        .with_description("Telemetry frames decoded")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Telemetry frames discarded by the decoder.
    pub const TELEMETRY_DECODE_ERRORS: Metric = Metric::counter("legctrl.telemetry.decode_errors")
        .with_description("Inbound frames discarded as malformed telemetry")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Last reported battery voltage.
    pub const TELEMETRY_BATTERY_MV: Metric = Metric::gauge("legctrl.telemetry.battery_mv")
        .with_description("Battery voltage reported by the robot in millivolts")
        .with_labels(DEVICE_LABELS);

    /// Distribution of the robot-reported command age.
    pub const TELEMETRY_LAST_CMD_AGE: Metric = Metric::histogram("legctrl.telemetry.last_cmd_age_ms")
        .with_description("Age of the last accepted command as reported by the robot")
        .with_unit(Unit::Milliseconds)
        .with_labels(DEVICE_LABELS);

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Periodic fires that produced a send attempt.
    pub const SCHEDULER_TICKS: Metric = Metric::counter("legctrl.scheduler.ticks")
        .with_description("Periodic command fires")
        .with_unit(Unit::Count);

    /// Periodic fires that found no stored command.
    pub const SCHEDULER_SKIPPED: Metric = Metric::counter("legctrl.scheduler.skipped")
        .with_description("Periodic fires skipped because no command was stored")
        .with_unit(Unit::Count);

    /// All metrics, for registration.
    pub const ALL: &[&Metric] = &[
        &LINK_FRAMES_SENT,
        &LINK_SENDS_IGNORED,
        &LINK_CONNECT_FAILURES,
        &LINK_LOSSES,
        &TELEMETRY_FRAMES,
        &TELEMETRY_DECODE_ERRORS,
        &TELEMETRY_BATTERY_MV,
        &TELEMETRY_LAST_CMD_AGE,
        &SCHEDULER_TICKS,
        &SCHEDULER_SKIPPED,
    ];
}

/// Labels identifying the device a metric belongs to.
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Device identity.
    pub device: String,
}

impl MetricLabels {
    /// Labels for the given device.
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into() }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("device", self.device.clone())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Registers descriptions of every metric in [`metric_defs::ALL`].
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus exporter listening on `addr` and describe all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
