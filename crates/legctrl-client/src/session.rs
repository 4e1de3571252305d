//! Connection state machine.
//!
//! Owns the single active session and drives it through
//! `Idle → Connecting → DiscoveringCapabilities → Ready`, with `Failed`
//! reachable while connecting and `Disconnected` reachable from anywhere a
//! link existed. Handlers take `&mut self`; the owner serializes them.
//!
//! Handlers do not publish anything themselves. They return the
//! [`SessionEvent`]s the change produced and the owner forwards them.

use std::sync::Arc;

use legctrl_metrics::{metric_defs, MetricLabels};
use legctrl_protocol::{CommandFrame, Telemetry};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::transport::{CapabilityId, DeviceId, Transport, TransportEvent};

// ============================================================================
// Phases and outcomes
// ============================================================================

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkPhase {
    /// No session. Initial state, and the state after a clean disconnect.
    #[default]
    Idle,
    /// Waiting for the transport to establish the link.
    Connecting,
    /// Link up, waiting for the command and telemetry capabilities.
    DiscoveringCapabilities,
    /// Commands may be sent.
    Ready,
    /// The link went away; teardown may still be completing.
    Disconnected,
    /// The connect sequence failed; see the last error.
    Failed,
}

impl LinkPhase {
    /// Progress label shown to the operator.
    pub fn label(&self) -> &'static str {
        match self {
            LinkPhase::Idle => "Idle",
            LinkPhase::Connecting => "Connecting...",
            LinkPhase::DiscoveringCapabilities => "Discovering capabilities...",
            LinkPhase::Ready => "Ready",
            LinkPhase::Disconnected => "Disconnected",
            LinkPhase::Failed => "Connection failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LinkPhase::Ready)
    }

    /// Whether a connect sequence is in progress.
    pub fn is_pending(&self) -> bool {
        matches!(self, LinkPhase::Connecting | LinkPhase::DiscoveringCapabilities)
    }

    /// Whether the session ended through link loss or failure.
    pub fn is_ended(&self) -> bool {
        matches!(self, LinkPhase::Disconnected | LinkPhase::Failed)
    }
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport. Delivery is not confirmed.
    Sent,
    /// Ignored because the session is not ready.
    NotConnected,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// An observable change produced by a state machine handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The phase changed.
    PhaseChanged(LinkPhase),
    /// The telemetry snapshot was replaced or cleared.
    TelemetryChanged(Option<Telemetry>),
    /// A message for the operator's activity log.
    Note(String),
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug)]
struct Session {
    device: DeviceId,
    write_target: Option<CapabilityId>,
    notify_source: Option<CapabilityId>,
}

impl Session {
    fn new(device: DeviceId) -> Self {
        Session {
            device,
            write_target: None,
            notify_source: None,
        }
    }
}

/// The connection state machine.
pub struct ConnectionStateMachine {
    transport: Arc<dyn Transport>,
    service: String,
    command_capability: CapabilityId,
    telemetry_capability: CapabilityId,
    phase: LinkPhase,
    session: Option<Session>,
    /// Devices asked to disconnect whose link loss has not arrived yet.
    ///
    /// Each entry is consumed by the one `LinkLost` or `LinkFailed` the
    /// transport owes for it, or dropped when a new link to the same device
    /// is established, whichever comes first.
    tearing_down: Vec<DeviceId>,
    telemetry: Option<Telemetry>,
    last_error: Option<String>,
}

impl ConnectionStateMachine {
    /// Create an idle state machine.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        ConnectionStateMachine {
            transport,
            service: config.service_uuid.clone(),
            command_capability: config.command_capability(),
            telemetry_capability: config.telemetry_capability(),
            phase: LinkPhase::Idle,
            session: None,
            tearing_down: Vec::new(),
            telemetry: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Latest telemetry snapshot, if one arrived during this session.
    pub fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry
    }

    /// Reason for the last failure or unexpected link loss.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Device of the live or pending session.
    pub fn target(&self) -> Option<&DeviceId> {
        self.session.as_ref().map(|s| &s.device)
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Start a session with `device`, tearing down any existing one first.
    pub fn connect(&mut self, device: DeviceId) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        if let Some(previous) = self.teardown() {
            debug!("Session[{}]: replaced by connect to {}", previous, device);
        }
        self.last_error = None;
        self.clear_telemetry(&mut out);

        info!("Session[{}]: connecting", device);
        self.transport.connect(&device);
        self.session = Some(Session::new(device));
        self.set_phase(LinkPhase::Connecting, &mut out);
        out
    }

    /// Tear down the session. A no-op when there is none.
    pub fn disconnect(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        match self.teardown() {
            Some(device) => {
                info!("Session[{}]: disconnecting", device);
                self.clear_telemetry(&mut out);
                out.push(SessionEvent::Note("Disconnecting...".to_string()));
                self.set_phase(LinkPhase::Disconnected, &mut out);
            }
            None => debug!("Session: disconnect with no live session ignored"),
        }
        out
    }

    /// Return to `Idle`, tearing down any session and forgetting the last error.
    pub fn reset(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        self.teardown();
        self.last_error = None;
        self.clear_telemetry(&mut out);
        self.set_phase(LinkPhase::Idle, &mut out);
        out
    }

    /// Hand `frame` to the transport if the session is ready.
    pub fn send(&self, frame: &CommandFrame) -> SendOutcome {
        let session = match (&self.phase, &self.session) {
            (LinkPhase::Ready, Some(session)) => session,
            _ => {
                trace!("Session: send ignored in phase {:?}", self.phase);
                metrics::counter!(metric_defs::LINK_SENDS_IGNORED.name).increment(1);
                return SendOutcome::NotConnected;
            }
        };
        let Some(target) = &session.write_target else {
            metrics::counter!(metric_defs::LINK_SENDS_IGNORED.name).increment(1);
            return SendOutcome::NotConnected;
        };

        trace!("Session[{}]: TX {}", session.device, hex::encode_upper(frame.as_bytes()));
        self.transport.write_without_response(&session.device, target, frame.as_bytes());

        let msg_type = format!("0x{:02X}", frame.msg_type().unwrap_or_default());
        let labels = MetricLabels::new(session.device.as_str()).with(&[("msg_type", msg_type)]);
        metrics::counter!(metric_defs::LINK_FRAMES_SENT.name, &labels).increment(1);
        SendOutcome::Sent
    }

    // ========================================================================
    // Transport events
    // ========================================================================

    /// Process one transport event.
    ///
    /// Adapter and discovery events are not session events and are ignored.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        match event {
            TransportEvent::LinkEstablished { device } => self.on_link_established(device, &mut out),
            TransportEvent::LinkFailed { device, reason } => self.on_link_failed(device, reason, &mut out),
            TransportEvent::LinkLost { device, reason } => self.on_link_lost(device, reason, &mut out),
            TransportEvent::CapabilitiesFound { device, capabilities } => {
                self.on_capabilities_found(device, capabilities, &mut out)
            }
            TransportEvent::NotificationStateChanged {
                device,
                capability,
                enabled,
            } => {
                if self.is_target(&device) {
                    let state = if enabled { "enabled" } else { "disabled" };
                    info!("Session[{}]: notifications {} on {}", device, state, capability);
                    out.push(SessionEvent::Note(format!("Telemetry notifications {}", state)));
                }
            }
            TransportEvent::BytesReceived {
                device,
                capability,
                data,
            } => self.on_bytes_received(device, capability, data, &mut out),
            TransportEvent::AdapterStateChanged(_) | TransportEvent::DeviceDiscovered { .. } => {}
        }

        out
    }

    fn on_link_established(&mut self, device: DeviceId, out: &mut Vec<SessionEvent>) {
        if !self.is_target(&device) || self.phase != LinkPhase::Connecting {
            debug!("Session[{}]: stale link established ignored", device);
            return;
        }

        // The previous link to this device is gone if a new one is up
        if let Some(pos) = self.tearing_down.iter().position(|d| d == &device) {
            debug!("Session[{}]: link loss for earlier teardown never arrived", device);
            self.tearing_down.remove(pos);
        }

        info!("Session[{}]: link established, discovering capabilities", device);
        self.transport.discover_capabilities(
            &device,
            &self.service,
            &[self.command_capability.clone(), self.telemetry_capability.clone()],
        );
        out.push(SessionEvent::Note("Connected, discovering capabilities...".to_string()));
        self.set_phase(LinkPhase::DiscoveringCapabilities, out);
    }

    fn on_link_failed(&mut self, device: DeviceId, reason: String, out: &mut Vec<SessionEvent>) {
        if self.finish_teardown(&device, out) {
            return;
        }
        if !self.is_target(&device) || !self.phase.is_pending() {
            debug!("Session[{}]: stale link failure ignored: {}", device, reason);
            return;
        }

        warn!("Session[{}]: connection failed: {}", device, reason);
        metrics::counter!(
            metric_defs::LINK_CONNECT_FAILURES.name,
            &MetricLabels::new(device.as_str()).to_labels()
        )
        .increment(1);

        self.session = None;
        out.push(SessionEvent::Note(format!("Failed to connect: {}", reason)));
        self.last_error = Some(reason);
        self.set_phase(LinkPhase::Failed, out);
    }

    fn on_link_lost(&mut self, device: DeviceId, reason: Option<String>, out: &mut Vec<SessionEvent>) {
        if self.finish_teardown(&device, out) {
            return;
        }
        if !self.is_target(&device) {
            debug!("Session[{}]: stale link loss ignored", device);
            return;
        }

        let labels = MetricLabels::new(device.as_str()).with(&[("expected", "false".to_string())]);
        metrics::counter!(metric_defs::LINK_LOSSES.name, &labels).increment(1);

        self.session = None;
        self.clear_telemetry(out);
        match &reason {
            Some(reason) => {
                warn!("Session[{}]: link lost: {}", device, reason);
                out.push(SessionEvent::Note(format!("Disconnected: {}", reason)));
            }
            None => {
                info!("Session[{}]: link lost", device);
                out.push(SessionEvent::Note("Disconnected".to_string()));
            }
        }
        self.last_error = reason;
        self.set_phase(LinkPhase::Disconnected, out);
    }

    fn on_capabilities_found(
        &mut self,
        device: DeviceId,
        capabilities: Vec<CapabilityId>,
        out: &mut Vec<SessionEvent>,
    ) {
        if !self.is_target(&device) || self.phase != LinkPhase::DiscoveringCapabilities {
            debug!("Session[{}]: stale capability report ignored", device);
            return;
        }

        let command = capabilities.iter().find(|c| c.matches(&self.command_capability)).cloned();
        let telemetry = capabilities.iter().find(|c| c.matches(&self.telemetry_capability)).cloned();

        let (command, telemetry) = match (command, telemetry) {
            (Some(command), Some(telemetry)) => (command, telemetry),
            (command, telemetry) => {
                let mut missing = Vec::new();
                if command.is_none() {
                    missing.push("command");
                }
                if telemetry.is_none() {
                    missing.push("telemetry");
                }
                let reason = format!("required capabilities not found: {}", missing.join(", "));
                warn!("Session[{}]: {}", device, reason);

                self.transport.disconnect(&device);
                self.tearing_down.push(device);
                self.session = None;
                out.push(SessionEvent::Note(format!("Failed to connect: {}", reason)));
                self.last_error = Some(reason);
                self.set_phase(LinkPhase::Failed, out);
                return;
            }
        };

        self.transport.enable_notifications(&device, &telemetry);
        if let Some(session) = self.session.as_mut() {
            session.write_target = Some(command);
            session.notify_source = Some(telemetry);
        }

        info!("Session[{}]: ready", device);
        out.push(SessionEvent::Note("Ready to send commands".to_string()));
        self.set_phase(LinkPhase::Ready, out);
    }

    fn on_bytes_received(
        &mut self,
        device: DeviceId,
        capability: CapabilityId,
        data: Vec<u8>,
        out: &mut Vec<SessionEvent>,
    ) {
        let from_telemetry = match &self.session {
            Some(session) if session.device == device => {
                let source = session.notify_source.as_ref().unwrap_or(&self.telemetry_capability);
                capability.matches(source)
            }
            _ => false,
        };
        if !from_telemetry {
            trace!("Session[{}]: {} bytes on {} ignored", device, data.len(), capability);
            return;
        }

        let labels = MetricLabels::new(device.as_str());
        match Telemetry::decode(&data) {
            Ok(telemetry) => {
                trace!("Session[{}]: RX {}", device, telemetry);
                metrics::counter!(metric_defs::TELEMETRY_FRAMES.name, &labels.to_labels()).increment(1);
                metrics::gauge!(metric_defs::TELEMETRY_BATTERY_MV.name, &labels.to_labels())
                    .set(telemetry.battery_mv as f64);
                metrics::histogram!(metric_defs::TELEMETRY_LAST_CMD_AGE.name, &labels.to_labels())
                    .record(telemetry.last_cmd_age_ms as f64);

                self.telemetry = Some(telemetry);
                out.push(SessionEvent::TelemetryChanged(Some(telemetry)));
            }
            Err(e) => {
                warn!(
                    "Session[{}]: discarding telemetry frame {}: {}",
                    device,
                    hex::encode_upper(&data),
                    e
                );
                metrics::counter!(metric_defs::TELEMETRY_DECODE_ERRORS.name, &labels.to_labels())
                    .increment(1);
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_target(&self, device: &DeviceId) -> bool {
        self.target() == Some(device)
    }

    /// Ask the transport to drop the current session's link.
    fn teardown(&mut self) -> Option<DeviceId> {
        let session = self.session.take()?;
        self.transport.disconnect(&session.device);
        self.tearing_down.push(session.device.clone());
        Some(session.device)
    }

    /// Consume the link-loss (or failure) that completes a requested teardown.
    fn finish_teardown(&mut self, device: &DeviceId, out: &mut Vec<SessionEvent>) -> bool {
        let Some(pos) = self.tearing_down.iter().position(|d| d == device) else {
            return false;
        };
        self.tearing_down.remove(pos);

        let labels = MetricLabels::new(device.as_str()).with(&[("expected", "true".to_string())]);
        metrics::counter!(metric_defs::LINK_LOSSES.name, &labels).increment(1);
        debug!("Session[{}]: teardown complete", device);

        if self.session.is_none() && self.phase == LinkPhase::Disconnected {
            out.push(SessionEvent::Note("Disconnected".to_string()));
            self.set_phase(LinkPhase::Idle, out);
        }
        true
    }

    fn clear_telemetry(&mut self, out: &mut Vec<SessionEvent>) {
        if self.telemetry.take().is_some() {
            out.push(SessionEvent::TelemetryChanged(None));
        }
    }

    fn set_phase(&mut self, phase: LinkPhase, out: &mut Vec<SessionEvent>) {
        if self.phase != phase {
            debug!("Session: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            out.push(SessionEvent::PhaseChanged(phase));
        }
    }
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("phase", &self.phase)
            .field("session", &self.session)
            .field("tearing_down", &self.tearing_down)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, TransportCall};
    use legctrl_protocol::{Command, ErrorCode, SystemState};

    fn setup() -> (Arc<RecordingTransport>, ConnectionStateMachine, ClientConfig) {
        let transport = Arc::new(RecordingTransport::new());
        let config = ClientConfig::default();
        let machine = ConnectionStateMachine::new(&config, transport.clone());
        (transport, machine, config)
    }

    fn dev(id: &str) -> DeviceId {
        DeviceId::new(id)
    }

    fn phases(events: &[SessionEvent]) -> Vec<LinkPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::PhaseChanged(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    /// Drive a fresh machine to `Ready` on `device`.
    fn make_ready(machine: &mut ConnectionStateMachine, config: &ClientConfig, device: &str) {
        machine.connect(dev(device));
        machine.handle_event(TransportEvent::LinkEstablished { device: dev(device) });
        machine.handle_event(TransportEvent::CapabilitiesFound {
            device: dev(device),
            capabilities: vec![config.command_capability(), config.telemetry_capability()],
        });
        assert_eq!(machine.phase(), LinkPhase::Ready);
    }

    fn telemetry_event(config: &ClientConfig, device: &str, data: Vec<u8>) -> TransportEvent {
        TransportEvent::BytesReceived {
            device: dev(device),
            capability: config.telemetry_capability(),
            data,
        }
    }

    fn armed_telemetry() -> Telemetry {
        Telemetry {
            state: SystemState::Armed,
            error_code: ErrorCode::None,
            last_cmd_age_ms: 12,
            battery_mv: 7400,
        }
    }

    #[test]
    fn test_happy_path_to_ready() {
        let (transport, mut machine, config) = setup();

        let events = machine.connect(dev("robot"));
        assert_eq!(phases(&events), vec![LinkPhase::Connecting]);

        let events = machine.handle_event(TransportEvent::LinkEstablished { device: dev("robot") });
        assert_eq!(phases(&events), vec![LinkPhase::DiscoveringCapabilities]);

        let events = machine.handle_event(TransportEvent::CapabilitiesFound {
            device: dev("robot"),
            capabilities: vec![config.telemetry_capability(), config.command_capability()],
        });
        assert_eq!(phases(&events), vec![LinkPhase::Ready]);

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Connect(dev("robot")),
                TransportCall::DiscoverCapabilities(
                    dev("robot"),
                    vec![config.command_capability(), config.telemetry_capability()]
                ),
                TransportCall::EnableNotifications(dev("robot"), config.telemetry_capability()),
            ]
        );
    }

    #[test]
    fn test_send_only_in_ready() {
        let (transport, mut machine, config) = setup();
        let frame = Command::Ping.frame();

        assert_eq!(machine.send(&frame), SendOutcome::NotConnected);

        machine.connect(dev("robot"));
        assert_eq!(machine.send(&frame), SendOutcome::NotConnected);

        machine.handle_event(TransportEvent::LinkEstablished { device: dev("robot") });
        assert_eq!(machine.send(&frame), SendOutcome::NotConnected);

        machine.handle_event(TransportEvent::CapabilitiesFound {
            device: dev("robot"),
            capabilities: vec![config.command_capability(), config.telemetry_capability()],
        });
        assert_eq!(machine.send(&frame), SendOutcome::Sent);

        machine.handle_event(TransportEvent::LinkLost {
            device: dev("robot"),
            reason: Some("supervision timeout".to_string()),
        });
        assert_eq!(machine.send(&frame), SendOutcome::NotConnected);

        assert_eq!(transport.writes(), vec![vec![0x01, 0x04, 0x00, 0x00]]);
    }

    #[test]
    fn test_send_ignored_after_failure_and_disconnect() {
        let (transport, mut machine, config) = setup();
        let frame = Command::Arm.frame();

        machine.connect(dev("robot"));
        machine.handle_event(TransportEvent::LinkFailed {
            device: dev("robot"),
            reason: "peer unreachable".to_string(),
        });
        assert_eq!(machine.send(&frame), SendOutcome::NotConnected);

        make_ready(&mut machine, &config, "robot");
        machine.disconnect();
        assert_eq!(machine.send(&frame), SendOutcome::NotConnected);
        assert!(transport.writes().is_empty());
    }

    #[test]
    fn test_connect_twice_tears_down_first() {
        let (transport, mut machine, _config) = setup();

        machine.connect(dev("first"));
        machine.handle_event(TransportEvent::LinkEstablished { device: dev("first") });
        transport.clear();

        machine.connect(dev("second"));
        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Disconnect(dev("first")),
                TransportCall::Connect(dev("second")),
            ]
        );
        assert_eq!(machine.target(), Some(&dev("second")));
        assert_eq!(machine.phase(), LinkPhase::Connecting);

        // Completion of the old teardown does not disturb the new session
        let events = machine.handle_event(TransportEvent::LinkLost {
            device: dev("first"),
            reason: None,
        });
        assert!(phases(&events).is_empty());
        assert_eq!(machine.phase(), LinkPhase::Connecting);

        // Nor does a late establishment of the old link
        machine.handle_event(TransportEvent::LinkEstablished { device: dev("first") });
        assert_eq!(machine.phase(), LinkPhase::Connecting);
    }

    #[test]
    fn test_link_failed_then_reconnect() {
        let (_transport, mut machine, _config) = setup();

        machine.connect(dev("robot"));
        let events = machine.handle_event(TransportEvent::LinkFailed {
            device: dev("robot"),
            reason: "peer unreachable".to_string(),
        });
        assert_eq!(phases(&events), vec![LinkPhase::Failed]);
        assert_eq!(machine.last_error(), Some("peer unreachable"));
        assert!(machine.target().is_none());
        assert!(events.contains(&SessionEvent::Note("Failed to connect: peer unreachable".to_string())));

        let events = machine.connect(dev("robot"));
        assert_eq!(phases(&events), vec![LinkPhase::Connecting]);
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_reset_from_failed() {
        let (_transport, mut machine, _config) = setup();

        machine.connect(dev("robot"));
        machine.handle_event(TransportEvent::LinkFailed {
            device: dev("robot"),
            reason: "timeout".to_string(),
        });

        let events = machine.reset();
        assert_eq!(phases(&events), vec![LinkPhase::Idle]);
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_missing_capability_fails_and_drops_link() {
        let (transport, mut machine, config) = setup();

        machine.connect(dev("robot"));
        machine.handle_event(TransportEvent::LinkEstablished { device: dev("robot") });
        transport.clear();

        let events = machine.handle_event(TransportEvent::CapabilitiesFound {
            device: dev("robot"),
            capabilities: vec![config.command_capability()],
        });
        assert_eq!(phases(&events), vec![LinkPhase::Failed]);
        assert_eq!(machine.last_error(), Some("required capabilities not found: telemetry"));
        assert_eq!(transport.calls(), vec![TransportCall::Disconnect(dev("robot"))]);

        // The resulting link loss keeps the failure visible
        let events = machine.handle_event(TransportEvent::LinkLost {
            device: dev("robot"),
            reason: None,
        });
        assert!(phases(&events).is_empty());
        assert_eq!(machine.phase(), LinkPhase::Failed);
    }

    #[test]
    fn test_disconnect_then_teardown_completes_to_idle() {
        let (transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");
        transport.clear();

        let events = machine.disconnect();
        assert_eq!(phases(&events), vec![LinkPhase::Disconnected]);
        assert_eq!(transport.calls(), vec![TransportCall::Disconnect(dev("robot"))]);

        let events = machine.handle_event(TransportEvent::LinkLost {
            device: dev("robot"),
            reason: None,
        });
        assert_eq!(phases(&events), vec![LinkPhase::Idle]);

        // Nothing left to disconnect
        assert!(machine.disconnect().is_empty());
    }

    #[test]
    fn test_missing_teardown_event_does_not_mask_next_loss() {
        let (_transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");

        // The transport never reports the end of this link
        machine.disconnect();
        assert_eq!(machine.phase(), LinkPhase::Disconnected);

        make_ready(&mut machine, &config, "robot");
        let events = machine.handle_event(TransportEvent::LinkLost {
            device: dev("robot"),
            reason: Some("out of range".to_string()),
        });
        assert_eq!(phases(&events), vec![LinkPhase::Disconnected]);
        assert_eq!(machine.last_error(), Some("out of range"));
        assert!(machine.target().is_none());
    }

    #[test]
    fn test_reconnect_same_device_consumes_old_teardown() {
        let (_transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");

        machine.disconnect();
        machine.connect(dev("robot"));

        // Loss of the old link arrives before the new link is up
        let events = machine.handle_event(TransportEvent::LinkLost {
            device: dev("robot"),
            reason: None,
        });
        assert!(phases(&events).is_empty());
        assert_eq!(machine.phase(), LinkPhase::Connecting);

        machine.handle_event(TransportEvent::LinkEstablished { device: dev("robot") });
        assert_eq!(machine.phase(), LinkPhase::DiscoveringCapabilities);
    }

    #[test]
    fn test_disconnect_while_connecting() {
        let (transport, mut machine, _config) = setup();

        machine.connect(dev("robot"));
        let events = machine.disconnect();
        assert_eq!(phases(&events), vec![LinkPhase::Disconnected]);
        assert_eq!(transport.calls().last(), Some(&TransportCall::Disconnect(dev("robot"))));

        // An abandoned connect may be reported as a failure instead of a loss
        let events = machine.handle_event(TransportEvent::LinkFailed {
            device: dev("robot"),
            reason: "cancelled".to_string(),
        });
        assert_eq!(phases(&events), vec![LinkPhase::Idle]);
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_unexpected_link_loss_clears_session() {
        let (_transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");
        machine.handle_event(telemetry_event(&config, "robot", armed_telemetry().encode().to_vec()));
        assert!(machine.telemetry().is_some());

        let events = machine.handle_event(TransportEvent::LinkLost {
            device: dev("robot"),
            reason: Some("supervision timeout".to_string()),
        });
        assert_eq!(phases(&events), vec![LinkPhase::Disconnected]);
        assert!(events.contains(&SessionEvent::TelemetryChanged(None)));
        assert!(machine.telemetry().is_none());
        assert!(machine.target().is_none());
        assert_eq!(machine.last_error(), Some("supervision timeout"));
    }

    #[test]
    fn test_telemetry_replaces_snapshot() {
        let (_transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");

        let first = armed_telemetry();
        let events = machine.handle_event(telemetry_event(&config, "robot", first.encode().to_vec()));
        assert_eq!(events, vec![SessionEvent::TelemetryChanged(Some(first))]);

        let second = Telemetry {
            state: SystemState::Fault,
            error_code: ErrorCode::DeadmanTimeout,
            last_cmd_age_ms: 250,
            battery_mv: 7350,
        };
        machine.handle_event(telemetry_event(&config, "robot", second.encode().to_vec()));
        assert_eq!(machine.telemetry(), Some(second));
    }

    #[test]
    fn test_corrupt_telemetry_is_ignored() {
        let (_transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");

        let good = armed_telemetry();
        machine.handle_event(telemetry_event(&config, "robot", good.encode().to_vec()));

        let mut bad = good.encode().to_vec();
        bad[0] = 0x02;
        let events = machine.handle_event(telemetry_event(&config, "robot", bad));
        assert!(events.is_empty());
        let events = machine.handle_event(telemetry_event(&config, "robot", vec![0x01, 0x10]));
        assert!(events.is_empty());

        assert_eq!(machine.telemetry(), Some(good));
        assert_eq!(machine.phase(), LinkPhase::Ready);
    }

    #[test]
    fn test_bytes_from_other_sources_ignored() {
        let (_transport, mut machine, config) = setup();
        make_ready(&mut machine, &config, "robot");

        let frame = armed_telemetry().encode().to_vec();
        machine.handle_event(telemetry_event(&config, "someone-else", frame.clone()));
        machine.handle_event(TransportEvent::BytesReceived {
            device: dev("robot"),
            capability: config.command_capability(),
            data: frame,
        });
        assert!(machine.telemetry().is_none());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(LinkPhase::Connecting.to_string(), "Connecting...");
        assert_eq!(LinkPhase::DiscoveringCapabilities.label(), "Discovering capabilities...");
        assert_eq!(LinkPhase::Failed.label(), "Connection failed");
        assert!(LinkPhase::Connecting.is_pending());
        assert!(!LinkPhase::Ready.is_pending());
        assert!(LinkPhase::Failed.is_ended());
        assert!(LinkPhase::Disconnected.is_ended());
        assert!(!LinkPhase::Idle.is_ended());
        assert!(!LinkPhase::Ready.is_ended());
    }
}
