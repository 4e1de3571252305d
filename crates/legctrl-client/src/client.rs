//! The top-level coordinator.
//!
//! [`RemoteClient`] owns the catalog, the state machine, the scheduler and
//! the activity log. Transport events are consumed one at a time on a
//! dedicated thread; operator intents arrive from any thread through the
//! public methods.
//!
//! Lock order is scheduler, then state machine. Paths that tear a session
//! down stop the scheduler before taking the state machine lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender};
use legctrl_protocol::{Command, CommandFrame, Telemetry, COMMAND_PERIOD_MS};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::activity_log::{ActivityLog, LogEntry};
use crate::catalog::DeviceCatalog;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::notify::{StateUpdate, Subscribers};
use crate::scheduler::{CommandScheduler, FrameSink};
use crate::session::{ConnectionStateMachine, LinkPhase, SendOutcome, SessionEvent};
use crate::transport::{
    AdapterState, DeviceDescriptor, DeviceId, EventReceiver, Transport, TransportEvent,
};

/// Routes scheduler fires through the session's send gate.
struct SessionSink(Arc<Mutex<ConnectionStateMachine>>);

impl FrameSink for SessionSink {
    fn send_frame(&self, frame: &CommandFrame) -> SendOutcome {
        self.0.lock().send(frame)
    }
}

/// State shared between the caller-facing API and the event thread.
struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    scheduler: CommandScheduler,
    machine: Arc<Mutex<ConnectionStateMachine>>,
    catalog: Mutex<DeviceCatalog>,
    log: Mutex<ActivityLog>,
    subscribers: Mutex<Subscribers>,
    adapter: Mutex<AdapterState>,
    scanning: AtomicBool,
}

impl Shared {
    fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let machine = Arc::new(Mutex::new(ConnectionStateMachine::new(&config, transport.clone())));
        let scheduler = CommandScheduler::new(Arc::new(SessionSink(machine.clone())));
        let log = ActivityLog::new(config.log_capacity);

        Shared {
            config,
            transport,
            scheduler,
            machine,
            catalog: Mutex::new(DeviceCatalog::new()),
            log: Mutex::new(log),
            subscribers: Mutex::new(Subscribers::new()),
            adapter: Mutex::new(AdapterState::Unknown),
            scanning: AtomicBool::new(false),
        }
    }

    fn publish(&self, update: StateUpdate) {
        self.subscribers.lock().publish(update);
    }

    /// Append to the activity log and notify subscribers.
    fn note(&self, message: impl Into<String>) {
        let entry = self.log.lock().push(message);
        self.publish(StateUpdate::Log(entry));
    }

    /// Run a state machine handler and forward what it produced.
    ///
    /// Periodic sending never outlives the session: a move into
    /// `Disconnected` or `Failed` stops the scheduler before subscribers hear
    /// of it.
    fn apply<F>(&self, handler: F)
    where
        F: FnOnce(&mut ConnectionStateMachine) -> Vec<SessionEvent>,
    {
        let events = {
            let mut machine = self.machine.lock();
            handler(&mut machine)
        };

        // Machine lock released above: the scheduler lock comes first
        let ended = events
            .iter()
            .any(|e| matches!(e, SessionEvent::PhaseChanged(phase) if phase.is_ended()));
        if ended {
            self.stop_periodic();
        }

        for event in events {
            match event {
                SessionEvent::PhaseChanged(phase) => self.publish(StateUpdate::Phase(phase)),
                SessionEvent::TelemetryChanged(telemetry) => {
                    self.publish(StateUpdate::Telemetry(telemetry))
                }
                SessionEvent::Note(message) => self.note(message),
            }
        }
    }

    fn stop_periodic(&self) {
        if self.scheduler.stop() {
            self.note("Periodic sending stopped");
            self.publish(StateUpdate::Periodic(false));
        }
    }

    fn stop_scan(&self) {
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.transport.stop_discovery();
            self.note("Scan stopped");
            self.publish(StateUpdate::Scanning(false));
        }
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    fn handle_event(&self, event: TransportEvent) {
        if let TransportEvent::LinkLost { device, .. } = &event {
            let is_target = self.machine.lock().target() == Some(device);
            if is_target {
                self.stop_periodic();
            }
        }

        match event {
            TransportEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            TransportEvent::DeviceDiscovered { device, rssi } => self.on_device_discovered(device, rssi),
            other => self.apply(|machine| machine.handle_event(other)),
        }
    }

    fn on_adapter_state(&self, state: AdapterState) {
        let previous = std::mem::replace(&mut *self.adapter.lock(), state);
        if previous == state {
            return;
        }

        info!("Client: adapter state {} -> {}", previous, state);
        self.note(format!("Radio state: {}", state));
        self.publish(StateUpdate::Adapter(state));

        if !state.is_ready() && self.scanning.swap(false, Ordering::SeqCst) {
            self.publish(StateUpdate::Scanning(false));
        }
    }

    fn on_device_discovered(&self, device: DeviceDescriptor, rssi: Option<i16>) {
        let message = match rssi {
            Some(rssi) => format!("Discovered: {} (RSSI: {})", device.display_name(), rssi),
            None => format!("Discovered: {}", device.display_name()),
        };

        let devices = {
            let mut catalog = self.catalog.lock();
            if !catalog.add_if_new(device) {
                return;
            }
            catalog.list().to_vec()
        };

        debug!("Client: {}", message);
        self.note(message);
        self.publish(StateUpdate::Devices(devices));
    }
}

fn event_loop(shared: Arc<Shared>, events: EventReceiver, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(events) -> event => match event {
                Ok(event) => shared.handle_event(event),
                Err(_) => {
                    debug!("Client: transport event channel closed");
                    break;
                }
            },
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Remote-control client for one robot at a time.
pub struct RemoteClient {
    shared: Arc<Shared>,
    shutdown: Option<Sender<()>>,
    event_thread: Option<JoinHandle<()>>,
}

impl RemoteClient {
    /// Create a client driving `transport`, consuming its events from `events`.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        events: EventReceiver,
    ) -> ClientResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(config, transport));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);

        let loop_shared = shared.clone();
        let event_thread = thread::Builder::new()
            .name("legctrl-events".to_string())
            .spawn(move || event_loop(loop_shared, events, shutdown_rx))
            .map_err(|source| ClientError::ThreadSpawn {
                name: "legctrl-events",
                source,
            })?;

        Ok(RemoteClient {
            shared,
            shutdown: Some(shutdown_tx),
            event_thread: Some(event_thread),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Receive every future [`StateUpdate`].
    pub fn subscribe(&self) -> Receiver<StateUpdate> {
        self.shared.subscribers.lock().subscribe()
    }

    /// Snapshot of the activity log, oldest first.
    pub fn activity_log(&self) -> Vec<LogEntry> {
        self.shared.log.lock().entries()
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    pub fn adapter_state(&self) -> AdapterState {
        *self.shared.adapter.lock()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    /// Clear the catalog and look for robots.
    ///
    /// Refused unless the adapter has reported that it is powered on.
    pub fn start_scan(&self) -> ClientResult<()> {
        let state = self.adapter_state();
        if !state.is_ready() {
            warn!("Client: scan refused, adapter {}", state);
            self.shared.note("Radio not ready");
            return Err(ClientError::AdapterNotReady(state));
        }

        self.shared.catalog.lock().clear();
        self.shared.publish(StateUpdate::Devices(Vec::new()));

        self.shared.transport.start_discovery(&self.shared.config.service_uuid);
        if !self.shared.scanning.swap(true, Ordering::SeqCst) {
            self.shared.publish(StateUpdate::Scanning(true));
        }
        self.shared.note("Scanning for devices...");
        Ok(())
    }

    pub fn stop_scan(&self) {
        self.shared.stop_scan();
    }

    /// Devices found by the current scan, in discovery order.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.shared.catalog.lock().list().to_vec()
    }

    /// First catalogued device advertising `name`.
    pub fn find_device(&self, name: &str) -> Option<DeviceDescriptor> {
        self.shared.catalog.lock().find_by_name(name).cloned()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Connect to a catalogued device, replacing any current session.
    pub fn connect(&self, device: &DeviceId) -> ClientResult<()> {
        let descriptor = self
            .shared
            .catalog
            .lock()
            .get(device)
            .cloned()
            .ok_or_else(|| ClientError::UnknownDevice(device.clone()))?;

        self.shared.stop_scan();
        self.shared.stop_periodic();
        self.shared.note(format!("Connecting to {}...", descriptor.display_name()));
        self.shared.apply(|machine| machine.connect(descriptor.id));
        Ok(())
    }

    /// Stop periodic sending and tear the session down.
    pub fn disconnect(&self) {
        self.shared.stop_periodic();
        self.shared.apply(|machine| machine.disconnect());
    }

    /// Return to `Idle`, e.g. after a failed connect.
    pub fn reset(&self) {
        self.shared.stop_periodic();
        self.shared.apply(|machine| machine.reset());
    }

    pub fn phase(&self) -> LinkPhase {
        self.shared.machine.lock().phase()
    }

    pub fn telemetry(&self) -> Option<Telemetry> {
        self.shared.machine.lock().telemetry()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.machine.lock().last_error().map(str::to_string)
    }

    /// Device of the live or pending session.
    pub fn connected_device(&self) -> Option<DeviceId> {
        self.shared.machine.lock().target().cloned()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Encode and send one command. Ignored unless the session is ready.
    pub fn send(&self, command: Command) -> SendOutcome {
        let frame = command.frame();
        let outcome = self.shared.machine.lock().send(&frame);

        match outcome {
            SendOutcome::Sent => self.shared.note(format!("TX {}: {}", command, frame.to_hex())),
            SendOutcome::NotConnected => {
                debug!("Client: {} ignored, not connected", command);
                self.shared.note(format!("Not connected, {} ignored", command.name()));
            }
        }
        outcome
    }

    pub fn arm(&self) -> SendOutcome {
        self.send(Command::Arm)
    }

    pub fn disarm(&self) -> SendOutcome {
        self.send(Command::Disarm)
    }

    /// Any pulse width is sent as-is; the robot clamps to its safe range.
    pub fn set_servo_ch0(&self, pulse_us: u16) -> SendOutcome {
        self.send(Command::SetServoCh0 { pulse_us })
    }

    pub fn ping(&self) -> SendOutcome {
        self.send(Command::Ping)
    }

    /// Begin repeating `command` at the protocol command rate.
    pub fn start_periodic(&self, command: Command) -> ClientResult<()> {
        self.shared.scheduler.start(command)?;
        self.shared.note(format!(
            "Periodic sending started at {} Hz",
            1000 / COMMAND_PERIOD_MS
        ));
        self.shared.publish(StateUpdate::Periodic(true));
        Ok(())
    }

    /// Change the repeated command. Ignored when periodic sending is off.
    pub fn update_periodic(&self, command: Command) {
        self.shared.scheduler.update(command);
    }

    pub fn stop_periodic(&self) {
        self.shared.stop_periodic();
    }

    pub fn is_periodic_running(&self) -> bool {
        self.shared.scheduler.is_running()
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.shared.scheduler.stop();
        self.shutdown.take();
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
    }
}
