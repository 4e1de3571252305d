//! In-process [`Transport`] backed by simulated robots.
//!
//! Requests are answered synchronously by posting events on the client's
//! event channel. A background thread runs the firmware deadman check every
//! tick and sends telemetry notifications every telemetry period.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use legctrl_client::{
    AdapterState, CapabilityId, DeviceDescriptor, DeviceId, EventSender, Transport, TransportEvent,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::config::{SimConfig, SimDeviceConfig};
use crate::error::{SimError, SimResult};
use crate::firmware::RobotFirmware;

struct SimDevice {
    config: SimDeviceConfig,
    firmware: RobotFirmware,
    linked: bool,
}

impl SimDevice {
    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(self.config.id.as_str(), self.config.name.clone())
    }
}

struct SimState {
    devices: Vec<SimDevice>,
    rng: ChaCha8Rng,
    scanning: bool,
    last_telemetry_ms: u64,
}

struct SimShared {
    config: SimConfig,
    events: EventSender,
    epoch: Instant,
    state: Mutex<SimState>,
    writes_dropped: AtomicU64,
    stop: AtomicBool,
}

impl SimShared {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Sim: event dropped, client gone");
        }
    }

    fn command_capability(&self) -> CapabilityId {
        CapabilityId::new(&self.config.command_characteristic)
    }

    fn telemetry_capability(&self) -> CapabilityId {
        CapabilityId::new(&self.config.telemetry_characteristic)
    }

    /// One pass of the background loop.
    fn step(&self) {
        let now = self.now_ms();
        let mut state = self.state.lock();

        for device in state.devices.iter_mut().filter(|d| d.linked) {
            if device.firmware.tick(now) {
                info!("Sim[{}]: deadman tripped", device.config.id);
            }
        }

        if now.saturating_sub(state.last_telemetry_ms) < self.config.telemetry_period_ms {
            return;
        }
        state.last_telemetry_ms = now;

        for device in state.devices.iter().filter(|d| d.linked) {
            if let Some(frame) = device.firmware.notification(now) {
                self.emit(TransportEvent::BytesReceived {
                    device: DeviceId::new(device.config.id.as_str()),
                    capability: self.telemetry_capability(),
                    data: frame.to_vec(),
                });
            }
        }
    }
}

/// Simulated radio with one or more robots in range.
pub struct SimTransport {
    shared: Arc<SimShared>,
    worker: Option<JoinHandle<()>>,
}

impl SimTransport {
    /// Power on the simulated radio and start the background thread.
    ///
    /// Emits [`AdapterState::PoweredOn`] straight away.
    pub fn new(config: SimConfig, events: EventSender) -> SimResult<Self> {
        config.validate()?;

        let devices = config
            .devices
            .iter()
            .map(|device| SimDevice {
                config: device.clone(),
                firmware: RobotFirmware::new(config.battery_mv),
                linked: false,
            })
            .collect();

        let shared = Arc::new(SimShared {
            state: Mutex::new(SimState {
                devices,
                rng: ChaCha8Rng::seed_from_u64(config.seed),
                scanning: false,
                last_telemetry_ms: 0,
            }),
            config,
            events,
            epoch: Instant::now(),
            writes_dropped: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let tick = Duration::from_millis(shared.config.tick_period_ms);
        let worker = thread::Builder::new()
            .name("legctrl-sim".to_string())
            .spawn(move || {
                while !worker_shared.stop.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    worker_shared.step();
                }
            })
            .map_err(SimError::ThreadSpawn)?;

        shared.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));

        Ok(SimTransport {
            shared,
            worker: Some(worker),
        })
    }

    /// Simulate radio loss of an established link.
    pub fn drop_link(&self, device: &DeviceId, reason: &str) -> SimResult<()> {
        let mut state = self.shared.state.lock();
        let sim = find_mut(&mut state.devices, device)?;
        if !sim.linked {
            return Ok(());
        }

        warn!("Sim[{}]: dropping link: {}", device, reason);
        sim.linked = false;
        sim.firmware.on_disconnect();
        self.shared.emit(TransportEvent::LinkLost {
            device: device.clone(),
            reason: Some(reason.to_string()),
        });
        Ok(())
    }

    /// Snapshot of a robot's firmware.
    pub fn firmware(&self, device: &DeviceId) -> SimResult<RobotFirmware> {
        let mut state = self.shared.state.lock();
        Ok(find_mut(&mut state.devices, device)?.firmware.clone())
    }

    /// Milliseconds since the transport was created, the firmware clock.
    pub fn now_ms(&self) -> u64 {
        self.shared.now_ms()
    }

    /// Writes lost to the configured drop probability.
    pub fn writes_dropped(&self) -> u64 {
        self.shared.writes_dropped.load(Ordering::Relaxed)
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn find_mut<'a>(devices: &'a mut [SimDevice], id: &DeviceId) -> SimResult<&'a mut SimDevice> {
    devices
        .iter_mut()
        .find(|d| d.config.id == id.as_str())
        .ok_or_else(|| SimError::UnknownDevice(id.to_string()))
}

impl Transport for SimTransport {
    fn start_discovery(&self, service: &str) {
        let mut state = self.shared.state.lock();
        state.scanning = true;

        if !service.eq_ignore_ascii_case(&self.shared.config.service_uuid) {
            debug!("Sim: nothing advertises service {}", service);
            return;
        }
        for device in &state.devices {
            self.shared.emit(TransportEvent::DeviceDiscovered {
                device: device.descriptor(),
                rssi: Some(device.config.rssi),
            });
        }
    }

    fn stop_discovery(&self) {
        self.shared.state.lock().scanning = false;
    }

    fn connect(&self, device: &DeviceId) {
        let mut state = self.shared.state.lock();
        let sim = match find_mut(&mut state.devices, device) {
            Ok(sim) => sim,
            Err(e) => {
                self.shared.emit(TransportEvent::LinkFailed {
                    device: device.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        if sim.config.refuse_connect {
            debug!("Sim[{}]: refusing connection", device);
            self.shared.emit(TransportEvent::LinkFailed {
                device: device.clone(),
                reason: "connection refused".to_string(),
            });
            return;
        }

        if !sim.linked {
            sim.linked = true;
            sim.firmware.on_connect();
        }
        self.shared.emit(TransportEvent::LinkEstablished { device: device.clone() });
    }

    fn disconnect(&self, device: &DeviceId) {
        let mut state = self.shared.state.lock();
        let Ok(sim) = find_mut(&mut state.devices, device) else {
            return;
        };
        if !sim.linked {
            return;
        }

        sim.linked = false;
        sim.firmware.on_disconnect();
        self.shared.emit(TransportEvent::LinkLost {
            device: device.clone(),
            reason: None,
        });
    }

    fn discover_capabilities(&self, device: &DeviceId, service: &str, _wanted: &[CapabilityId]) {
        let mut state = self.shared.state.lock();
        let Ok(sim) = find_mut(&mut state.devices, device) else {
            return;
        };
        if !sim.linked {
            return;
        }

        let mut capabilities = Vec::new();
        if service.eq_ignore_ascii_case(&self.shared.config.service_uuid) {
            capabilities.push(self.shared.command_capability());
            if !sim.config.omit_telemetry {
                capabilities.push(self.shared.telemetry_capability());
            }
        }
        self.shared.emit(TransportEvent::CapabilitiesFound {
            device: device.clone(),
            capabilities,
        });
    }

    fn enable_notifications(&self, device: &DeviceId, capability: &CapabilityId) {
        let mut state = self.shared.state.lock();
        let Ok(sim) = find_mut(&mut state.devices, device) else {
            return;
        };
        if !sim.linked || !capability.matches(&self.shared.telemetry_capability()) {
            return;
        }

        sim.firmware.set_notifications(true);
        self.shared.emit(TransportEvent::NotificationStateChanged {
            device: device.clone(),
            capability: capability.clone(),
            enabled: true,
        });
    }

    fn write_without_response(&self, device: &DeviceId, capability: &CapabilityId, data: &[u8]) {
        let now = self.shared.now_ms();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let drop_probability = self.shared.config.write_drop_probability;
        if drop_probability > 0.0 && state.rng.gen_bool(drop_probability) {
            self.shared.writes_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Sim[{}]: write lost", device);
            return;
        }

        let Ok(sim) = find_mut(&mut state.devices, device) else {
            return;
        };
        if !sim.linked || !capability.matches(&self.shared.command_capability()) {
            trace!("Sim[{}]: write to unlinked device or wrong capability", device);
            return;
        }

        if let Err(e) = sim.firmware.write(now, data) {
            debug!("Sim[{}]: {}", device, e);
        }
    }
}
