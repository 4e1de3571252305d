//! [`Transport`] over TCP, talking to `legctrl bridge` endpoints.
//!
//! Each configured endpoint stands in for one robot in radio range. A TCP
//! connection is the link. Writes are queued to a writer thread without
//! acknowledgment; a reader thread splits inbound bytes into telemetry frames.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender, TrySendError};
use legctrl_client::{
    AdapterState, CapabilityId, DeviceDescriptor, DeviceId, EventSender, Transport, TransportEvent,
};
use legctrl_protocol::{
    FrameCodec, COMMAND_CHARACTERISTIC_UUID, SERVICE_UUID, TELEMETRY_CHARACTERISTIC_UUID,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{RunnerError, RunnerResult};

// ============================================================================
// Configuration
// ============================================================================

/// A bridge endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpEndpoint {
    /// `host:port` of the bridge. Also the device identity.
    pub address: String,
    /// Name reported in discovery.
    #[serde(default)]
    pub name: Option<String>,
}

/// Configuration for [`TcpTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Bridges to report in discovery.
    pub endpoints: Vec<TcpEndpoint>,
    /// Service the bridges expose.
    pub service_uuid: String,
    /// Command characteristic reported for every bridge.
    pub command_characteristic: String,
    /// Telemetry characteristic reported for every bridge.
    pub telemetry_characteristic: String,
    /// Give up on a connection attempt after this long.
    pub connect_timeout_ms: u64,
    /// Writes queued per link before new ones are dropped.
    pub write_queue_depth: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            endpoints: Vec::new(),
            service_uuid: SERVICE_UUID.to_string(),
            command_characteristic: COMMAND_CHARACTERISTIC_UUID.to_string(),
            telemetry_characteristic: TELEMETRY_CHARACTERISTIC_UUID.to_string(),
            connect_timeout_ms: 2000,
            write_queue_depth: 64,
        }
    }
}

impl TcpConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.write_queue_depth == 0 {
            return Err(RunnerError::InvalidConfig("write_queue_depth must be non-zero".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(RunnerError::InvalidConfig("connect_timeout_ms must be non-zero".to_string()));
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if self.endpoints[..i].iter().any(|e| e.address == endpoint.address) {
                return Err(RunnerError::InvalidConfig(format!(
                    "duplicate endpoint {}",
                    endpoint.address
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Links
// ============================================================================

struct OpenLink {
    stream: TcpStream,
    writes: Sender<Vec<u8>>,
    notifying: bool,
    workers: Vec<JoinHandle<()>>,
}

enum LinkSlot {
    Connecting,
    Open(OpenLink),
}

struct Slot {
    id: u64,
    link: LinkSlot,
}

struct TcpShared {
    config: TcpConfig,
    events: EventSender,
    links: Mutex<HashMap<DeviceId, Slot>>,
    next_link_id: AtomicU64,
    writes_dropped: AtomicU64,
}

impl TcpShared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Tcp: event dropped, client gone");
        }
    }

    fn command_capability(&self) -> CapabilityId {
        CapabilityId::new(&self.config.command_characteristic)
    }

    fn telemetry_capability(&self) -> CapabilityId {
        CapabilityId::new(&self.config.telemetry_characteristic)
    }

    fn endpoint(&self, device: &DeviceId) -> Option<&TcpEndpoint> {
        self.config.endpoints.iter().find(|e| e.address == device.as_str())
    }

    /// Finish a connection attempt started by [`Transport::connect`].
    fn complete_connect(self: &Arc<Self>, device: DeviceId, id: u64, result: std::io::Result<TcpStream>) {
        let mut links = self.links.lock();
        let still_wanted = matches!(
            links.get(&device),
            Some(Slot { id: slot_id, link: LinkSlot::Connecting }) if *slot_id == id
        );
        if !still_wanted {
            debug!("Tcp[{}]: connection attempt {} abandoned", device, id);
            if let Ok(stream) = result {
                let _ = stream.shutdown(Shutdown::Both);
            }
            return;
        }

        let stream = match result.and_then(|s| s.set_nodelay(true).map(|_| s)) {
            Ok(stream) => stream,
            Err(e) => {
                links.remove(&device);
                warn!("Tcp[{}]: connect failed: {}", device, e);
                self.emit(TransportEvent::LinkFailed {
                    device,
                    reason: e.to_string(),
                });
                return;
            }
        };

        match self.open_link(&device, id, stream) {
            Ok(link) => {
                links.insert(device.clone(), Slot { id, link: LinkSlot::Open(link) });
                info!("Tcp[{}]: link established", device);
                self.emit(TransportEvent::LinkEstablished { device });
            }
            Err(e) => {
                links.remove(&device);
                self.emit(TransportEvent::LinkFailed {
                    device,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn open_link(self: &Arc<Self>, device: &DeviceId, id: u64, stream: TcpStream) -> std::io::Result<OpenLink> {
        let (writes, queued) = bounded::<Vec<u8>>(self.config.write_queue_depth);

        let mut write_half = stream.try_clone()?;
        let writer_device = device.clone();
        let writer = thread::Builder::new()
            .name(format!("legctrl-tcp-tx-{}", id))
            .spawn(move || {
                for data in queued {
                    if let Err(e) = write_half.write_all(&data) {
                        debug!("Tcp[{}]: write failed: {}", writer_device, e);
                        break;
                    }
                }
            })?;

        let read_half = stream.try_clone()?;
        let shared = self.clone();
        let reader_device = device.clone();
        let reader = thread::Builder::new()
            .name(format!("legctrl-tcp-rx-{}", id))
            .spawn(move || shared.read_loop(reader_device, id, read_half))?;

        Ok(OpenLink {
            stream,
            writes,
            notifying: false,
            workers: vec![writer, reader],
        })
    }

    fn read_loop(&self, device: DeviceId, id: u64, mut stream: TcpStream) {
        let mut codec = FrameCodec::new();
        let mut buf = [0u8; 256];

        let reason = loop {
            match stream.read(&mut buf) {
                Ok(0) => break "connection closed by peer".to_string(),
                Ok(n) => {
                    codec.push(&buf[..n]);
                    while let Some(frame) = codec.decode() {
                        self.deliver(&device, frame);
                    }
                }
                Err(e) => break e.to_string(),
            }
        };

        // A link that disconnect() already removed reports nothing further
        let mut links = self.links.lock();
        let current = matches!(links.get(&device), Some(slot) if slot.id == id);
        if current {
            links.remove(&device);
            drop(links);
            warn!("Tcp[{}]: link lost: {}", device, reason);
            self.emit(TransportEvent::LinkLost {
                device,
                reason: Some(reason),
            });
        }
    }

    fn deliver(&self, device: &DeviceId, frame: Vec<u8>) {
        let notifying = matches!(
            self.links.lock().get(device),
            Some(Slot { link: LinkSlot::Open(link), .. }) if link.notifying
        );
        if !notifying {
            trace!("Tcp[{}]: frame before notifications enabled dropped", device);
            return;
        }
        self.emit(TransportEvent::BytesReceived {
            device: device.clone(),
            capability: self.telemetry_capability(),
            data: frame,
        });
    }
}

/// Close a link's socket and wait for its threads.
fn close_link(link: OpenLink) {
    let OpenLink {
        stream,
        writes,
        workers,
        ..
    } = link;
    drop(writes);
    let _ = stream.shutdown(Shutdown::Both);
    for worker in workers {
        let _ = worker.join();
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Radio stand-in that reaches robots through `legctrl bridge`.
pub struct TcpTransport {
    shared: Arc<TcpShared>,
}

impl TcpTransport {
    /// Create the transport. It reports itself powered on straight away.
    pub fn new(config: TcpConfig, events: EventSender) -> RunnerResult<Self> {
        config.validate()?;
        let shared = Arc::new(TcpShared {
            config,
            events,
            links: Mutex::new(HashMap::new()),
            next_link_id: AtomicU64::new(1),
            writes_dropped: AtomicU64::new(0),
        });
        shared.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        Ok(TcpTransport { shared })
    }

    /// Writes dropped because a link's queue was full.
    pub fn writes_dropped(&self) -> u64 {
        self.shared.writes_dropped.load(Ordering::Relaxed)
    }

    /// Whether a link to `device` is open.
    pub fn is_linked(&self, device: &DeviceId) -> bool {
        matches!(
            self.shared.links.lock().get(device),
            Some(Slot { link: LinkSlot::Open(_), .. })
        )
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let links: Vec<Slot> = self.shared.links.lock().drain().map(|(_, slot)| slot).collect();
        for slot in links {
            if let LinkSlot::Open(link) = slot.link {
                close_link(link);
            }
        }
    }
}

fn resolve(address: &str) -> std::io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} did not resolve", address),
        )
    })
}

impl Transport for TcpTransport {
    fn start_discovery(&self, service: &str) {
        if !service.eq_ignore_ascii_case(&self.shared.config.service_uuid) {
            debug!("Tcp: no endpoint offers service {}", service);
            return;
        }
        for endpoint in &self.shared.config.endpoints {
            self.shared.emit(TransportEvent::DeviceDiscovered {
                device: DeviceDescriptor::new(endpoint.address.as_str(), endpoint.name.clone()),
                rssi: None,
            });
        }
    }

    fn stop_discovery(&self) {}

    fn connect(&self, device: &DeviceId) {
        if self.shared.endpoint(device).is_none() {
            self.shared.emit(TransportEvent::LinkFailed {
                device: device.clone(),
                reason: format!("unknown device: {}", device),
            });
            return;
        }

        let id = self.shared.next_link_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .shared
            .links
            .lock()
            .insert(device.clone(), Slot { id, link: LinkSlot::Connecting });
        if let Some(Slot { link: LinkSlot::Open(link), .. }) = previous {
            close_link(link);
        }

        let shared = self.shared.clone();
        let target = device.clone();
        let timeout = Duration::from_millis(shared.config.connect_timeout_ms);
        let spawned = thread::Builder::new()
            .name("legctrl-tcp-connect".to_string())
            .spawn(move || {
                debug!("Tcp[{}]: connecting", target);
                let result = resolve(target.as_str())
                    .and_then(|addr| TcpStream::connect_timeout(&addr, timeout));
                shared.complete_connect(target, id, result);
            });

        if let Err(e) = spawned {
            self.shared.links.lock().remove(device);
            self.shared.emit(TransportEvent::LinkFailed {
                device: device.clone(),
                reason: e.to_string(),
            });
        }
    }

    fn disconnect(&self, device: &DeviceId) {
        let Some(slot) = self.shared.links.lock().remove(device) else {
            return;
        };

        info!("Tcp[{}]: disconnecting", device);
        if let LinkSlot::Open(link) = slot.link {
            close_link(link);
        }
        self.shared.emit(TransportEvent::LinkLost {
            device: device.clone(),
            reason: None,
        });
    }

    fn discover_capabilities(&self, device: &DeviceId, service: &str, _wanted: &[CapabilityId]) {
        if !self.is_linked(device) {
            return;
        }
        let capabilities = if service.eq_ignore_ascii_case(&self.shared.config.service_uuid) {
            vec![self.shared.command_capability(), self.shared.telemetry_capability()]
        } else {
            Vec::new()
        };
        self.shared.emit(TransportEvent::CapabilitiesFound {
            device: device.clone(),
            capabilities,
        });
    }

    fn enable_notifications(&self, device: &DeviceId, capability: &CapabilityId) {
        if !capability.matches(&self.shared.telemetry_capability()) {
            return;
        }
        {
            let mut links = self.shared.links.lock();
            let Some(Slot { link: LinkSlot::Open(link), .. }) = links.get_mut(device) else {
                return;
            };
            link.notifying = true;
        }
        self.shared.emit(TransportEvent::NotificationStateChanged {
            device: device.clone(),
            capability: capability.clone(),
            enabled: true,
        });
    }

    fn write_without_response(&self, device: &DeviceId, capability: &CapabilityId, data: &[u8]) {
        if !capability.matches(&self.shared.command_capability()) {
            debug!("Tcp[{}]: write to non-command capability {} ignored", device, capability.as_str());
            return;
        }

        let links = self.shared.links.lock();
        let Some(Slot { link: LinkSlot::Open(link), .. }) = links.get(device) else {
            trace!("Tcp[{}]: write with no link ignored", device);
            return;
        };

        match link.writes.try_send(data.to_vec()) {
            Ok(()) => trace!("Tcp[{}]: queued {}", device, hex::encode_upper(data)),
            Err(TrySendError::Full(_)) => {
                self.shared.writes_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Tcp[{}]: write queue full, frame dropped", device);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Tcp[{}]: writer gone, frame dropped", device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legctrl_client::event_channel;
    use std::net::TcpListener;

    fn endpoint(address: &str, name: &str) -> TcpEndpoint {
        TcpEndpoint {
            address: address.to_string(),
            name: Some(name.to_string()),
        }
    }

    #[test]
    fn test_config_yaml_defaults() {
        let yaml = "endpoints:\n  - address: 127.0.0.1:7400\n    name: LegCtrl\n";
        let config: TcpConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.write_queue_depth, 64);
        assert_eq!(config.service_uuid, SERVICE_UUID);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_duplicates() {
        let config = TcpConfig {
            endpoints: vec![endpoint("a:1", "A"), endpoint("a:1", "B")],
            ..TcpConfig::default()
        };
        assert!(matches!(config.validate(), Err(RunnerError::InvalidConfig(_))));
    }

    #[test]
    fn test_discovery_reports_endpoints() {
        let (tx, rx) = event_channel();
        let config = TcpConfig {
            endpoints: vec![endpoint("127.0.0.1:1", "One"), endpoint("127.0.0.1:2", "Two")],
            ..TcpConfig::default()
        };
        let transport = TcpTransport::new(config, tx).expect("valid config");

        transport.start_discovery(SERVICE_UUID);
        let events: Vec<TransportEvent> = rx.try_iter().collect();
        assert_eq!(
            events[0],
            TransportEvent::AdapterStateChanged(AdapterState::PoweredOn)
        );
        let names: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::DeviceDiscovered { device, .. } => Some(device.display_name().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["One", "Two"]);

        transport.start_discovery("some-other-service");
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_connect_unknown_fails() {
        let (tx, rx) = event_channel();
        let transport = TcpTransport::new(TcpConfig::default(), tx).expect("valid config");
        let _ = rx.try_iter().count();

        transport.connect(&DeviceId::new("nowhere:1"));
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(TransportEvent::LinkFailed { reason, .. }) => assert!(reason.contains("unknown device")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_link_lifecycle() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        let (tx, rx) = event_channel();
        let config = TcpConfig {
            endpoints: vec![endpoint(&address, "Bridge")],
            ..TcpConfig::default()
        };
        let transport = TcpTransport::new(config, tx).expect("valid config");
        let device = DeviceId::new(address.as_str());
        let _ = rx.try_iter().count();

        transport.connect(&device);
        let (mut peer, _) = listener.accept().expect("accept");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).expect("event"),
            TransportEvent::LinkEstablished { device: device.clone() }
        );
        assert!(transport.is_linked(&device));

        let command = CapabilityId::new(COMMAND_CHARACTERISTIC_UUID);
        transport.write_without_response(&device, &command, &[0x01, 0x01, 0x00, 0x00]);
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).expect("frame arrives");
        assert_eq!(buf, [0x01, 0x01, 0x00, 0x00]);

        transport.disconnect(&device);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).expect("event"),
            TransportEvent::LinkLost { device: device.clone(), reason: None }
        );
        // The reader exiting after disconnect reports nothing more
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!transport.is_linked(&device));
    }

    #[test]
    fn test_peer_close_is_link_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        let (tx, rx) = event_channel();
        let config = TcpConfig {
            endpoints: vec![endpoint(&address, "Bridge")],
            ..TcpConfig::default()
        };
        let transport = TcpTransport::new(config, tx).expect("valid config");
        let device = DeviceId::new(address.as_str());
        let _ = rx.try_iter().count();

        transport.connect(&device);
        let (peer, _) = listener.accept().expect("accept");
        rx.recv_timeout(Duration::from_secs(2)).expect("established");

        drop(peer);
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(TransportEvent::LinkLost { reason: Some(_), .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(!transport.is_linked(&device));
    }
}
