//! Recording fakes shared by the unit tests.

use parking_lot::Mutex;

use crate::transport::{CapabilityId, DeviceId, Transport};

/// A request the core made of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartDiscovery(String),
    StopDiscovery,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverCapabilities(DeviceId, Vec<CapabilityId>),
    EnableNotifications(DeviceId, CapabilityId),
    Write(DeviceId, CapabilityId, Vec<u8>),
}

/// Transport that records every request and never emits events.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write(_, _, data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

impl Transport for RecordingTransport {
    fn start_discovery(&self, service: &str) {
        self.record(TransportCall::StartDiscovery(service.to_string()));
    }

    fn stop_discovery(&self) {
        self.record(TransportCall::StopDiscovery);
    }

    fn connect(&self, device: &DeviceId) {
        self.record(TransportCall::Connect(device.clone()));
    }

    fn disconnect(&self, device: &DeviceId) {
        self.record(TransportCall::Disconnect(device.clone()));
    }

    fn discover_capabilities(&self, device: &DeviceId, _service: &str, wanted: &[CapabilityId]) {
        self.record(TransportCall::DiscoverCapabilities(device.clone(), wanted.to_vec()));
    }

    fn enable_notifications(&self, device: &DeviceId, capability: &CapabilityId) {
        self.record(TransportCall::EnableNotifications(device.clone(), capability.clone()));
    }

    fn write_without_response(&self, device: &DeviceId, capability: &CapabilityId, data: &[u8]) {
        self.record(TransportCall::Write(device.clone(), capability.clone(), data.to_vec()));
    }
}
