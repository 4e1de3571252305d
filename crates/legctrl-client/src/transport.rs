//! The boundary between the session core and the radio transport.
//!
//! The core issues requests through [`Transport`] and never waits for them;
//! every outcome comes back later as a [`TransportEvent`] on the event
//! channel created by [`event_channel`]. A transport must deliver its own
//! events in order.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identities
// ============================================================================

/// Stable identity of a peripheral device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id.
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        DeviceId(id)
    }
}

/// Identity of a write target or notify source within the control service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    /// Create a capability id (usually a characteristic UUID).
    pub fn new(id: impl Into<String>) -> Self {
        CapabilityId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison, since UUID spellings differ between stacks.
    pub fn matches(&self, other: &CapabilityId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered device. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identity.
    pub id: DeviceId,
    /// Advertised name, if any.
    pub name: Option<String>,
}

impl DeviceDescriptor {
    /// Create a descriptor.
    pub fn new(id: impl Into<DeviceId>, name: Option<String>) -> Self {
        DeviceDescriptor { id: id.into(), name }
    }

    /// Name for display, `"Unknown"` when the device did not advertise one.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Power and permission state of the local radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdapterState {
    /// Not yet reported.
    #[default]
    Unknown,
    /// The adapter is restarting.
    Resetting,
    /// No usable radio on this host.
    Unsupported,
    /// The process may not use the radio.
    Unauthorized,
    /// Radio switched off.
    PoweredOff,
    /// Ready for scanning and connections.
    PoweredOn,
}

impl AdapterState {
    /// Label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            AdapterState::Unknown => "Unknown",
            AdapterState::Resetting => "Resetting",
            AdapterState::Unsupported => "Unsupported",
            AdapterState::Unauthorized => "Unauthorized",
            AdapterState::PoweredOff => "Powered Off",
            AdapterState::PoweredOn => "Powered On",
        }
    }

    /// Whether scans and connections may be started.
    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Events (Transport → Core)
// ============================================================================

/// Everything the transport reports back to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The adapter changed power or permission state.
    AdapterStateChanged(AdapterState),

    /// A device advertising the control service was seen.
    DeviceDiscovered {
        /// The device.
        device: DeviceDescriptor,
        /// Signal strength in dBm, when known.
        rssi: Option<i16>,
    },

    /// A link to the device is up.
    LinkEstablished {
        /// The device.
        device: DeviceId,
    },

    /// A connect request failed.
    LinkFailed {
        /// The device.
        device: DeviceId,
        /// Human-readable reason.
        reason: String,
    },

    /// The link went down, either on request or unexpectedly.
    LinkLost {
        /// The device.
        device: DeviceId,
        /// Reason for an unexpected loss; `None` after a requested teardown.
        reason: Option<String>,
    },

    /// Capability discovery finished.
    CapabilitiesFound {
        /// The device.
        device: DeviceId,
        /// Capabilities found within the control service.
        capabilities: Vec<CapabilityId>,
    },

    /// Notifications on a capability were switched on or off.
    NotificationStateChanged {
        /// The device.
        device: DeviceId,
        /// The notify source.
        capability: CapabilityId,
        /// New notification state.
        enabled: bool,
    },

    /// Bytes arrived on a notify source.
    BytesReceived {
        /// The device.
        device: DeviceId,
        /// The notify source.
        capability: CapabilityId,
        /// One notification's payload.
        data: Vec<u8>,
    },
}

/// Sending half of the event channel, held by the transport.
pub type EventSender = Sender<TransportEvent>;

/// Receiving half of the event channel, consumed by the client.
pub type EventReceiver = Receiver<TransportEvent>;

/// Create the channel a transport reports its events on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}

// ============================================================================
// Requests (Core → Transport)
// ============================================================================

/// Requests the core makes of the radio transport.
///
/// All methods return immediately. Results, where there are any, arrive as
/// [`TransportEvent`]s. Writes are unacknowledged and may be lost.
pub trait Transport: Send + Sync {
    /// Start looking for devices advertising `service`.
    fn start_discovery(&self, service: &str);

    /// Stop looking for devices.
    fn stop_discovery(&self);

    /// Establish a link to `device`.
    fn connect(&self, device: &DeviceId);

    /// Tear down the link to `device`, or abandon a pending connect.
    ///
    /// If `device` has a live or pending link, the transport must follow up
    /// with exactly one [`TransportEvent::LinkLost`] or
    /// [`TransportEvent::LinkFailed`] for it, ordered before any event of a
    /// later link to the same device. With no such link it reports nothing.
    /// The session relies on that event to tell a requested teardown from an
    /// unexpected loss.
    fn disconnect(&self, device: &DeviceId);

    /// Look for `wanted` capabilities within `service` on a linked device.
    fn discover_capabilities(&self, device: &DeviceId, service: &str, wanted: &[CapabilityId]);

    /// Turn on notifications for a notify source.
    fn enable_notifications(&self, device: &DeviceId, capability: &CapabilityId);

    /// Write bytes to a write target without waiting for acknowledgment.
    fn write_without_response(&self, device: &DeviceId, capability: &CapabilityId, data: &[u8]);
}
