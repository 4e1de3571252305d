//! Push notifications of client state changes.

use crossbeam_channel::{Receiver, Sender};
use legctrl_protocol::Telemetry;

use crate::activity_log::LogEntry;
use crate::session::LinkPhase;
use crate::transport::{AdapterState, DeviceDescriptor};

/// A change observers may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// The radio adapter changed state.
    Adapter(AdapterState),
    /// Scanning started or stopped.
    Scanning(bool),
    /// The catalog changed; carries the full list.
    Devices(Vec<DeviceDescriptor>),
    /// The session phase changed.
    Phase(LinkPhase),
    /// The telemetry snapshot was replaced or cleared.
    Telemetry(Option<Telemetry>),
    /// Periodic sending started or stopped.
    Periodic(bool),
    /// A new activity log entry.
    Log(LogEntry),
}

/// Fan-out of [`StateUpdate`]s to any number of channel subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct Subscribers {
    senders: Vec<Sender<StateUpdate>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> Receiver<StateUpdate> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.push(tx);
        rx
    }

    /// Deliver `update` to every live subscriber.
    pub fn publish(&mut self, update: StateUpdate) {
        self.senders.retain(|tx| tx.send(update.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let mut subscribers = Subscribers::new();
        let a = subscribers.subscribe();
        let b = subscribers.subscribe();

        subscribers.publish(StateUpdate::Phase(LinkPhase::Connecting));

        assert_eq!(a.try_recv(), Ok(StateUpdate::Phase(LinkPhase::Connecting)));
        assert_eq!(b.try_recv(), Ok(StateUpdate::Phase(LinkPhase::Connecting)));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut subscribers = Subscribers::new();
        let kept = subscribers.subscribe();
        drop(subscribers.subscribe());

        subscribers.publish(StateUpdate::Scanning(true));

        assert_eq!(subscribers.len(), 1);
        assert_eq!(kept.try_recv(), Ok(StateUpdate::Scanning(true)));
    }
}
