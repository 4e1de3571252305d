//! Devices seen during the current scan.

use crate::transport::{DeviceDescriptor, DeviceId};

/// Deduplicated, order-preserving list of discovered devices.
///
/// The first descriptor seen for an id wins; later sightings with a
/// different name are ignored.
#[derive(Debug, Default, Clone)]
pub struct DeviceCatalog {
    entries: Vec<DeviceDescriptor>,
}

impl DeviceCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add `descriptor` unless its id is already present.
    ///
    /// Returns `true` if the entry was added.
    pub fn add_if_new(&mut self, descriptor: DeviceDescriptor) -> bool {
        if self.contains(&descriptor.id) {
            return false;
        }
        self.entries.push(descriptor);
        true
    }

    /// Entries in discovery order.
    pub fn list(&self) -> &[DeviceDescriptor] {
        &self.entries
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceDescriptor> {
        self.entries.iter().find(|d| &d.id == id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.get(id).is_some()
    }

    /// First entry whose advertised name equals `name`.
    pub fn find_by_name(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.entries.iter().find(|d| d.name.as_deref() == Some(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, name: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(id, Some(name.to_string()))
    }

    #[test]
    fn test_add_if_new_keeps_first_name() {
        let mut catalog = DeviceCatalog::new();

        assert!(catalog.add_if_new(descriptor("dev-1", "LegBot")));
        assert!(!catalog.add_if_new(descriptor("dev-1", "Renamed")));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.list()[0].name.as_deref(), Some("LegBot"));
    }

    #[test]
    fn test_preserves_discovery_order() {
        let mut catalog = DeviceCatalog::new();
        catalog.add_if_new(descriptor("dev-3", "C"));
        catalog.add_if_new(descriptor("dev-1", "A"));
        catalog.add_if_new(descriptor("dev-2", "B"));
        catalog.add_if_new(descriptor("dev-1", "A"));

        let ids: Vec<&str> = catalog.list().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["dev-3", "dev-1", "dev-2"]);
    }

    #[test]
    fn test_clear_and_lookup() {
        let mut catalog = DeviceCatalog::new();
        catalog.add_if_new(descriptor("dev-1", "LegBot"));
        catalog.add_if_new(DeviceDescriptor::new("dev-2", None));

        assert_eq!(catalog.find_by_name("LegBot").map(|d| d.id.as_str()), Some("dev-1"));
        assert!(catalog.find_by_name("Unknown").is_none());
        assert!(catalog.contains(&DeviceId::new("dev-2")));

        catalog.clear();
        assert!(catalog.is_empty());
        assert!(catalog.add_if_new(descriptor("dev-1", "LegBot")));
    }
}
