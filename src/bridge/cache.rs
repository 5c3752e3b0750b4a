//! Device State Cache
//!
//! Last-known snapshot per device, fed exclusively by the inbound message
//! path. Handlers only read.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::types::DeviceSnapshot;

#[derive(Debug, Default)]
pub struct StateCache {
    devices: RwLock<HashMap<String, DeviceSnapshot>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &str) -> Option<DeviceSnapshot> {
        self.devices.read().get(device).cloned()
    }

    /// All known devices with their snapshots, sorted by device id for a
    /// stable listing.
    pub fn all(&self) -> Vec<(String, DeviceSnapshot)> {
        let mut entries: Vec<_> = self
            .devices
            .read()
            .iter()
            .map(|(id, snapshot)| (id.clone(), snapshot.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Merge an attribute delta into the device's snapshot, creating one if
    /// absent, and return the post-merge snapshot. Unrelated attributes
    /// survive the merge. Called only from the inbound reader.
    pub fn merge(&self, device: &str, delta: &Map<String, Value>) -> DeviceSnapshot {
        let mut devices = self.devices.write();
        let snapshot = devices
            .entry(device.to_string())
            .or_insert_with(|| DeviceSnapshot::new(Map::new()));
        for (key, value) in delta {
            snapshot.attributes.insert(key.clone(), value.clone());
        }
        snapshot.updated_at = Utc::now();
        snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn get_unknown_device_is_none() {
        let cache = StateCache::new();
        assert!(cache.get("Bedroom1").is_none());
    }

    #[test]
    fn merge_preserves_unrelated_attributes() {
        let cache = StateCache::new();
        cache.merge("Bedroom1", &delta(&[("state", json!("ON")), ("color_temp", json!(370))]));
        cache.merge("Bedroom1", &delta(&[("brightness", json!(50))]));

        let snapshot = cache.get("Bedroom1").unwrap();
        assert_eq!(snapshot.attributes["brightness"], 50);
        assert_eq!(snapshot.attributes["state"], "ON");
        assert_eq!(snapshot.attributes["color_temp"], 370);
    }

    #[test]
    fn merge_overwrites_changed_attributes() {
        let cache = StateCache::new();
        cache.merge("Bedroom1", &delta(&[("state", json!("ON"))]));
        let snapshot = cache.merge("Bedroom1", &delta(&[("state", json!("OFF"))]));
        assert_eq!(snapshot.attributes["state"], "OFF");
    }

    #[test]
    fn all_is_sorted_by_device_id() {
        let cache = StateCache::new();
        cache.merge("b", &delta(&[("state", json!("ON"))]));
        cache.merge("a", &delta(&[("state", json!("OFF"))]));

        let ids: Vec<_> = cache.all().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
