//! Per-device synchronization state.
//!
//! Everything the protocol requires the server to remember between
//! requests from one device lives here: sync keys per collection,
//! persisted body preferences, cached search results, and the groups a
//! `Ping` watches. All reads and writes for one device go through a
//! single mutex so concurrent requests from the same device cannot
//! interleave a read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::handler::HandlerType;

/// A persisted body or body-part preference, as negotiated by the
/// client inside `Options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPref {
    /// `BodyPreference` or `BodyPartPreference`.
    pub element: String,
    /// Requested body type (1 plain, 2 HTML, 4 MIME).
    pub content_type: u8,
    /// Byte limit, `None` for untruncated.
    pub truncation_size: Option<u32>,
    /// Send nothing rather than a truncated body.
    pub all_or_none: bool,
    /// Preview length in characters, when requested.
    pub preview: Option<u32>,
}

/// A cached search hit, addressable later through its `LongId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Handler the hit belongs to.
    pub handler: HandlerType,
    /// Collection id of the hit.
    pub group: String,
    /// Record id of the hit.
    pub record: String,
}

#[derive(Default)]
struct DeviceInner {
    sync_keys: HashMap<String, u32>,
    collections: HashMap<HandlerType, Vec<String>>,
    body_prefs: HashMap<String, Vec<BodyPref>>,
    search_hits: HashMap<String, SearchHit>,
    ping_groups: Vec<String>,
    client_managed: Option<String>,
}

/// State of one device, guarded by a single mutex.
pub struct DeviceState {
    id: String,
    inner: Mutex<DeviceInner>,
}

impl DeviceState {
    fn new(id: &str) -> DeviceState {
        DeviceState {
            id: id.to_owned(),
            inner: Mutex::new(DeviceInner::default()),
        }
    }

    /// The device id this state belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current sync key for `group`, `"0"` when the collection has
    /// never synchronized.
    pub fn sync_key(&self, group: &str) -> String {
        let inner = self.inner.lock();
        inner
            .sync_keys
            .get(group)
            .copied()
            .unwrap_or(0)
            .to_string()
    }

    /// Advances the sync key for `group` by one and returns the new
    /// value. Advancing a never-synchronized collection yields `"1"`.
    pub fn advance_sync_key(&self, group: &str) -> String {
        let mut inner = self.inner.lock();
        let key = inner.sync_keys.entry(group.to_owned()).or_insert(0);
        *key += 1;
        debug!(device = %self.id, group = %group, key = *key, "sync key advanced");
        key.to_string()
    }

    /// Resets the key for `group` to `"0"` so the next client key
    /// cannot match and the device is forced into a full resync.
    pub fn invalidate_sync_key(&self, group: &str) {
        let mut inner = self.inner.lock();
        inner.sync_keys.insert(group.to_owned(), 0);
        debug!(device = %self.id, group = %group, "sync key invalidated");
    }

    /// Whether `key` matches the current key for `group`.
    pub fn key_matches(&self, group: &str, key: &str) -> bool {
        self.sync_key(group) == key
    }

    /// Collection ids last announced to the device for `handler`.
    pub fn collections(&self, handler: HandlerType) -> Vec<String> {
        self.inner
            .lock()
            .collections
            .get(&handler)
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces the announced collection list for `handler`.
    pub fn set_collections(&self, handler: HandlerType, groups: Vec<String>) {
        self.inner.lock().collections.insert(handler, groups);
    }

    /// Persisted body preferences for `scope` (a collection id or a
    /// command name for command-wide preferences).
    pub fn body_prefs(&self, scope: &str) -> Vec<BodyPref> {
        self.inner
            .lock()
            .body_prefs
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Persists body preferences for `scope`.
    pub fn set_body_prefs(&self, scope: &str, prefs: Vec<BodyPref>) {
        self.inner.lock().body_prefs.insert(scope.to_owned(), prefs);
    }

    /// Caches search hits keyed by their long id.
    pub fn cache_search(&self, hits: Vec<(String, SearchHit)>) {
        self.inner.lock().search_hits.extend(hits);
    }

    /// Takes a cached search hit, removing it from the cache.
    pub fn take_search_hit(&self, long_id: &str) -> Option<SearchHit> {
        self.inner.lock().search_hits.remove(long_id)
    }

    /// Groups watched by the last `Ping` request.
    pub fn ping_groups(&self) -> Vec<String> {
        self.inner.lock().ping_groups.clone()
    }

    /// Replaces the watched `Ping` groups.
    pub fn set_ping_groups(&self, groups: Vec<String>) {
        self.inner.lock().ping_groups = groups;
    }

    /// The client's `Supported` declaration, naming the elements it
    /// manages itself.
    pub fn client_managed(&self) -> Option<String> {
        self.inner.lock().client_managed.clone()
    }

    /// Stores the client's `Supported` declaration.
    pub fn set_client_managed(&self, elements: &str) {
        self.inner.lock().client_managed = Some(elements.to_owned());
    }
}

/// Registry handing out the shared [`DeviceState`] for each device id.
#[derive(Default)]
pub struct DeviceSessions {
    devices: RwLock<HashMap<String, Arc<DeviceState>>>,
}

impl DeviceSessions {
    /// Creates an empty registry.
    pub fn new() -> DeviceSessions {
        DeviceSessions::default()
    }

    /// Returns the state for `device_id`, creating it on first use.
    pub fn device(&self, device_id: &str) -> Arc<DeviceState> {
        if let Some(state) = self.devices.read().get(device_id) {
            return Arc::clone(state);
        }
        let mut devices = self.devices.write();
        Arc::clone(
            devices
                .entry(device_id.to_owned())
                .or_insert_with(|| Arc::new(DeviceState::new(device_id))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_keys_start_at_zero_and_advance() {
        let dev = DeviceState::new("dev1");
        assert_eq!(dev.sync_key("M0"), "0");
        assert_eq!(dev.advance_sync_key("M0"), "1");
        assert_eq!(dev.advance_sync_key("M0"), "2");
        assert!(dev.key_matches("M0", "2"));
        assert!(!dev.key_matches("M0", "1"));
    }

    #[test]
    fn invalidation_forces_resync() {
        let dev = DeviceState::new("dev1");
        dev.advance_sync_key("C3");
        dev.invalidate_sync_key("C3");
        assert_eq!(dev.sync_key("C3"), "0");
        assert!(!dev.key_matches("C3", "1"));
    }

    #[test]
    fn search_hits_are_taken_once() {
        let dev = DeviceState::new("dev1");
        dev.cache_search(vec![(
            "L1".into(),
            SearchHit {
                handler: HandlerType::Mail,
                group: "M0".into(),
                record: "M7".into(),
            },
        )]);
        assert!(dev.take_search_hit("L1").is_some());
        assert!(dev.take_search_hit("L1").is_none());
    }

    #[test]
    fn sessions_share_state_per_device() {
        let sessions = DeviceSessions::new();
        sessions.device("a").advance_sync_key("M0");
        assert_eq!(sessions.device("a").sync_key("M0"), "1");
        assert_eq!(sessions.device("b").sync_key("M0"), "0");
    }

    #[test]
    fn body_prefs_round_trip() {
        let dev = DeviceState::new("dev1");
        let prefs = vec![BodyPref {
            element: "BodyPreference".into(),
            content_type: 2,
            truncation_size: Some(5_120),
            all_or_none: false,
            preview: None,
        }];
        dev.set_body_prefs("M0", prefs.clone());
        assert_eq!(dev.body_prefs("M0"), prefs);
        assert!(dev.body_prefs("C1").is_empty());
    }
}
