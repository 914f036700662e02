//! The per-collection options model.
//!
//! Every command negotiates preferences (filter window, truncation,
//! body preferences, conflict policy, window size) per collection, or
//! per command for collection-less commands. Values merge in a fixed
//! order: seeded defaults, then persisted device preferences, then
//! whatever the current request carries. Looking an option set up can
//! never fail; a scope nobody has seen before is seeded on the spot.

use std::collections::HashMap;

use asgw_document::{Document, NodeId};
use asgw_protocol::tables;
use asgw_store::{BodyPref, DeviceState};
use tracing::debug;

/// Command tags whose body preferences are persisted per device.
const BODY_PREF_TAGS: [&str; 3] = ["Sync", "ItemOperations", "Search"];

/// Elements of a `Collection` that are structure, not options.
const STRUCTURAL: [&str; 4] = ["CollectionId", "SyncKey", "Commands", "Options"];

/// The effective option set for one scope.
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    values: HashMap<String, String>,
    body_prefs: Vec<BodyPref>,
}

impl OptionSet {
    /// Returns an option value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Returns an option parsed as an integer.
    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    /// Whether a boolean option is set to `"1"`.
    pub fn flag(&self, name: &str) -> bool {
        self.get(name) == Some("1")
    }

    /// Sets an option value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_owned(), value.to_owned());
    }

    /// The negotiated `MIMETruncation` as a byte limit, resolved
    /// through the protocol table. `None` means do not truncate.
    pub fn mime_limit(&self) -> Option<u32> {
        let value = u8::try_from(self.get_u32("MIMETruncation")?).ok()?;
        tables::mime_truncation(value).unwrap_or(None)
    }

    /// The legacy body `Truncation` as a byte limit, resolved through
    /// the protocol table. `None` means do not truncate.
    pub fn body_limit(&self) -> Option<u32> {
        let value = u8::try_from(self.get_u32("Truncation")?).ok()?;
        tables::body_truncation(value).unwrap_or(None)
    }

    /// Merges a body preference, replacing any existing entry for the
    /// same element and content type.
    pub fn merge_body_pref(&mut self, pref: BodyPref) {
        match self
            .body_prefs
            .iter_mut()
            .find(|p| p.element == pref.element && p.content_type == pref.content_type)
        {
            Some(slot) => *slot = pref,
            None => self.body_prefs.push(pref),
        }
    }

    /// All negotiated body preferences.
    pub fn body_prefs(&self) -> &[BodyPref] {
        &self.body_prefs
    }

    /// The preference for one content type, if negotiated.
    pub fn body_pref(&self, content_type: u8) -> Option<&BodyPref> {
        self.body_prefs
            .iter()
            .find(|p| p.content_type == content_type)
    }
}

/// Seeded defaults per command tag.
fn defaults(tag: &str) -> OptionSet {
    let mut set = OptionSet::default();
    match tag {
        "Sync" => {
            set.set("Conflict", "1");
            set.set("DeletesAsMoves", "1");
            set.set("FilterType", "0");
            set.set("GetChanges", "1");
            set.set("MIMESupport", "0");
            set.set("MIMETruncation", "8");
            set.set("WindowSize", "100");
            set.merge_body_pref(default_body_pref());
        }
        "ItemOperations" => {
            set.set("MIMESupport", "0");
            set.merge_body_pref(default_body_pref());
        }
        "GetItemEstimate" => {
            set.set("FilterType", "0");
            set.set("MaxItems", "100");
        }
        "Search" => {
            set.set("Range", "0-99");
            set.set("RebuildResults", "0");
            set.set("DeepTraversal", "0");
            set.merge_body_pref(default_body_pref());
        }
        "Ping" => {
            set.set("HeartbeatInterval", "600");
        }
        _ => {}
    }
    set
}

fn default_body_pref() -> BodyPref {
    BodyPref {
        element: "BodyPreference".to_owned(),
        content_type: 1,
        truncation_size: None,
        all_or_none: false,
        preview: None,
    }
}

/// The options model for one request.
#[derive(Default)]
pub struct OptionsModel {
    tag: String,
    sets: HashMap<String, OptionSet>,
    last: Option<String>,
}

impl OptionsModel {
    /// Creates an empty model.
    pub fn new() -> OptionsModel {
        OptionsModel::default()
    }

    /// Populates the model for every scope the request references.
    ///
    /// Scopes are the collection ids of the request's `Collection`
    /// elements; a request without collections gets one scope named
    /// after the command tag. Persisted body preferences are merged
    /// between defaults and request values, and written back for the
    /// commands that persist them.
    pub fn load(&mut self, tag: &str, doc: &Document, device: &DeviceState) {
        self.tag = tag.to_owned();
        let root = doc.root();
        let collections = doc.find_all(root, "Collection");
        if collections.is_empty() {
            let mut set = self.seed(tag, device);
            for options in doc.find_all(root, "Options") {
                merge_options_element(&mut set, doc, options);
            }
            self.store(tag, tag, set, device);
            return;
        }
        for col in collections {
            let Some(id) = doc.child_text(col, "CollectionId") else {
                continue;
            };
            let id = id.to_owned();
            let mut set = self.seed(&id, device);
            for child in doc.children(col).collect::<Vec<_>>() {
                let name = doc.name(child);
                if name == "Options" {
                    merge_options_element(&mut set, doc, child);
                } else if !STRUCTURAL.contains(&name) {
                    if let Some(text) = doc.text(child) {
                        set.set(name, text);
                    }
                }
            }
            self.store(tag, &id, set, device);
        }
    }

    fn seed(&self, scope: &str, device: &DeviceState) -> OptionSet {
        let mut set = defaults(&self.tag);
        for pref in device.body_prefs(scope) {
            set.merge_body_pref(pref);
        }
        set
    }

    fn store(&mut self, tag: &str, scope: &str, set: OptionSet, device: &DeviceState) {
        if BODY_PREF_TAGS.contains(&tag) {
            device.set_body_prefs(scope, set.body_prefs.clone());
        }
        debug!(scope = %scope, tag = %tag, "options loaded");
        self.sets.insert(scope.to_owned(), set);
    }

    /// Returns the effective option set for `key`.
    ///
    /// Falls back from the exact scope to the handler-prefix scope,
    /// and finally seeds fresh defaults. Records the resolved scope as
    /// last accessed.
    pub fn option(&mut self, key: &str) -> &OptionSet {
        let scope = if self.sets.contains_key(key) {
            key.to_owned()
        } else {
            let prefix: String = key.chars().take(1).collect();
            if self.sets.contains_key(&prefix) {
                prefix
            } else {
                self.sets.insert(key.to_owned(), defaults(&self.tag));
                key.to_owned()
            }
        };
        self.last = Some(scope.clone());
        &self.sets[&scope]
    }

    /// Targeted override of one option in one scope.
    pub fn set_option(&mut self, scope: &str, name: &str, value: &str) {
        self.sets.entry(scope.to_owned()).or_default().set(name, value);
    }

    /// The option set accessed last, if any.
    pub fn last(&self) -> Option<&OptionSet> {
        self.last.as_deref().and_then(|s| self.sets.get(s))
    }
}

/// Merges the children of an `Options` element into `set`.
fn merge_options_element(set: &mut OptionSet, doc: &Document, options: NodeId) {
    for child in doc.children(options).collect::<Vec<_>>() {
        match doc.name(child) {
            el @ ("BodyPreference" | "BodyPartPreference") => {
                let content_type = doc
                    .child_text(child, "Type")
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(1);
                set.merge_body_pref(BodyPref {
                    element: el.to_owned(),
                    content_type,
                    truncation_size: doc
                        .child_text(child, "TruncationSize")
                        .and_then(|t| t.parse().ok()),
                    all_or_none: doc.child_text(child, "AllOrNone") == Some("1"),
                    preview: doc
                        .child_text(child, "Preview")
                        .and_then(|t| t.parse().ok()),
                });
            }
            name => {
                if let Some(text) = doc.text(child) {
                    set.set(name, text);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asgw_store::DeviceSessions;

    fn sync_request(filter: &str) -> Document {
        let mut doc = Document::new("Sync");
        let cols = doc.add_child(doc.root(), "Collections");
        let col = doc.add_child(cols, "Collection");
        doc.add_leaf(col, "CollectionId", "M1");
        doc.add_leaf(col, "SyncKey", "0");
        doc.add_leaf(col, "WindowSize", "25");
        let opts = doc.add_child(col, "Options");
        doc.add_leaf(opts, "FilterType", filter);
        let pref = doc.add_child(opts, "BodyPreference");
        doc.add_leaf(pref, "Type", "2");
        doc.add_leaf(pref, "TruncationSize", "5120");
        doc
    }

    #[test]
    fn request_overrides_defaults() {
        let sessions = DeviceSessions::new();
        let device = sessions.device("dev1");
        let mut model = OptionsModel::new();
        model.load("Sync", &sync_request("3"), &device);
        let set = model.option("M1");
        assert_eq!(set.get("FilterType"), Some("3"));
        assert_eq!(set.get("WindowSize"), Some("25"));
        // untouched default survives
        assert_eq!(set.get("Conflict"), Some("1"));
    }

    #[test]
    fn body_prefs_merge_per_type() {
        let sessions = DeviceSessions::new();
        let device = sessions.device("dev1");
        let mut model = OptionsModel::new();
        model.load("Sync", &sync_request("0"), &device);
        let set = model.option("M1");
        // seeded type-1 pref untouched, request type-2 added
        assert!(set.body_pref(1).is_some());
        assert_eq!(set.body_pref(2).unwrap().truncation_size, Some(5_120));
    }

    #[test]
    fn body_prefs_persist_to_device() {
        let sessions = DeviceSessions::new();
        let device = sessions.device("dev1");
        let mut model = OptionsModel::new();
        model.load("Sync", &sync_request("0"), &device);
        let stored = device.body_prefs("M1");
        assert!(stored.iter().any(|p| p.content_type == 2));

        // a later request without preferences sees the stored ones
        let mut bare = Document::new("Sync");
        let cols = bare.add_child(bare.root(), "Collections");
        let col = bare.add_child(cols, "Collection");
        bare.add_leaf(col, "CollectionId", "M1");
        let mut model2 = OptionsModel::new();
        model2.load("Sync", &bare, &device);
        assert!(model2.option("M1").body_pref(2).is_some());
    }

    #[test]
    fn unknown_scope_seeds_defaults() {
        let mut model = OptionsModel::new();
        model.load("Sync", &sync_request("0"), &DeviceSessions::new().device("d"));
        let set = model.option("C9");
        assert_eq!(set.get("WindowSize"), Some("100"));
        assert!(model.last().is_some());
    }

    #[test]
    fn truncation_limits_resolve_through_tables() {
        let sessions = DeviceSessions::new();
        let device = sessions.device("dev1");
        let mut model = OptionsModel::new();
        model.load("Sync", &sync_request("0"), &device);

        // seeded default "8" is the no-truncation sentinel
        assert_eq!(model.option("M1").mime_limit(), None);

        model.set_option("M1", "MIMETruncation", "1");
        model.set_option("M1", "Truncation", "3");
        assert_eq!(model.option("M1").mime_limit(), Some(4_096));
        assert_eq!(model.option("M1").body_limit(), Some(2_048));
    }

    #[test]
    fn prefix_fallback() {
        let sessions = DeviceSessions::new();
        let device = sessions.device("dev1");
        let mut model = OptionsModel::new();
        model.load("Sync", &sync_request("5"), &device);
        model.set_option("M", "FilterType", "7");
        // "M2" has no exact scope; falls back to the class prefix
        assert_eq!(model.option("M2").get("FilterType"), Some("7"));
    }

    #[test]
    fn collection_less_command_scopes_by_tag() {
        let mut doc = Document::new("ItemOperations");
        let fetch = doc.add_child(doc.root(), "Fetch");
        let opts = doc.add_child(fetch, "Options");
        doc.add_leaf(opts, "Range", "0-1023");
        let sessions = DeviceSessions::new();
        let mut model = OptionsModel::new();
        model.load("ItemOperations", &doc, &sessions.device("d"));
        assert_eq!(model.option("ItemOperations").get("Range"), Some("0-1023"));
    }
}
