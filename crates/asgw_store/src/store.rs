//! The store abstraction and the in-memory reference store.
//!
//! The sync engine talks to user data through [`DataStore`]; a real
//! deployment backs it with a groupware database, the tests and the
//! bundled server use [`MemoryStore`].

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::handler::HandlerType;
use crate::record::{Record, RecordKind, SyncStatus};

/// Outcome of a credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Credentials accepted.
    Granted,
    /// Credentials rejected.
    Denied,
    /// The account exists but is blocked from synchronizing.
    Blocked,
}

/// A stored attachment, addressed by an opaque reference string.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Reference as handed out in item payloads.
    pub reference: String,
    /// Declared content type.
    pub content_type: String,
    /// Raw bytes.
    pub content: Vec<u8>,
}

/// Access to the user data behind the gateway.
pub trait DataStore: Send + Sync {
    /// Loads one record by id.
    fn get(&self, handler: HandlerType, id: &str) -> StoreResult<Option<Record>>;

    /// Ids and sync states of every record in `group` that is not in
    /// sync with the device, in stable order.
    fn pending(&self, handler: HandlerType, group: &str) -> StoreResult<Vec<(String, SyncStatus)>>;

    /// Ids of every folder record of this handler.
    fn folders(&self, handler: HandlerType) -> StoreResult<Vec<String>>;

    /// Ids of every item record in `group`.
    fn items_in(&self, handler: HandlerType, group: &str) -> StoreResult<Vec<String>>;

    /// Stores a new record, assigning and returning its server id.
    fn add(&self, record: Record) -> StoreResult<String>;

    /// Replaces an existing record's payload and sideband.
    fn update(&self, record: Record) -> StoreResult<()>;

    /// Removes a record.
    fn delete(&self, handler: HandlerType, id: &str) -> StoreResult<()>;

    /// Moves a record to another collection of the same handler.
    fn relocate(&self, handler: HandlerType, id: &str, group: &str) -> StoreResult<()>;

    /// Updates the device-relative sync state of a record.
    fn set_sync(&self, handler: HandlerType, id: &str, status: SyncStatus) -> StoreResult<()>;

    /// Checks credentials for `user` on `device_id`.
    fn authorize(&self, user: &str, password: &str, device_id: &str) -> StoreResult<Authorization>;

    /// Hands an outbound message to the mail transport.
    fn send_mail(&self, message: &[u8], save_in_sent: bool) -> StoreResult<()>;

    /// The mail trash collection id, target of delete-as-move.
    fn trash_group(&self) -> StoreResult<String>;

    /// Loads an attachment by its reference string.
    fn attachment(&self, reference: &str) -> StoreResult<Option<Attachment>>;
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<(HandlerType, String), Record>,
    order: Vec<(HandlerType, String)>,
    attachments: HashMap<String, Attachment>,
    users: HashMap<String, String>,
    blocked: Vec<String>,
    outbox: Vec<(Vec<u8>, bool)>,
    next_id: u64,
    trash: String,
    refuse_mail: bool,
}

/// In-memory [`DataStore`], used by the tests and the demo server.
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    /// Id of the reserved mail trash folder.
    pub const TRASH: &'static str = "MTrash";

    /// Creates an empty store with a mail trash folder.
    pub fn new() -> MemoryStore {
        let mut inner = MemoryInner {
            next_id: 1,
            trash: MemoryStore::TRASH.to_owned(),
            ..MemoryInner::default()
        };
        let mut trash = Record::folder(
            MemoryStore::TRASH,
            "M0",
            HandlerType::Mail,
            asgw_document::Document::new("folder"),
        );
        trash.sync = SyncStatus::Synced;
        let key = (HandlerType::Mail, trash.id.clone());
        inner.order.push(key.clone());
        inner.records.insert(key, trash);
        MemoryStore {
            inner: RwLock::new(inner),
        }
    }

    /// Registers a user for [`DataStore::authorize`].
    pub fn add_user(&self, user: &str, password: &str) {
        self.inner
            .write()
            .users
            .insert(user.to_owned(), password.to_owned());
    }

    /// Blocks a registered user from synchronizing.
    pub fn block_user(&self, user: &str) {
        self.inner.write().blocked.push(user.to_owned());
    }

    /// Stores an attachment for later fetches.
    pub fn add_attachment(&self, attachment: Attachment) {
        self.inner
            .write()
            .attachments
            .insert(attachment.reference.clone(), attachment);
    }

    /// Makes subsequent [`DataStore::send_mail`] calls fail.
    pub fn refuse_mail(&self, refuse: bool) {
        self.inner.write().refuse_mail = refuse;
    }

    /// Messages handed to the transport so far.
    pub fn sent_messages(&self) -> Vec<(Vec<u8>, bool)> {
        self.inner.read().outbox.clone()
    }
}

impl DataStore for MemoryStore {
    fn get(&self, handler: HandlerType, id: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .inner
            .read()
            .records
            .get(&(handler, id.to_owned()))
            .cloned())
    }

    fn pending(&self, handler: HandlerType, group: &str) -> StoreResult<Vec<(String, SyncStatus)>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter(|key| key.0 == handler)
            .filter_map(|key| inner.records.get(key))
            .filter(|rec| rec.group == group && rec.sync != SyncStatus::Synced)
            .map(|rec| (rec.id.clone(), rec.sync))
            .collect())
    }

    fn folders(&self, handler: HandlerType) -> StoreResult<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter(|key| key.0 == handler)
            .filter_map(|key| inner.records.get(key))
            .filter(|rec| rec.kind == RecordKind::Folder)
            .map(|rec| rec.id.clone())
            .collect())
    }

    fn items_in(&self, handler: HandlerType, group: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter(|key| key.0 == handler)
            .filter_map(|key| inner.records.get(key))
            .filter(|rec| rec.group == group && rec.kind == RecordKind::Item)
            .map(|rec| rec.id.clone())
            .collect())
    }

    fn add(&self, mut record: Record) -> StoreResult<String> {
        let mut inner = self.inner.write();
        let id = format!("{}{}", record.handler.prefix(), inner.next_id);
        inner.next_id += 1;
        record.id = id.clone();
        debug!(id = %id, group = %record.group, "record added");
        let key = (record.handler, id.clone());
        inner.order.push(key.clone());
        inner.records.insert(key, record);
        Ok(id)
    }

    fn update(&self, record: Record) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let key = (record.handler, record.id.clone());
        if !inner.records.contains_key(&key) {
            return Err(StoreError::NotFound(record.id));
        }
        inner.records.insert(key, record);
        Ok(())
    }

    fn delete(&self, handler: HandlerType, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let key = (handler, id.to_owned());
        if inner.records.remove(&key).is_none() {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        inner.order.retain(|k| *k != key);
        Ok(())
    }

    fn relocate(&self, handler: HandlerType, id: &str, group: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let rec = inner
            .records
            .get_mut(&(handler, id.to_owned()))
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        rec.group = group.to_owned();
        Ok(())
    }

    fn set_sync(&self, handler: HandlerType, id: &str, status: SyncStatus) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let rec = inner
            .records
            .get_mut(&(handler, id.to_owned()))
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        rec.sync = status;
        Ok(())
    }

    fn authorize(&self, user: &str, password: &str, device_id: &str) -> StoreResult<Authorization> {
        let inner = self.inner.read();
        debug!(user = %user, device = %device_id, "authorizing");
        match inner.users.get(user) {
            Some(expected) if expected == password => {
                if inner.blocked.iter().any(|u| u == user) {
                    Ok(Authorization::Blocked)
                } else {
                    Ok(Authorization::Granted)
                }
            }
            _ => Ok(Authorization::Denied),
        }
    }

    fn send_mail(&self, message: &[u8], save_in_sent: bool) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.refuse_mail {
            return Err(StoreError::Submission("transport refused".into()));
        }
        inner.outbox.push((message.to_vec(), save_in_sent));
        Ok(())
    }

    fn trash_group(&self) -> StoreResult<String> {
        Ok(self.inner.read().trash.clone())
    }

    fn attachment(&self, reference: &str) -> StoreResult<Option<Attachment>> {
        Ok(self.inner.read().attachments.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asgw_document::Document;

    fn item(group: &str) -> Record {
        Record::item("", group, HandlerType::Mail, Document::new("mail"))
    }

    #[test]
    fn add_assigns_prefixed_ids() {
        let store = MemoryStore::new();
        let id = store.add(item("M0")).unwrap();
        assert!(id.starts_with('M'));
        assert!(store.get(HandlerType::Mail, &id).unwrap().is_some());
    }

    #[test]
    fn pending_tracks_sync_state() {
        let store = MemoryStore::new();
        let a = store.add(item("M0")).unwrap();
        let b = store.add(item("M0")).unwrap();
        assert_eq!(store.pending(HandlerType::Mail, "M0").unwrap().len(), 2);

        store.set_sync(HandlerType::Mail, &a, SyncStatus::Synced).unwrap();
        let pending = store.pending(HandlerType::Mail, "M0").unwrap();
        assert_eq!(pending, vec![(b, SyncStatus::PendingAdd)]);
    }

    #[test]
    fn relocate_moves_between_groups() {
        let store = MemoryStore::new();
        let id = store.add(item("M0")).unwrap();
        store.relocate(HandlerType::Mail, &id, "M9").unwrap();
        let rec = store.get(HandlerType::Mail, &id).unwrap().unwrap();
        assert_eq!(rec.group, "M9");
        assert!(store.items_in(HandlerType::Mail, "M0").unwrap().is_empty());
    }

    #[test]
    fn delete_unknown_is_an_error() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete(HandlerType::Task, "T404"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn authorization_outcomes() {
        let store = MemoryStore::new();
        store.add_user("kim", "s3cret");
        assert_eq!(
            store.authorize("kim", "s3cret", "dev1").unwrap(),
            Authorization::Granted
        );
        assert_eq!(
            store.authorize("kim", "wrong", "dev1").unwrap(),
            Authorization::Denied
        );
        store.block_user("kim");
        assert_eq!(
            store.authorize("kim", "s3cret", "dev1").unwrap(),
            Authorization::Blocked
        );
    }

    #[test]
    fn mail_refusal() {
        let store = MemoryStore::new();
        store.send_mail(b"From: a\r\n\r\nhi", true).unwrap();
        store.refuse_mail(true);
        assert!(store.send_mail(b"x", false).is_err());
        assert_eq!(store.sent_messages().len(), 1);
    }
}
