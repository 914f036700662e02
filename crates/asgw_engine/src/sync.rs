//! The `Sync` command state machine.
//!
//! Each collection in a request moves through key validation, client
//! command application, and a server-to-client diff pass, then commits
//! by advancing its sync key. A rejected collection stops only itself.
//! When no collection produced output and the client asked for a
//! heartbeat, the engine sleeps and re-polls until output appears or
//! the interval is exhausted.

use std::collections::HashMap;
use std::time::Duration;

use asgw_document::Document;
use asgw_protocol::tables::filter_window;
use asgw_protocol::{FilterWindow, GlobalCode, SyncCode};
use asgw_store::{DataStore, ExceptionKind, ExceptionOverride, HandlerType, Record, RecordKind, SyncStatus};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::options::OptionsModel;
use crate::session::Session;

/// Engine limits.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Longest heartbeat the server will honor, in seconds.
    pub heartbeat_ceiling: u32,
    /// Sleep increment of the heartbeat loop, in seconds.
    pub sleep_granularity: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            heartbeat_ceiling: 900,
            sleep_granularity: 60,
        }
    }
}

/// Sleep primitive of the heartbeat loop, injectable for tests.
pub trait Sleeper: Send + Sync {
    /// Blocks for the given number of seconds.
    fn sleep(&self, seconds: u32);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, seconds: u32) {
        std::thread::sleep(Duration::from_secs(u64::from(seconds)));
    }
}

/// Result of running a `Sync` request.
pub enum SyncOutcome {
    /// A response document to encode.
    Response(Document),
    /// Nothing received, nothing to send, no wait requested; the
    /// response carries no body at all.
    Empty,
}

struct Plan {
    id: String,
    handler: HandlerType,
    status: SyncCode,
    /// Key already advanced during the reset path.
    advanced: bool,
    received: usize,
    sent: usize,
    more: bool,
    commands: Document,
    responses: Document,
}

impl Plan {
    fn new(id: String, handler: HandlerType) -> Plan {
        Plan {
            id,
            handler,
            status: SyncCode::Ok,
            advanced: false,
            received: 0,
            sent: 0,
            more: false,
            commands: Document::new("Commands"),
            responses: Document::new("Responses"),
        }
    }
}

/// The `Sync` engine.
pub struct SyncEngine<'a> {
    store: &'a dyn DataStore,
    config: SyncConfig,
    sleeper: &'a dyn Sleeper,
}

impl<'a> SyncEngine<'a> {
    /// Creates an engine over `store` with the given limits.
    pub fn new(store: &'a dyn DataStore, config: SyncConfig, sleeper: &'a dyn Sleeper) -> Self {
        SyncEngine {
            store,
            config,
            sleeper,
        }
    }

    /// Processes one `Sync` request. `now` is the current time in
    /// epoch seconds.
    pub fn run(
        &self,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
        now: i64,
    ) -> EngineResult<SyncOutcome> {
        let root = request.root();
        let mut out = Document::new("Sync");
        let out_root = out.root();

        // Wait is minutes, HeartbeatInterval seconds.
        let wait = if let Some(minutes) = request.child_text(root, "Wait") {
            minutes.parse::<u32>().unwrap_or(0).saturating_mul(60)
        } else if let Some(seconds) = request.child_text(root, "HeartbeatInterval") {
            seconds.parse::<u32>().unwrap_or(0)
        } else {
            0
        };
        if wait > self.config.heartbeat_ceiling {
            out.add_leaf(out_root, "Status", SyncCode::WaitRange.code().to_string());
            out.add_leaf(out_root, "Limit", self.config.heartbeat_ceiling.to_string());
            return Ok(SyncOutcome::Response(out));
        }

        let mut plans: Vec<Plan> = Vec::new();
        if let Some(cols) = request.child_named(root, "Collections") {
            for col in request.children(cols).collect::<Vec<_>>() {
                if request.name(col) != "Collection" {
                    continue;
                }
                plans.push(self.prepare(session, options, request, col, now)?);
            }
        }
        let received: usize = plans.iter().map(|p| p.received).sum();

        // Without an explicit collection list (or with a partial one)
        // the last-known set comes from the device cache.
        if plans.is_empty() || request.find(root, "Partial").is_some() {
            for handler in HandlerType::ALL {
                for group in session.device.collections(handler) {
                    if plans.iter().any(|p| p.id == group) {
                        continue;
                    }
                    debug!(group = %group, "restoring collection from device cache");
                    plans.push(Plan::new(group, handler));
                }
            }
        }

        // Re-cache this request's collection set.
        let mut by_handler: HashMap<HandlerType, Vec<String>> = HashMap::new();
        for plan in &plans {
            by_handler
                .entry(plan.handler)
                .or_default()
                .push(plan.id.clone());
        }
        for (handler, groups) in by_handler {
            session.device.set_collections(handler, groups);
        }

        for plan in &mut plans {
            self.check_collection(session, options, plan, now);
        }

        let mut sent: usize = plans.iter().map(|p| p.sent).sum();
        if sent == 0 && wait > 0 {
            let mut elapsed = 0;
            while elapsed < wait {
                let step = self.config.sleep_granularity.min(wait - elapsed);
                self.sleeper.sleep(step);
                elapsed += step;
                debug!(elapsed, wait, "heartbeat re-poll");
                for plan in &mut plans {
                    self.check_collection(session, options, plan, now);
                }
                if plans
                    .iter()
                    .any(|p| p.sent > 0 || p.status != SyncCode::Ok)
                {
                    break;
                }
            }
            sent = plans.iter().map(|p| p.sent).sum();
        }

        if received == 0 && sent == 0 && wait == 0 {
            // Idle collections force a resync on their next request.
            for plan in &plans {
                session.device.invalidate_sync_key(&plan.id);
            }
            debug!("empty Sync request and response");
            return Ok(SyncOutcome::Empty);
        }

        out.add_leaf(out_root, "Status", SyncCode::Ok.code().to_string());
        let cols_node = out.add_child(out_root, "Collections");
        for plan in &plans {
            let col = out.add_child(cols_node, "Collection");
            let key = if plan.status != SyncCode::Ok || plan.advanced {
                session.device.sync_key(&plan.id)
            } else if plan.received > 0 || plan.sent > 0 {
                session.device.advance_sync_key(&plan.id)
            } else {
                session.device.sync_key(&plan.id)
            };
            out.add_leaf(col, "SyncKey", key);
            out.add_leaf(col, "CollectionId", plan.id.clone());
            out.add_leaf(col, "Status", plan.status.code().to_string());
            if plan.responses.children(plan.responses.root()).next().is_some() {
                out.graft(col, &plan.responses, plan.responses.root());
            }
            if plan.commands.children(plan.commands.root()).next().is_some() {
                out.graft(col, &plan.commands, plan.commands.root());
            }
            if plan.more {
                out.add_child(col, "MoreAvailable");
            }
        }
        Ok(SyncOutcome::Response(out))
    }

    /// Key check and client command application for one collection.
    fn prepare(
        &self,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
        col: asgw_document::NodeId,
        now: i64,
    ) -> EngineResult<Plan> {
        let id = request
            .child_text(col, "CollectionId")
            .unwrap_or_default()
            .to_owned();
        let handler = match HandlerType::for_id(&id) {
            Ok(h) => h,
            Err(_) => {
                let mut plan = Plan::new(id, HandlerType::Mail);
                plan.status = SyncCode::NotFound;
                return Ok(plan);
            }
        };
        let mut plan = Plan::new(id, handler);

        // Supported names the elements the client manages itself.
        if let Some(sup) = request.child_named(col, "Supported") {
            let managed: Vec<&str> = request
                .children(sup)
                .map(|c| request.name(c))
                .collect();
            session.device.set_client_managed(&managed.join(";"));
        }

        let stored = session.device.sync_key(&plan.id);
        match request.child_text(col, "SyncKey") {
            Some(key) if key != "0" && key != stored => {
                warn!(group = %plan.id, client = %key, stored = %stored, "sync key mismatch");
                plan.status = SyncCode::SyncKey;
                return Ok(plan);
            }
            Some(key) if key != "0" => {
                options.set_option(&plan.id, "GetChanges", "1");
            }
            // Absent or "0": full reset. Everything goes back to
            // pending-add and the diff is suppressed for this pass.
            _ => {
                session.device.advance_sync_key(&plan.id);
                plan.advanced = true;
                plan.received += 1;
                options.set_option(&plan.id, "GetChanges", "0");
                for rid in self.store.items_in(handler, &plan.id)? {
                    self.store.set_sync(handler, &rid, SyncStatus::PendingAdd)?;
                }
            }
        }

        if let Some(cmds) = request.child_named(col, "Commands") {
            for cmd in request.children(cmds).collect::<Vec<_>>() {
                if self
                    .apply_command(session, options, request, cmd, &mut plan, now)
                    .is_err()
                {
                    plan.status = SyncCode::Server;
                    break;
                }
            }
        }
        Ok(plan)
    }

    fn apply_command(
        &self,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
        cmd: asgw_document::NodeId,
        plan: &mut Plan,
        now: i64,
    ) -> EngineResult<()> {
        let handler = plan.handler;
        match request.name(cmd) {
            "Add" => {
                plan.received += 1;
                let client_id = request.child_text(cmd, "ClientId").unwrap_or("").to_owned();
                let body = payload_of(request, cmd);
                let mut rec = Record::item("", &plan.id, handler, body);
                rec.modified = now;
                rec.sync = SyncStatus::Synced;
                let id = self.store.add(rec)?;
                session.lock(handler, &id);

                let mut status = SyncCode::Ok.code().to_string();
                if handler == HandlerType::Mail && request.child_named(cmd, "Send").is_some() {
                    status = self.dispatch_mail(&id)?;
                }
                let resp = &mut plan.responses;
                let add = resp.add_child(resp.root(), "Add");
                resp.add_leaf(add, "ClientId", client_id);
                resp.add_leaf(add, "ServerId", id);
                resp.add_leaf(add, "Status", status);
            }
            "Change" => {
                plan.received += 1;
                let Some(sid) = request.child_text(cmd, "ServerId").map(str::to_owned) else {
                    respond(&mut plan.responses, "Change", None, SyncCode::Protocol.code());
                    return Ok(());
                };
                let Some(mut rec) = self.store.get(handler, &sid)? else {
                    respond(&mut plan.responses, "Change", Some(&sid), SyncCode::NotFound.code());
                    return Ok(());
                };
                let server_wins = options.option(&plan.id).get("Conflict") != Some("0");
                if rec.sync == SyncStatus::Replaced && server_wins {
                    // The server's version stays pending and reaches
                    // the client in the diff pass.
                    respond(&mut plan.responses, "Change", Some(&sid), SyncCode::Conflict.code());
                    return Ok(());
                }
                let body = payload_of(request, cmd);
                if let Some(instance) = instance_of(request, cmd) {
                    let Some(recur) = rec.recurrence.as_mut() else {
                        respond(&mut plan.responses, "Change", Some(&sid), SyncCode::Protocol.code());
                        return Ok(());
                    };
                    upsert_exception(recur, instance, ExceptionKind::Modified(body));
                } else {
                    rec.body = body;
                }
                rec.modified = now;
                rec.sync = SyncStatus::Synced;
                self.store.update(rec)?;
                session.lock(handler, &sid);
            }
            "Delete" => {
                plan.received += 1;
                let Some(sid) = request.child_text(cmd, "ServerId").map(str::to_owned) else {
                    respond(&mut plan.responses, "Delete", None, SyncCode::Protocol.code());
                    return Ok(());
                };
                let Some(mut rec) = self.store.get(handler, &sid)? else {
                    respond(&mut plan.responses, "Delete", Some(&sid), SyncCode::NotFound.code());
                    return Ok(());
                };
                if let Some(instance) = instance_of(request, cmd) {
                    let Some(recur) = rec.recurrence.as_mut() else {
                        respond(&mut plan.responses, "Delete", Some(&sid), SyncCode::Protocol.code());
                        return Ok(());
                    };
                    upsert_exception(recur, instance, ExceptionKind::Deleted);
                    rec.modified = now;
                    self.store.update(rec)?;
                } else if handler == HandlerType::Mail
                    && options.option(&plan.id).flag("DeletesAsMoves")
                {
                    let trash = self.store.trash_group()?;
                    if rec.group == trash {
                        self.store.delete(handler, &sid)?;
                    } else {
                        self.store.relocate(handler, &sid, &trash)?;
                        // Appears as an addition when the trash
                        // collection next synchronizes.
                        self.store.set_sync(handler, &sid, SyncStatus::PendingAdd)?;
                    }
                } else {
                    self.store.delete(handler, &sid)?;
                }
                session.lock(handler, &sid);
            }
            "Fetch" => {
                plan.received += 1;
                let Some(sid) = request.child_text(cmd, "ServerId").map(str::to_owned) else {
                    respond(&mut plan.responses, "Fetch", None, SyncCode::Protocol.code());
                    return Ok(());
                };
                let resp = &mut plan.responses;
                match self.store.get(handler, &sid)? {
                    Some(rec) => {
                        let fetch = resp.add_child(resp.root(), "Fetch");
                        resp.add_leaf(fetch, "ServerId", sid);
                        resp.add_leaf(fetch, "Status", SyncCode::Ok.code().to_string());
                        let data = resp.add_child(fetch, "ApplicationData");
                        for child in rec.body.children(rec.body.root()).collect::<Vec<_>>() {
                            resp.graft(data, &rec.body, child);
                        }
                    }
                    None => respond(resp, "Fetch", Some(&sid), SyncCode::NotFound.code()),
                }
            }
            other => {
                debug!(element = %other, "ignoring unknown Sync command");
            }
        }
        Ok(())
    }

    fn dispatch_mail(&self, id: &str) -> EngineResult<String> {
        let Some(rec) = self.store.get(HandlerType::Mail, id)? else {
            return Ok(SyncCode::NotFound.code().to_string());
        };
        let mime = rec
            .body
            .find(rec.body.root(), "Mime")
            .and_then(|n| rec.body.text(n))
            .unwrap_or("")
            .to_owned();
        match self.store.send_mail(mime.as_bytes(), true) {
            Ok(()) => {
                // The draft is gone once it is on the wire.
                self.store.delete(HandlerType::Mail, id)?;
                Ok(SyncCode::Ok.code().to_string())
            }
            Err(err) => {
                warn!(error = %err, "mail submission failed");
                Ok(GlobalCode::MailSubmission.code().to_string())
            }
        }
    }

    /// The diff pass: emits server-side changes for one collection.
    ///
    /// Store failures downgrade the collection to a server-error
    /// status and stop its diff; sibling collections are unaffected.
    fn check_collection(
        &self,
        session: &Session,
        options: &mut OptionsModel,
        plan: &mut Plan,
        now: i64,
    ) {
        if plan.status != SyncCode::Ok {
            return;
        }
        let set = options.option(&plan.id);
        if set.get("GetChanges") == Some("0") {
            return;
        }
        let filter_value = set.get_u32("FilterType").unwrap_or(0);
        let window = set.get_u32("WindowSize").unwrap_or(100) as usize;
        let mime_limit = if set.get("MIMESupport") == Some("0") {
            None
        } else {
            set.mime_limit()
        };
        let body_limit = set.body_limit();
        let Some(filter) = u8::try_from(filter_value)
            .ok()
            .and_then(filter_window)
        else {
            plan.status = SyncCode::Protocol;
            return;
        };
        let cutoff = match filter {
            FilterWindow::Seconds(secs) => Some(now - i64::from(secs)),
            _ => None,
        };
        let incomplete_only = filter == FilterWindow::IncompleteOnly;

        let pending = match self.store.pending(plan.handler, &plan.id) {
            Ok(p) => p,
            Err(err) => {
                warn!(group = %plan.id, error = %err, "diff aborted");
                plan.status = SyncCode::Server;
                return;
            }
        };
        for (rid, stat) in pending {
            if session.is_locked(plan.handler, &rid) {
                continue;
            }
            let rec = match self.store.get(plan.handler, &rid) {
                Ok(Some(rec)) => rec,
                Ok(None) => continue,
                Err(err) => {
                    warn!(group = %plan.id, record = %rid, error = %err, "diff aborted");
                    plan.status = SyncCode::Server;
                    return;
                }
            };
            if rec.kind == RecordKind::Folder {
                continue;
            }
            if plan.sent >= window {
                plan.more = true;
                break;
            }

            // Filter soft-deletes: the record leaves the device but
            // stays on the server.
            let soft_delete = (plan.handler == HandlerType::Task
                && incomplete_only
                && rec.completed)
                || (plan.handler == HandlerType::Calendar
                    && cutoff.is_some_and(|cut| !rec.within_window(cut)));
            if soft_delete {
                let cmds = &mut plan.commands;
                let sd = cmds.add_child(cmds.root(), "SoftDelete");
                cmds.add_leaf(sd, "ServerId", rid.clone());
                if self.commit(plan, &rid, SyncStatus::Synced).is_err() {
                    return;
                }
                plan.sent += 1;
                continue;
            }

            match stat {
                SyncStatus::PendingAdd | SyncStatus::Replaced => {
                    let element = if stat == SyncStatus::PendingAdd {
                        "Add"
                    } else {
                        "Change"
                    };
                    let cmds = &mut plan.commands;
                    let node = cmds.add_child(cmds.root(), element);
                    cmds.add_leaf(node, "ServerId", rid.clone());
                    let data = cmds.add_child(node, "ApplicationData");
                    for child in rec.body.children(rec.body.root()).collect::<Vec<_>>() {
                        cmds.graft(data, &rec.body, child);
                    }
                    truncate_leaf(cmds, data, "Mime", mime_limit);
                    truncate_leaf(cmds, data, "Data", body_limit);
                    if self.commit(plan, &rid, SyncStatus::Synced).is_err() {
                        return;
                    }
                }
                SyncStatus::Deleted => {
                    let cmds = &mut plan.commands;
                    let node = cmds.add_child(cmds.root(), "Delete");
                    cmds.add_leaf(node, "ServerId", rid.clone());
                    if let Err(err) = self.store.delete(plan.handler, &rid) {
                        warn!(record = %rid, error = %err, "diff aborted");
                        plan.status = SyncCode::Server;
                        return;
                    }
                }
                SyncStatus::Synced => continue,
            }
            plan.sent += 1;
        }
    }

    fn commit(&self, plan: &mut Plan, rid: &str, status: SyncStatus) -> Result<(), ()> {
        if let Err(err) = self.store.set_sync(plan.handler, rid, status) {
            warn!(record = %rid, error = %err, "diff aborted");
            plan.status = SyncCode::Server;
            return Err(());
        }
        Ok(())
    }
}

/// Applies a negotiated byte limit to a payload leaf under `scope`,
/// flagging the cut beside the leaf.
fn truncate_leaf(
    doc: &mut Document,
    scope: asgw_document::NodeId,
    name: &str,
    limit: Option<u32>,
) {
    let Some(limit) = limit else { return };
    let Some(leaf) = doc.find(scope, name) else { return };
    let Some(text) = doc.text(leaf).map(str::to_owned) else {
        return;
    };
    let mut cut = limit as usize;
    if text.len() <= cut {
        return;
    }
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    doc.set_text(leaf, &text[..cut]);
    if let Some(parent) = doc.parent(leaf) {
        doc.add_leaf(parent, "Truncated", "1");
    }
}

/// Copies a command's `ApplicationData` into a standalone payload.
fn payload_of(request: &Document, cmd: asgw_document::NodeId) -> Document {
    let mut body = Document::new("ApplicationData");
    if let Some(payload) = request.child_named(cmd, "ApplicationData") {
        for child in request.children(payload).collect::<Vec<_>>() {
            body.graft(body.root(), request, child);
        }
    }
    body
}

/// Instance id of a single-occurrence command, in epoch seconds.
fn instance_of(request: &Document, cmd: asgw_document::NodeId) -> Option<i64> {
    request
        .child_text(cmd, "InstanceId")
        .and_then(|t| t.parse().ok())
}

fn upsert_exception(recur: &mut asgw_store::Recurrence, start: i64, kind: ExceptionKind) {
    match recur
        .exceptions
        .iter_mut()
        .find(|e| e.original_start == start)
    {
        Some(slot) => slot.kind = kind,
        None => recur.exceptions.push(ExceptionOverride {
            original_start: start,
            kind,
        }),
    }
}

fn respond(responses: &mut Document, element: &str, sid: Option<&str>, code: u8) {
    let node = responses.add_child(responses.root(), element);
    if let Some(sid) = sid {
        responses.add_leaf(node, "ServerId", sid);
    }
    responses.add_leaf(node, "Status", code.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use asgw_store::{DeviceSessions, MemoryStore};
    use parking_lot::Mutex;

    pub(crate) struct RecordingSleeper(pub Mutex<Vec<u32>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, seconds: u32) {
            self.0.lock().push(seconds);
        }
    }

    fn request_with_key(id: &str, key: &str) -> Document {
        let mut doc = Document::new("Sync");
        let cols = doc.add_child(doc.root(), "Collections");
        let col = doc.add_child(cols, "Collection");
        doc.add_leaf(col, "CollectionId", id);
        doc.add_leaf(col, "SyncKey", key);
        doc
    }

    #[test]
    fn negotiated_mime_truncation_cuts_outgoing_bodies() {
        let store = MemoryStore::new();
        let mut body = Document::new("ApplicationData");
        let root = body.root();
        body.add_leaf(root, "Mime", "x".repeat(5_000));
        store
            .add(Record::item("", "M1", HandlerType::Mail, body))
            .unwrap();

        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");

        let mut request = request_with_key("M1", "1");
        let col = request.find(request.root(), "Collection").unwrap();
        let opts = request.add_child(col, "Options");
        request.add_leaf(opts, "MIMESupport", "2");
        request.add_leaf(opts, "MIMETruncation", "1");

        let out = match run_in(&store, &request, &mut session) {
            SyncOutcome::Response(doc) => doc,
            SyncOutcome::Empty => panic!("expected a response"),
        };
        let mime = out.find(out.root(), "Mime").unwrap();
        assert_eq!(out.text(mime).unwrap().len(), 4_096);
        assert!(out.find(out.root(), "Truncated").is_some());
    }

    #[test]
    fn default_mime_support_leaves_bodies_whole() {
        let store = MemoryStore::new();
        let mut body = Document::new("ApplicationData");
        let root = body.root();
        body.add_leaf(root, "Mime", "x".repeat(5_000));
        store
            .add(Record::item("", "M1", HandlerType::Mail, body))
            .unwrap();

        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");

        let request = request_with_key("M1", "1");
        let out = match run_in(&store, &request, &mut session) {
            SyncOutcome::Response(doc) => doc,
            SyncOutcome::Empty => panic!("expected a response"),
        };
        let mime = out.find(out.root(), "Mime").unwrap();
        assert_eq!(out.text(mime).unwrap().len(), 5_000);
        assert!(out.find(out.root(), "Truncated").is_none());
    }

    fn run_in(store: &MemoryStore, request: &Document, session: &mut Session) -> SyncOutcome {
        let sleeper = ThreadSleeper;
        let engine = SyncEngine::new(store, SyncConfig::default(), &sleeper);
        let mut options = OptionsModel::new();
        options.load("Sync", request, &session.device);
        engine.run(session, &mut options, request, 1_000_000).unwrap()
    }

    #[test]
    fn wait_over_ceiling_is_rejected_with_limit() {
        let store = MemoryStore::new();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        let mut request = Document::new("Sync");
        request.add_leaf(request.root(), "HeartbeatInterval", "3600");

        let SyncOutcome::Response(out) = run_in(&store, &request, &mut session) else {
            panic!("expected a response");
        };
        assert_eq!(out.child_text(out.root(), "Status"), Some("14"));
        assert_eq!(out.child_text(out.root(), "Limit"), Some("900"));
    }

    #[test]
    fn mismatched_key_rejects_only_that_collection() {
        let store = MemoryStore::new();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1"); // stored key is now 1

        let mut request = Document::new("Sync");
        let cols = request.add_child(request.root(), "Collections");
        let bad = request.add_child(cols, "Collection");
        request.add_leaf(bad, "CollectionId", "M1");
        request.add_leaf(bad, "SyncKey", "7");
        let good = request.add_child(cols, "Collection");
        request.add_leaf(good, "CollectionId", "C2");
        request.add_leaf(good, "SyncKey", "0");

        let SyncOutcome::Response(out) = run_in(&store, &request, &mut session) else {
            panic!("expected a response");
        };
        let statuses: Vec<_> = out
            .find_all(out.root(), "Collection")
            .into_iter()
            .map(|c| out.child_text(c, "Status").unwrap().to_owned())
            .collect();
        assert_eq!(statuses, ["3", "1"]);
        // the rejected collection's key did not move
        assert_eq!(session.device.sync_key("M1"), "1");
    }

    #[test]
    fn reset_marks_all_records_pending_add() {
        let store = MemoryStore::new();
        let id = store
            .add(Record::item("", "M1", HandlerType::Mail, Document::new("mail")))
            .unwrap();
        store.set_sync(HandlerType::Mail, &id, SyncStatus::Replaced).unwrap();

        let request = request_with_key("M1", "0");
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        let outcome = run_in(&store, &request, &mut session);
        assert!(matches!(outcome, SyncOutcome::Response(_)));
        let rec = store.get(HandlerType::Mail, &id).unwrap().unwrap();
        assert_eq!(rec.sync, SyncStatus::PendingAdd);
        // the reset advanced the key once
        assert_eq!(session.device.sync_key("M1"), "1");
    }

    #[test]
    fn empty_request_without_wait_is_empty_and_invalidates() {
        let store = MemoryStore::new();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");
        let request = request_with_key("M1", "1");
        let outcome = run_in(&store, &request, &mut session);
        assert!(matches!(outcome, SyncOutcome::Empty));
        assert_eq!(session.device.sync_key("M1"), "0");
    }

    #[test]
    fn add_command_maps_client_id() {
        let store = MemoryStore::new();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");

        let mut request = request_with_key("M1", "1");
        let col = request.find(request.root(), "Collection").unwrap();
        let cmds = request.add_child(col, "Commands");
        let add = request.add_child(cmds, "Add");
        request.add_leaf(add, "ClientId", "tmp42");
        let data = request.add_child(add, "ApplicationData");
        request.add_leaf(data, "Subject", "hello");

        let SyncOutcome::Response(out) = run_in(&store, &request, &mut session) else {
            panic!("expected a response");
        };
        let resp_add = out.find(out.root(), "Add").unwrap();
        assert_eq!(out.child_text(resp_add, "ClientId"), Some("tmp42"));
        assert_eq!(out.child_text(resp_add, "Status"), Some("1"));
        let sid = out.child_text(resp_add, "ServerId").unwrap();
        let rec = store.get(HandlerType::Mail, sid).unwrap().unwrap();
        assert_eq!(rec.body.child_text(rec.body.root(), "Subject"), Some("hello"));
        // traffic advanced the key
        assert_eq!(session.device.sync_key("M1"), "2");
    }

    #[test]
    fn delete_as_moves_relocates_to_trash() {
        let store = MemoryStore::new();
        let id = store
            .add(Record::item("", "M1", HandlerType::Mail, Document::new("mail")))
            .unwrap();
        store.set_sync(HandlerType::Mail, &id, SyncStatus::Synced).unwrap();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");

        let mut request = request_with_key("M1", "1");
        let col = request.find(request.root(), "Collection").unwrap();
        let cmds = request.add_child(col, "Commands");
        let del = request.add_child(cmds, "Delete");
        request.add_leaf(del, "ServerId", id.as_str());

        run_in(&store, &request, &mut session);
        let rec = store.get(HandlerType::Mail, &id).unwrap().unwrap();
        assert_eq!(rec.group, store.trash_group().unwrap());
        assert_eq!(rec.sync, SyncStatus::PendingAdd);
    }

    #[test]
    fn occurrence_delete_becomes_an_exception() {
        let store = MemoryStore::new();
        let mut rec = Record::item("", "C1", HandlerType::Calendar, Document::new("event"));
        rec.start_time = Some(500);
        rec.recurrence = Some(asgw_store::Recurrence {
            interval: 100,
            until: None,
            exceptions: Vec::new(),
        });
        let id = store.add(rec).unwrap();
        store.set_sync(HandlerType::Calendar, &id, SyncStatus::Synced).unwrap();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("C1");

        let mut request = request_with_key("C1", "1");
        let col = request.find(request.root(), "Collection").unwrap();
        let cmds = request.add_child(col, "Commands");
        let del = request.add_child(cmds, "Delete");
        request.add_leaf(del, "ServerId", id.as_str());
        request.add_leaf(del, "InstanceId", "700");

        run_in(&store, &request, &mut session);
        let rec = store.get(HandlerType::Calendar, &id).unwrap().unwrap();
        let recur = rec.recurrence.unwrap();
        assert_eq!(recur.exceptions.len(), 1);
        assert_eq!(recur.exceptions[0].original_start, 700);
        assert!(matches!(recur.exceptions[0].kind, ExceptionKind::Deleted));
    }

    #[test]
    fn conflict_favors_server() {
        let store = MemoryStore::new();
        let id = store
            .add(Record::item("", "M1", HandlerType::Mail, Document::new("mail")))
            .unwrap();
        store.set_sync(HandlerType::Mail, &id, SyncStatus::Replaced).unwrap();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");

        let mut request = request_with_key("M1", "1");
        let col = request.find(request.root(), "Collection").unwrap();
        let cmds = request.add_child(col, "Commands");
        let change = request.add_child(cmds, "Change");
        request.add_leaf(change, "ServerId", id.as_str());
        let data = request.add_child(change, "ApplicationData");
        request.add_leaf(data, "Subject", "client version");

        let SyncOutcome::Response(out) = run_in(&store, &request, &mut session) else {
            panic!("expected a response");
        };
        let resp = out.find(out.root(), "Responses").unwrap();
        let change = out.child_named(resp, "Change").unwrap();
        assert_eq!(out.child_text(change, "Status"), Some("7"));
        // the server version went out as a Change command instead
        let commands = out.find(out.root(), "Commands").unwrap();
        assert!(out.child_named(commands, "Change").is_some());
    }

    #[test]
    fn heartbeat_sleeps_in_bounded_increments() {
        let store = MemoryStore::new();
        let sessions = DeviceSessions::new();
        let mut session = Session::new(sessions.device("d"));
        session.device.advance_sync_key("M1");

        let mut request = request_with_key("M1", "1");
        request.add_leaf(request.root(), "HeartbeatInterval", "300");

        let sleeper = RecordingSleeper(Mutex::new(Vec::new()));
        let engine = SyncEngine::new(&store, SyncConfig::default(), &sleeper);
        let mut options = OptionsModel::new();
        options.load("Sync", &request, &session.device);
        let outcome = engine
            .run(&mut session, &mut options, &request, 1_000_000)
            .unwrap();

        let sleeps = sleeper.0.lock();
        assert_eq!(sleeps.iter().sum::<u32>(), 300);
        assert!(sleeps.iter().all(|&s| s <= 60));
        // empty-but-valid: a response, not the empty short-circuit
        assert!(matches!(outcome, SyncOutcome::Response(_)));
    }
}
