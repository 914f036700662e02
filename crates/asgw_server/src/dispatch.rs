//! Command dispatch.
//!
//! A static registry maps command tags to handlers. The registry is
//! populated at startup and validated against the protocol's command
//! table, so a typo in a handler name fails construction instead of
//! surfacing as a mysterious 501 at runtime. Authentication runs
//! before any command processing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use asgw_document::{BodyCodec, Document, TagCodec};
use asgw_engine::{
    ItemFetch, OptionsModel, Session, Sleeper, SyncEngine, SyncOutcome, ThreadSleeper,
};
use asgw_protocol::{command, GlobalCode};
use asgw_store::{Authorization, DataStore, DeviceSessions, DeviceState, HandlerType, RecordKind};
use base64::prelude::*;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::transport::{self, RawRequest};

/// What a handler tells the dispatcher to do next.
pub enum Outcome {
    /// Encode this document as the response body.
    Continue(Document),
    /// Reply HTTP 200 with no body.
    Stop,
}

/// Shared collaborators handed to every handler.
pub struct Context<'a> {
    /// The user data store.
    pub store: &'a dyn DataStore,
    /// Server configuration.
    pub config: &'a ServerConfig,
    /// Sleep primitive for long-polls.
    pub sleeper: &'a dyn Sleeper,
    /// Current time, epoch seconds.
    pub now: i64,
}

/// A command implementation.
pub trait CommandHandler: Send + Sync {
    /// Processes one decoded request body.
    fn handle(
        &self,
        ctx: &Context<'_>,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
    ) -> ServerResult<Outcome>;
}

/// A response ready for the HTTP layer.
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Content type of the body, when there is one.
    pub content_type: Option<&'static str>,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn status_only(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            content_type: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

/// The command dispatcher.
pub struct Dispatcher {
    store: Arc<dyn DataStore>,
    sessions: DeviceSessions,
    config: ServerConfig,
    sleeper: Box<dyn Sleeper>,
    codec: Box<dyn BodyCodec>,
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Dispatcher {
    /// Creates a dispatcher with the built-in handlers, the binary
    /// codec, and a real sleeper.
    pub fn new(store: Arc<dyn DataStore>, config: ServerConfig) -> ServerResult<Dispatcher> {
        Dispatcher::with_parts(store, config, Box::new(ThreadSleeper), Box::new(TagCodec))
    }

    /// Creates a dispatcher with explicit sleeper and codec, for
    /// embedding and tests.
    pub fn with_parts(
        store: Arc<dyn DataStore>,
        config: ServerConfig,
        sleeper: Box<dyn Sleeper>,
        codec: Box<dyn BodyCodec>,
    ) -> ServerResult<Dispatcher> {
        let mut handlers: HashMap<&'static str, Box<dyn CommandHandler>> = HashMap::new();
        handlers.insert("Sync", Box::new(SyncHandler));
        handlers.insert("ItemOperations", Box::new(ItemOperationsHandler));
        handlers.insert("GetItemEstimate", Box::new(GetItemEstimateHandler));
        handlers.insert("Ping", Box::new(PingHandler));
        handlers.insert("SendMail", Box::new(SendMailHandler));

        for name in handlers.keys() {
            if command::command_code(name).is_none() {
                return Err(ServerError::Unsupported((*name).to_owned()));
            }
        }
        Ok(Dispatcher {
            store,
            sessions: DeviceSessions::new(),
            config,
            sleeper,
            codec,
            handlers,
        })
    }

    /// The shared state of one device, for embedding and tests.
    pub fn device(&self, device_id: &str) -> Arc<DeviceState> {
        self.sessions.device(device_id)
    }

    /// Processes one raw request end to end.
    pub fn handle(&self, raw: &RawRequest) -> HttpResponse {
        if raw.method.eq_ignore_ascii_case("OPTIONS") {
            return self.options_probe();
        }
        match self.process(raw) {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "request failed");
                HttpResponse::status_only(err.http_status())
            }
        }
    }

    /// The `OPTIONS` probe: advertises protocol versions and the
    /// served command set.
    fn options_probe(&self) -> HttpResponse {
        let mut commands: Vec<&str> = self.handlers.keys().copied().collect();
        commands.sort_unstable();
        HttpResponse {
            status: 200,
            content_type: None,
            headers: vec![
                ("Allow".to_owned(), "OPTIONS,POST".to_owned()),
                (
                    "MS-ASProtocolVersions".to_owned(),
                    command::SUPPORTED_VERSIONS.to_owned(),
                ),
                ("MS-ASProtocolCommands".to_owned(), commands.join(",")),
                ("MS-Server-ActiveSync".to_owned(), self.config.server_name.clone()),
            ],
            body: Vec::new(),
        }
    }

    fn process(&self, raw: &RawRequest) -> ServerResult<HttpResponse> {
        let mut request = transport::decode_request(raw, self.codec.as_ref())?;

        if self.config.require_auth {
            match self.authorize(raw, &request.device_id)? {
                Authorization::Granted => {}
                Authorization::Denied => return Ok(HttpResponse::status_only(401)),
                Authorization::Blocked => return Ok(HttpResponse::status_only(456)),
            }
        }

        let Some(body) = request.body.take() else {
            debug!("autodiscovery probe");
            return Ok(HttpResponse::status_only(200));
        };
        let command = request.command.clone().ok_or(ServerError::MissingCommand)?;
        let handler = self
            .handlers
            .get(command.as_str())
            .ok_or_else(|| ServerError::Unsupported(command.clone()))?;

        let mut session = Session::new(self.sessions.device(&request.device_id));
        session.multipart = request.accept_multipart;

        let mut options = OptionsModel::new();
        options.load(&command, &body, &session.device);
        if request
            .params
            .iter()
            .any(|(n, v)| n == "Options" && v == "SaveInSent")
        {
            options.set_option(&command, "SaveInSent", "1");
        }

        let ctx = Context {
            store: self.store.as_ref(),
            config: &self.config,
            sleeper: self.sleeper.as_ref(),
            now: epoch_now(),
        };
        info!(command = %command, device = %request.device_id, "dispatching");
        match handler.handle(&ctx, &mut session, &mut options, &body)? {
            Outcome::Continue(doc) => {
                let enc =
                    transport::encode_response(&session, &request, &doc, self.codec.as_ref())?;
                Ok(HttpResponse {
                    status: 200,
                    content_type: Some(enc.content_type),
                    headers: Vec::new(),
                    body: enc.body,
                })
            }
            Outcome::Stop => Ok(HttpResponse::status_only(200)),
        }
    }

    fn authorize(&self, raw: &RawRequest, device_id: &str) -> ServerResult<Authorization> {
        let Some(credentials) = raw
            .header("Authorization")
            .and_then(|h| h.strip_prefix("Basic "))
            .and_then(|b| BASE64_STANDARD.decode(b.trim()).ok())
        else {
            return Ok(Authorization::Denied);
        };
        let text = String::from_utf8_lossy(&credentials).into_owned();
        let Some((user, password)) = text.split_once(':') else {
            return Ok(Authorization::Denied);
        };
        Ok(self.store.authorize(user, password, device_id)?)
    }
}

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct SyncHandler;

impl CommandHandler for SyncHandler {
    fn handle(
        &self,
        ctx: &Context<'_>,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
    ) -> ServerResult<Outcome> {
        let engine = SyncEngine::new(ctx.store, ctx.config.sync(), ctx.sleeper);
        match engine.run(session, options, request, ctx.now)? {
            SyncOutcome::Response(doc) => Ok(Outcome::Continue(doc)),
            SyncOutcome::Empty => Ok(Outcome::Stop),
        }
    }
}

struct ItemOperationsHandler;

impl CommandHandler for ItemOperationsHandler {
    fn handle(
        &self,
        ctx: &Context<'_>,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
    ) -> ServerResult<Outcome> {
        let doc = ItemFetch::new(ctx.store).run(session, options, request)?;
        Ok(Outcome::Continue(doc))
    }
}

struct GetItemEstimateHandler;

impl CommandHandler for GetItemEstimateHandler {
    fn handle(
        &self,
        ctx: &Context<'_>,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
    ) -> ServerResult<Outcome> {
        let mut out = Document::new("GetItemEstimate");
        let out_root = out.root();
        for col in request.find_all(request.root(), "Collection") {
            let response = out.add_child(out_root, "Response");
            let Some(cid) = request.child_text(col, "CollectionId") else {
                out.add_leaf(response, "Status", "2");
                continue;
            };
            let Ok(handler) = HandlerType::for_id(cid) else {
                out.add_leaf(response, "Status", "2");
                continue;
            };
            if let Some(key) = request.child_text(col, "SyncKey") {
                if key != "0" && key != session.device.sync_key(cid) {
                    out.add_leaf(response, "Status", "4");
                    continue;
                }
            }
            let cap = options.option(cid).get_u32("MaxItems").unwrap_or(100) as usize;
            let mut estimate = 0usize;
            for (rid, _) in ctx.store.pending(handler, cid)? {
                if ctx
                    .store
                    .get(handler, &rid)?
                    .is_some_and(|rec| rec.kind == RecordKind::Item)
                {
                    estimate += 1;
                }
            }
            out.add_leaf(response, "Status", "1");
            let entry = out.add_child(response, "Collection");
            out.add_leaf(entry, "CollectionId", cid);
            out.add_leaf(entry, "Estimate", estimate.min(cap).to_string());
        }
        Ok(Outcome::Continue(out))
    }
}

struct PingHandler;

impl CommandHandler for PingHandler {
    fn handle(
        &self,
        _ctx: &Context<'_>,
        session: &mut Session,
        _options: &mut OptionsModel,
        request: &Document,
    ) -> ServerResult<Outcome> {
        let groups: Vec<String> = request
            .find_all(request.root(), "Folder")
            .into_iter()
            .filter_map(|f| request.child_text(f, "Id"))
            .map(str::to_owned)
            .collect();
        // An empty Ping re-uses the previously registered set.
        if !groups.is_empty() {
            debug!(groups = groups.len(), "ping groups registered");
            session.device.set_ping_groups(groups);
        }
        Ok(Outcome::Stop)
    }
}

struct SendMailHandler;

impl CommandHandler for SendMailHandler {
    fn handle(
        &self,
        ctx: &Context<'_>,
        _session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
    ) -> ServerResult<Outcome> {
        let mime = request
            .child_text(request.root(), "Mime")
            .unwrap_or_default();
        let save = options.option("SendMail").flag("SaveInSent");
        match ctx.store.send_mail(mime.as_bytes(), save) {
            Ok(()) => Ok(Outcome::Stop),
            Err(err) => {
                warn!(error = %err, "mail submission failed");
                let mut out = Document::new("SendMail");
                let root = out.root();
                out.add_leaf(root, "Status", GlobalCode::MailSubmission.code().to_string());
                Ok(Outcome::Continue(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asgw_document::BodyCodec;
    use asgw_store::MemoryStore;

    fn dispatcher(store: Arc<MemoryStore>) -> Dispatcher {
        Dispatcher::new(store, ServerConfig::new()).unwrap()
    }

    fn basic_auth(user: &str, password: &str) -> (String, String) {
        (
            "Authorization".to_owned(),
            format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{password}"))),
        )
    }

    fn post(query: &str, body: Vec<u8>, auth: bool) -> RawRequest {
        let mut headers = vec![(
            "Content-Type".to_owned(),
            transport::CT_WBXML.to_owned(),
        )];
        if auth {
            headers.push(basic_auth("alice", "pw"));
        }
        RawRequest {
            method: "POST".into(),
            query: query.into(),
            headers,
            body,
        }
    }

    fn store_with_user() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_user("alice", "pw");
        store
    }

    #[test]
    fn options_probe_advertises_commands() {
        let d = dispatcher(store_with_user());
        let response = d.handle(&RawRequest {
            method: "OPTIONS".into(),
            ..RawRequest::default()
        });
        assert_eq!(response.status, 200);
        let commands = response
            .headers
            .iter()
            .find(|(n, _)| n == "MS-ASProtocolCommands")
            .map(|(_, v)| v.as_str())
            .unwrap();
        assert!(commands.contains("Sync"));
        assert!(commands.contains("ItemOperations"));
        let versions = response
            .headers
            .iter()
            .find(|(n, _)| n == "MS-ASProtocolVersions")
            .unwrap();
        assert!(versions.1.contains("16.1"));
    }

    #[test]
    fn missing_credentials_yield_401() {
        let d = dispatcher(store_with_user());
        let response = d.handle(&post("Cmd=Ping&DeviceId=d1", Vec::new(), false));
        assert_eq!(response.status, 401);
    }

    #[test]
    fn blocked_user_yields_456() {
        let store = store_with_user();
        store.block_user("alice");
        let d = dispatcher(store);
        let response = d.handle(&post("Cmd=Ping&DeviceId=d1", Vec::new(), true));
        assert_eq!(response.status, 456);
    }

    #[test]
    fn unsupported_command_yields_501() {
        let d = dispatcher(store_with_user());
        let response = d.handle(&post("Cmd=Provision&DeviceId=d1", Vec::new(), true));
        assert_eq!(response.status, 501);
    }

    #[test]
    fn sync_round_trip_over_the_wire() {
        let store = store_with_user();
        store
            .add(asgw_store::Record::item(
                "",
                "M1",
                HandlerType::Mail,
                Document::new("mail"),
            ))
            .unwrap();
        let d = dispatcher(store);
        d.device("d1").advance_sync_key("M1");

        let mut request = Document::new("Sync");
        let cols = request.add_child(request.root(), "Collections");
        let col = request.add_child(cols, "Collection");
        request.add_leaf(col, "CollectionId", "M1");
        request.add_leaf(col, "SyncKey", "1");

        let body = TagCodec.encode(&request).unwrap();
        let response = d.handle(&post("Cmd=Sync&DeviceId=d1", body, true));
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, Some(transport::CT_WBXML));

        let doc = TagCodec.decode(&response.body).unwrap();
        assert_eq!(doc.root_name(), "Sync");
        assert_eq!(doc.find_all(doc.root(), "Add").len(), 1);
        let col = doc.find(doc.root(), "Collection").unwrap();
        assert_eq!(doc.child_text(col, "SyncKey"), Some("2"));
    }

    #[test]
    fn ping_registers_groups_and_stops() {
        let d = dispatcher(store_with_user());
        let mut request = Document::new("Ping");
        let folders = request.add_child(request.root(), "Folders");
        let folder = request.add_child(folders, "Folder");
        request.add_leaf(folder, "Id", "M1");
        request.add_leaf(folder, "Class", "Email");

        let body = TagCodec.encode(&request).unwrap();
        let response = d.handle(&post("Cmd=Ping&DeviceId=d1", body, true));
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(d.device("d1").ping_groups(), vec!["M1".to_owned()]);
    }

    #[test]
    fn send_mail_routes_to_store() {
        let store = store_with_user();
        let d = dispatcher(Arc::clone(&store));
        let raw = RawRequest {
            method: "POST".into(),
            query: "Cmd=SendMail&DeviceId=d1&Options=SaveInSent".into(),
            headers: vec![
                ("Content-Type".to_owned(), "message/rfc822".to_owned()),
                basic_auth("alice", "pw"),
            ],
            body: b"From: alice\r\n\r\nhello".to_vec(),
        };
        let response = d.handle(&raw);
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        let sent = store.sent_messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1, "save-in-sent flag reached the store");
    }

    #[test]
    fn get_item_estimate_counts_pending() {
        let store = store_with_user();
        for _ in 0..3 {
            store
                .add(asgw_store::Record::item(
                    "",
                    "M1",
                    HandlerType::Mail,
                    Document::new("mail"),
                ))
                .unwrap();
        }
        let d = dispatcher(store);

        let mut request = Document::new("GetItemEstimate");
        let cols = request.add_child(request.root(), "Collections");
        let col = request.add_child(cols, "Collection");
        request.add_leaf(col, "CollectionId", "M1");

        let body = TagCodec.encode(&request).unwrap();
        let response = d.handle(&post("Cmd=GetItemEstimate&DeviceId=d1", body, true));
        let doc = TagCodec.decode(&response.body).unwrap();
        let estimate = doc.find(doc.root(), "Estimate").unwrap();
        assert_eq!(doc.text(estimate), Some("3"));
    }
}
