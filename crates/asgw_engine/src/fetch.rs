//! Item fetch: byte-range retrieval of large objects.
//!
//! Serves the `ItemOperations` command. An object is addressed by an
//! attachment reference, by (collection id, server id), or by the long
//! id of a cached search hit. The requested byte range is sliced out
//! of the object, base64-framed, and returned with total size and
//! last-modified metadata. Also implements `EmptyFolderContents`.

use asgw_document::{xml, Document, NodeId};
use asgw_protocol::ItemOpCode;
use asgw_store::{DataStore, HandlerType};
use base64::prelude::*;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::options::OptionsModel;
use crate::session::Session;

/// Stores a fetch may address.
const STORES: [&str; 2] = ["Mailbox", "Document Library"];

/// The `ItemOperations` handler.
pub struct ItemFetch<'a> {
    store: &'a dyn DataStore,
}

/// A fetched object before framing.
struct Object {
    content: Vec<u8>,
    modified: Option<i64>,
}

impl<'a> ItemFetch<'a> {
    /// Creates the handler over `store`.
    pub fn new(store: &'a dyn DataStore) -> Self {
        ItemFetch { store }
    }

    /// Processes one `ItemOperations` request.
    pub fn run(
        &self,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
    ) -> EngineResult<Document> {
        let mut out = Document::new("ItemOperations");
        let out_root = out.root();
        out.add_leaf(out_root, "Status", ItemOpCode::Ok.code().to_string());
        let response = out.add_child(out_root, "Response");

        for fetch in request.find_all(request.root(), "Fetch") {
            self.one_fetch(session, options, request, fetch, &mut out, response);
        }
        for empty in request.find_all(request.root(), "EmptyFolderContents") {
            self.empty_folder(request, empty, &mut out, response);
        }
        Ok(out)
    }

    fn one_fetch(
        &self,
        session: &mut Session,
        options: &mut OptionsModel,
        request: &Document,
        fetch: NodeId,
        out: &mut Document,
        response: NodeId,
    ) {
        let node = out.add_child(response, "Fetch");

        if let Some(store_name) = request.child_text(fetch, "Store") {
            if !STORES.contains(&store_name) {
                warn!(store = %store_name, "unknown fetch store");
                out.add_leaf(node, "Status", ItemOpCode::UnknownStore.code().to_string());
                return;
            }
        }

        // Echo the address back ahead of the status.
        for el in ["FileReference", "CollectionId", "ServerId", "LongId"] {
            if let Some(text) = request.child_text(fetch, el) {
                out.add_leaf(node, el, text);
            }
        }

        let object = match self.resolve(session, request, fetch) {
            Ok(obj) => obj,
            Err(code) => {
                out.add_leaf(node, "Status", code.code().to_string());
                return;
            }
        };
        if object.content.is_empty() {
            out.add_leaf(node, "Status", ItemOpCode::EmptyFile.code().to_string());
            return;
        }

        // Range from the fetch's own Options, falling back to the
        // command-wide option set; absent means the whole object.
        let total = object.content.len();
        let mut cur = request.cursor();
        cur.jump(fetch);
        let range = cur
            .scoped(|c| {
                (c.descend("Options") && c.descend("Range"))
                    .then(|| c.text())
                    .flatten()
            })
            .map(str::to_owned)
            .or_else(|| options.option("ItemOperations").get("Range").map(str::to_owned));
        let (start, end) = match range.as_deref().map(|r| parse_range(r, total)) {
            None => (0, total - 1),
            Some(Some(bounds)) => bounds,
            Some(None) => {
                out.add_leaf(node, "Status", ItemOpCode::ByteRange.code().to_string());
                return;
            }
        };

        out.add_leaf(node, "Status", ItemOpCode::Ok.code().to_string());
        let props = out.add_child(node, "Properties");
        out.add_leaf(props, "Total", total.to_string());
        out.add_leaf(props, "Range", format!("{start}-{end}"));
        if let Some(modified) = object.modified {
            out.add_leaf(props, "Version", modified.to_string());
        }
        if session.multipart {
            out.add_leaf(props, "Part", session.next_part().to_string());
        }
        let slice = &object.content[start..=end];
        out.add_leaf(props, "Data", BASE64_STANDARD.encode(slice));
        debug!(total, start, end, "object fetched");
    }

    /// Resolves the addressed object, mapping each failure to its
    /// status code.
    fn resolve(
        &self,
        session: &mut Session,
        request: &Document,
        fetch: NodeId,
    ) -> Result<Object, ItemOpCode> {
        if let Some(reference) = request.child_text(fetch, "FileReference") {
            return match self.store.attachment(reference) {
                Ok(Some(att)) => Ok(Object {
                    content: att.content,
                    modified: None,
                }),
                Ok(None) => Err(ItemOpCode::BadAttachment),
                Err(_) => Err(ItemOpCode::Io),
            };
        }

        let (handler, sid) = if let Some(long_id) = request.child_text(fetch, "LongId") {
            let Some(hit) = session.device.take_search_hit(long_id) else {
                return Err(ItemOpCode::NotFound);
            };
            (hit.handler, hit.record)
        } else {
            let Some(cid) = request.child_text(fetch, "CollectionId") else {
                return Err(ItemOpCode::Protocol);
            };
            let Some(sid) = request.child_text(fetch, "ServerId") else {
                return Err(ItemOpCode::Protocol);
            };
            let Ok(handler) = HandlerType::for_id(cid) else {
                return Err(ItemOpCode::NotFound);
            };
            (handler, sid.to_owned())
        };

        match self.store.get(handler, &sid) {
            Ok(Some(rec)) => Ok(Object {
                content: xml::serialize(&rec.body).into_bytes(),
                modified: Some(rec.modified),
            }),
            Ok(None) => Err(ItemOpCode::NotFound),
            Err(_) => Err(ItemOpCode::Io),
        }
    }

    fn empty_folder(
        &self,
        request: &Document,
        empty: NodeId,
        out: &mut Document,
        response: NodeId,
    ) {
        let node = out.add_child(response, "EmptyFolderContents");
        let Some(cid) = request.child_text(empty, "CollectionId").map(str::to_owned) else {
            out.add_leaf(node, "Status", ItemOpCode::Protocol.code().to_string());
            return;
        };
        out.add_leaf(node, "CollectionId", cid.clone());
        let Ok(handler) = HandlerType::for_id(&cid) else {
            out.add_leaf(node, "Status", ItemOpCode::NotFound.code().to_string());
            return;
        };
        let subfolders = {
            let mut cur = request.cursor();
            cur.jump(empty);
            cur.descend("Options") && cur.descend("DeleteSubFolders")
        };

        let mut groups = vec![cid.clone()];
        if subfolders {
            match self.store.folders(handler) {
                Ok(folders) => {
                    for fid in folders {
                        match self.store.get(handler, &fid) {
                            Ok(Some(rec)) if rec.group == cid => groups.push(fid),
                            _ => {}
                        }
                    }
                }
                Err(err) => {
                    warn!(group = %cid, error = %err, "folder listing failed");
                    out.add_leaf(node, "Status", ItemOpCode::Io.code().to_string());
                    return;
                }
            }
        }
        for group in groups {
            let items = match self.store.items_in(handler, &group) {
                Ok(items) => items,
                Err(err) => {
                    warn!(group = %group, error = %err, "emptying folder failed");
                    out.add_leaf(node, "Status", ItemOpCode::Io.code().to_string());
                    return;
                }
            };
            for rid in items {
                if let Err(err) = self.store.delete(handler, &rid) {
                    warn!(record = %rid, error = %err, "emptying folder failed");
                    out.add_leaf(node, "Status", ItemOpCode::Io.code().to_string());
                    return;
                }
            }
        }
        out.add_leaf(node, "Status", ItemOpCode::Ok.code().to_string());
    }
}

/// Parses a `start-end` byte range against the object size.
///
/// `None` means the range is syntactically or semantically invalid.
fn parse_range(range: &str, total: usize) -> Option<(usize, usize)> {
    let (start, end) = range.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    if start > end || start >= total {
        return None;
    }
    Some((start, end.min(total - 1)))
}
