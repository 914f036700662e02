//! Plain-XML bridge for the document tree.
//!
//! The tree model has no namespace support, so `xmlns` attributes are
//! rewritten to a private `xml-ns` spelling on the way in and restored
//! on the way out.

use crate::error::{DocError, DocResult};
use crate::node::{Document, NodeId};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

fn normalize_attr_key(key: &str) -> String {
    if let Some(rest) = key.strip_prefix("xmlns") {
        format!("xml-ns{rest}")
    } else {
        key.to_string()
    }
}

fn denormalize_attr_key(key: &str) -> String {
    if let Some(rest) = key.strip_prefix("xml-ns") {
        format!("xmlns{rest}")
    } else {
        key.to_string()
    }
}

/// Parses an XML string into a document.
///
/// Namespace declarations are kept as plain `xml-ns` attributes.
pub fn parse(input: &str) -> DocResult<Document> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut doc: Option<Document> = None;
    let mut stack: Vec<NodeId> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let id = match (&mut doc, stack.last()) {
                    (Some(d), Some(&parent)) => d.add_child(parent, name),
                    (Some(_), None) => return Err(DocError::Xml("trailing element".into())),
                    (None, _) => {
                        doc = Some(Document::new(name));
                        doc.as_ref().map(|d| d.root()).unwrap_or(NodeId(0))
                    }
                };
                if let Some(d) = doc.as_mut() {
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| DocError::Xml(e.to_string()))?;
                        let key =
                            normalize_attr_key(&String::from_utf8_lossy(attr.key.as_ref()));
                        let val = attr
                            .unescape_value()
                            .map_err(|e| DocError::Xml(e.to_string()))?;
                        d.set_attr(id, key, val.into_owned());
                    }
                }
                stack.push(id);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match (&mut doc, stack.last()) {
                    (Some(d), Some(&parent)) => {
                        d.add_child(parent, name);
                    }
                    (None, _) => {
                        doc = Some(Document::new(name));
                    }
                    (Some(_), None) => return Err(DocError::Xml("trailing element".into())),
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| DocError::Xml(e.to_string()))?;
                if let (Some(d), Some(&id)) = (&mut doc, stack.last()) {
                    d.set_text(id, text.into_owned());
                }
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    doc.ok_or(DocError::Empty)
}

/// Serializes a document to an XML string.
pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    write_node(doc, doc.root(), &mut out);
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    out.push('<');
    out.push_str(doc.name(id));
    for (key, val) in doc.attrs(id) {
        out.push(' ');
        out.push_str(&denormalize_attr_key(key));
        out.push_str("=\"");
        out.push_str(&escape(val));
        out.push('"');
    }
    let children: Vec<NodeId> = doc.children(id).collect();
    let text = doc.text(id);
    if children.is_empty() && text.is_none() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(t) = text {
        out.push_str(&escape(t));
    }
    for child in children {
        write_node(doc, child, out);
    }
    out.push_str("</");
    out.push_str(doc.name(id));
    out.push('>');
}
