//! Binary body codec.
//!
//! ActiveSync bodies travel as a compact binary rendering of the
//! document tree. The bit-level WBXML grammar lives behind the
//! [`BodyCodec`] trait; [`TagCodec`] is the built-in implementation, a
//! length-prefixed preorder encoding that round-trips any document.

use crate::error::{DocError, DocResult};
use crate::node::{Document, NodeId};

/// Encoder/decoder for binary protocol bodies.
pub trait BodyCodec: Send + Sync {
    /// Decodes raw body bytes into a document.
    fn decode(&self, bytes: &[u8]) -> DocResult<Document>;

    /// Encodes a document into body bytes.
    fn encode(&self, doc: &Document) -> DocResult<Vec<u8>>;
}

const MAGIC: &[u8; 4] = b"ASD1";

const M_START: u8 = 0x01;
const M_TEXT: u8 = 0x02;
const M_ATTR: u8 = 0x03;
const M_END: u8 = 0x04;

/// Built-in binary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagCodec;

impl TagCodec {
    fn encode_node(&self, doc: &Document, id: NodeId, out: &mut Vec<u8>) {
        out.push(M_START);
        push_str(out, doc.name(id));
        for (name, value) in doc.attrs(id) {
            out.push(M_ATTR);
            push_str(out, name);
            push_str(out, value);
        }
        if let Some(text) = doc.text(id) {
            out.push(M_TEXT);
            push_str(out, text);
        }
        for child in doc.children(id).collect::<Vec<_>>() {
            self.encode_node(doc, child, out);
        }
        out.push(M_END);
    }
}

fn bad_marker(buf: &[u8], marker: u8, offset: usize) -> DocError {
    DocError::BadMarker {
        marker,
        offset,
        raw: buf.to_vec(),
    }
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Take<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Take<'a> {
    fn byte(&mut self) -> DocResult<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(b)
    }

    fn truncated(&self) -> DocError {
        DocError::Truncated {
            offset: self.pos,
            raw: self.buf.to_vec(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn string(&mut self) -> DocResult<String> {
        let len_bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.truncated())?;
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        self.pos += 4;
        let raw = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(|| self.truncated())?;
        self.pos += len;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

impl BodyCodec for TagCodec {
    fn decode(&self, bytes: &[u8]) -> DocResult<Document> {
        if bytes.len() < 4 || &bytes[..4] != MAGIC {
            return Err(DocError::BadMagic {
                raw: bytes.to_vec(),
            });
        }
        let mut take = Take {
            buf: bytes,
            pos: 4,
        };

        if take.byte()? != M_START {
            return Err(bad_marker(bytes, bytes[4], 4));
        }
        let mut doc = Document::new(take.string()?);
        let mut stack = vec![doc.root()];

        while let Some(&top) = stack.last() {
            let at = take.pos;
            match take.byte()? {
                M_START => {
                    let name = take.string()?;
                    stack.push(doc.add_child(top, name));
                }
                M_ATTR => {
                    let name = take.string()?;
                    let value = take.string()?;
                    doc.set_attr(top, name, value);
                }
                M_TEXT => {
                    let text = take.string()?;
                    doc.set_text(top, text);
                }
                M_END => {
                    stack.pop();
                }
                other => return Err(bad_marker(bytes, other, at)),
            }
        }

        if let Some(trailing) = take.peek() {
            return Err(bad_marker(bytes, trailing, take.pos));
        }
        Ok(doc)
    }

    fn encode(&self, doc: &Document) -> DocResult<Vec<u8>> {
        let mut out = MAGIC.to_vec();
        self.encode_node(doc, doc.root(), &mut out);
        Ok(out)
    }
}
